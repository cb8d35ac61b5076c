//! Text sanitizers for captured terminal output.
//!
//! Every function here is total: any input produces an output, nothing fails.
//! The streaming types ([`Utf8Decoder`], [`AnsiStripper`]) carry their state
//! across chunk boundaries so a multi-byte character or an escape sequence
//! split between two reads is handled exactly like an unsplit one.

use once_cell::sync::Lazy;
use regex::Regex;

/// Trailing prompt glyph (`$`, `%`, `#`, `>`) plus any whitespace after it
static TRAILING_PROMPT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[%$#>]\s*$").expect("failed to compile prompt matcher"));

fn normalize_line_endings(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "")
}

/// Clean a block of captured output.
///
/// Normalizes line endings, drops bare carriage returns, removes control
/// characters (newlines and tabs survive) and trims the result. Printable
/// Unicode is preserved.
pub fn sanitize_output(text: &str) -> String {
    normalize_line_endings(text)
        .chars()
        .filter(|&ch| ch == '\n' || ch == '\t' || !ch.is_control())
        .collect::<String>()
        .trim()
        .to_string()
}

/// Clean individual lines, dropping any that end up empty.
///
/// A trailing shell prompt glyph is removed from each line before control
/// characters are stripped.
pub fn sanitize_lines<I, S>(lines: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    lines
        .into_iter()
        .filter_map(|line| {
            let without_prompt = TRAILING_PROMPT.replace(line.as_ref(), "");
            let cleaned: String = without_prompt
                .chars()
                .filter(|ch| !ch.is_control())
                .collect();
            let trimmed = cleaned.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        })
        .collect()
}

/// Clean text typed by a user before it is sent to a shell.
pub fn sanitize_user_input(text: &str) -> String {
    normalize_line_endings(text)
        .chars()
        .filter(|&ch| ch == '\n' || !ch.is_control())
        .collect::<String>()
        .trim()
        .to_string()
}

/// Remove ANSI escape sequences from a complete string.
pub fn strip_ansi(text: &str) -> String {
    AnsiStripper::new().push(text)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum EscapeState {
    #[default]
    Ground,
    /// Saw ESC
    Escape,
    /// ESC followed by intermediate bytes, e.g. `ESC ( B`
    Intermediate,
    /// Control Sequence Introducer: `ESC [`
    Csi,
    /// Operating System Command: `ESC ]`, ends with BEL or `ESC \`
    Osc,
    OscEscape,
}

/// Streaming ANSI escape stripper.
///
/// Handles CSI, OSC (BEL or ST terminated) and short two/three byte escape
/// sequences. Parser state persists between calls to [`AnsiStripper::push`].
#[derive(Debug, Default)]
pub struct AnsiStripper {
    state: EscapeState,
}

impl AnsiStripper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next chunk of text, returning everything outside escape sequences.
    pub fn push(&mut self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());

        for ch in text.chars() {
            self.state = match self.state {
                EscapeState::Ground => {
                    if ch == '\x1b' {
                        EscapeState::Escape
                    } else {
                        out.push(ch);
                        EscapeState::Ground
                    }
                }
                EscapeState::Escape => match ch {
                    '[' => EscapeState::Csi,
                    ']' => EscapeState::Osc,
                    '\x20'..='\x2f' => EscapeState::Intermediate,
                    _ => EscapeState::Ground,
                },
                EscapeState::Intermediate => match ch {
                    '\x20'..='\x2f' => EscapeState::Intermediate,
                    _ => EscapeState::Ground,
                },
                EscapeState::Csi => match ch {
                    '\x40'..='\x7e' => EscapeState::Ground,
                    '\x20'..='\x3f' => EscapeState::Csi,
                    // Malformed sequence: give the character back
                    other => {
                        out.push(other);
                        EscapeState::Ground
                    }
                },
                EscapeState::Osc => match ch {
                    '\x07' => EscapeState::Ground,
                    '\x1b' => EscapeState::OscEscape,
                    _ => EscapeState::Osc,
                },
                EscapeState::OscEscape => match ch {
                    '\\' | '\x07' => EscapeState::Ground,
                    _ => EscapeState::Osc,
                },
            };
        }

        out
    }
}

/// Streaming UTF-8 decoder.
///
/// An incomplete multi-byte sequence at the end of a chunk is held back until
/// the next chunk arrives. Invalid bytes decode to U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    carry: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) -> String {
        let mut buf = std::mem::take(&mut self.carry);
        buf.extend_from_slice(bytes);

        let mut out = String::with_capacity(buf.len());
        let mut rest: &[u8] = &buf;

        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    break;
                }
                Err(err) => {
                    let (valid, after) = rest.split_at(err.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));
                    match err.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            self.carry = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }

        out
    }

    /// Bytes currently held back waiting for the rest of a character.
    pub fn pending(&self) -> usize {
        self.carry.len()
    }
}
