// Command framing for marker-delimited capture
//
// A wrapped command echoes a unique start marker, runs the given command
// with stderr merged into stdout, remembers the exit status, echoes a unique
// end marker and exits with that status. Output between the two markers is
// the command's output.

use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};

const START_PREFIX: &str = "__SHELLPOOL_START_";
const END_PREFIX: &str = "__SHELLPOOL_END_";
const MARKER_SUFFIX: &str = "__";

/// Disambiguates markers generated within the same millisecond
static MARKER_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Start/end sentinel pair for one command invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Markers {
    start: String,
    end: String,
}

impl Markers {
    /// Generate a fresh pair from the current timestamp.
    pub fn generate() -> Self {
        let stamp = Utc::now().timestamp_millis();
        let sequence = MARKER_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        Self::from_token(&format!("{stamp}_{sequence}"))
    }

    /// Build a pair around a caller-chosen token.
    pub fn from_token(token: &str) -> Self {
        Self {
            start: format!("{START_PREFIX}{token}{MARKER_SUFFIX}"),
            end: format!("{END_PREFIX}{token}{MARKER_SUFFIX}"),
        }
    }

    pub fn start(&self) -> &str {
        &self.start
    }

    pub fn end(&self) -> &str {
        &self.end
    }

    /// Wrap `command` in the marker protocol.
    pub fn wrap(&self, command: &str) -> String {
        format!(
            "echo \"{start}\";\n{{ {command}; }} 2>&1;\nEXIT_CODE=$?;\necho \"{end}\";\nexit $EXIT_CODE",
            start = self.start,
            end = self.end,
        )
    }
}

/// A wrapped command taken apart again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrappedCommand {
    pub markers: Markers,
    pub command: String,
}

impl WrappedCommand {
    /// Recover markers and the wrapped command from text produced by
    /// [`Markers::wrap`]. Returns `None` for anything else.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim_end_matches(['\r', '\n']);
        let lines: Vec<&str> = text.split('\n').collect();
        if lines.len() < 5 {
            return None;
        }

        let start = lines[0].strip_prefix("echo \"")?.strip_suffix("\";")?;
        let tail = &lines[lines.len() - 3..];
        if tail[0] != "EXIT_CODE=$?;" || tail[2] != "exit $EXIT_CODE" {
            return None;
        }
        let end = tail[1].strip_prefix("echo \"")?.strip_suffix("\";")?;

        let body = lines[1..lines.len() - 3].join("\n");
        let command = body.strip_prefix("{ ")?.strip_suffix("; } 2>&1;")?;

        Some(Self {
            markers: Markers {
                start: start.to_string(),
                end: end.to_string(),
            },
            command: command.to_string(),
        })
    }
}

/// Find the first occurrence of `marker` that is real shell output.
///
/// Shells that echo their input print `echo "<marker>"`; an occurrence
/// directly preceded by a double quote is that echo and is skipped.
pub fn find_marker(haystack: &str, marker: &str) -> Option<usize> {
    haystack
        .match_indices(marker)
        .map(|(idx, _)| idx)
        .find(|&idx| !haystack[..idx].ends_with('"'))
}

/// Length of the longest suffix of `text` that is a proper prefix of `marker`.
///
/// Used to hold back text that may still turn into a marker once the next
/// chunk arrives.
pub fn partial_marker_len(text: &str, marker: &str) -> usize {
    let max = marker.len().saturating_sub(1).min(text.len());
    (1..=max)
        .rev()
        .find(|&len| {
            text.is_char_boundary(text.len() - len) && marker.starts_with(&text[text.len() - len..])
        })
        .unwrap_or(0)
}
