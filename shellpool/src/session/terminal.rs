//! Terminal provider abstraction.
//!
//! A terminal owns a shell process. The core only needs three things from
//! it: a raw output stream, a way to type text, and optionally the shell's
//! current working directory. [`MemoryTerminal`] is an in-process provider
//! for tests and embedding; `runtime::PtyTerminal` drives a real shell.

use crate::session::framing::WrappedCommand;
use crate::session::lock;
use crate::session::protocol::SessionId;
use crate::session::registry::TerminalFactory;
use anyhow::{anyhow, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::mpsc;

/// Raw events produced by a terminal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalEvent {
    /// Unframed output bytes; may split characters and escape sequences
    Data(Vec<u8>),
    /// The shell behind the terminal went away
    Closed,
}

/// Fans terminal events out to every subscriber.
///
/// Each subscriber gets its own unbounded channel, so a slow reader never
/// loses output. Clones share the subscriber list.
#[derive(Clone, Default)]
pub struct EventFanout {
    subscribers: Arc<StdMutex<Vec<mpsc::UnboundedSender<TerminalEvent>>>>,
}

impl EventFanout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<TerminalEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.subscribers).push(tx);
        rx
    }

    /// Deliver `event` to every live subscriber, dropping the ones that hung up
    pub fn send(&self, event: TerminalEvent) {
        lock(&self.subscribers).retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn receiver_count(&self) -> usize {
        let mut subscribers = lock(&self.subscribers);
        subscribers.retain(|tx| !tx.is_closed());
        subscribers.len()
    }
}

impl fmt::Debug for EventFanout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventFanout")
            .field("subscribers", &lock(&self.subscribers).len())
            .finish()
    }
}

/// A shell the core can type into and listen to
pub trait Terminal: Send + Sync {
    /// Subscribe to raw output. Only events sent after subscribing are seen,
    /// and none of them are ever dropped.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<TerminalEvent>;

    /// Type `text` into the shell, optionally followed by a newline.
    fn send_text(&self, text: &str, append_newline: bool) -> Result<()>;

    /// The shell's current working directory, when the provider knows it
    fn working_directory(&self) -> Option<PathBuf> {
        None
    }
}

type Responder = Box<dyn Fn(&str) -> Vec<Vec<u8>> + Send + Sync>;

/// In-process terminal.
///
/// Records everything sent to it and emits whatever the caller pushes. A
/// responder can answer sent text synchronously, which is enough to play the
/// part of a shell for wrapped commands.
pub struct MemoryTerminal {
    events: EventFanout,
    sent: StdMutex<Vec<String>>,
    working_directory: StdMutex<Option<PathBuf>>,
    send_error: StdMutex<Option<String>>,
    responder: StdMutex<Option<Responder>>,
}

impl MemoryTerminal {
    pub fn new() -> Self {
        Self {
            events: EventFanout::new(),
            sent: StdMutex::new(Vec::new()),
            working_directory: StdMutex::new(None),
            send_error: StdMutex::new(None),
            responder: StdMutex::new(None),
        }
    }

    /// A terminal that reports `dir` as its working directory
    pub fn with_working_directory(dir: impl Into<PathBuf>) -> Self {
        let terminal = Self::new();
        terminal.set_working_directory(Some(dir.into()));
        terminal
    }

    pub fn set_working_directory(&self, dir: Option<PathBuf>) {
        *lock(&self.working_directory) = dir;
    }

    /// Emit text as terminal output
    pub fn emit(&self, text: &str) {
        self.emit_bytes(text.as_bytes());
    }

    /// Emit raw bytes as terminal output
    pub fn emit_bytes(&self, bytes: &[u8]) {
        // No subscribers is fine, output is simply lost like on a real tty
        self.events.send(TerminalEvent::Data(bytes.to_vec()));
    }

    /// Signal that the shell went away
    pub fn close(&self) {
        self.events.send(TerminalEvent::Closed);
    }

    /// Make every following `send_text` fail with `message`
    pub fn fail_sends(&self, message: impl Into<String>) {
        *lock(&self.send_error) = Some(message.into());
    }

    /// Answer each sent text with the returned chunks
    pub fn respond_with<F>(&self, responder: F)
    where
        F: Fn(&str) -> Vec<Vec<u8>> + Send + Sync + 'static,
    {
        *lock(&self.responder) = Some(Box::new(responder));
    }

    /// Play a shell: answer wrapped commands with the start marker, the
    /// output returned by `run` and the end marker.
    ///
    /// When `run` returns `None` only the start marker is printed, as if the
    /// command never finished.
    pub fn respond_to_commands<F>(&self, run: F)
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.respond_with(move |text| {
            let Some(wrapped) = WrappedCommand::parse(text) else {
                return Vec::new();
            };
            let mut chunks = vec![format!("{}\r\n", wrapped.markers.start()).into_bytes()];
            if let Some(output) = run(&wrapped.command) {
                if !output.is_empty() {
                    chunks.push(output.into_bytes());
                }
                chunks.push(format!("{}\r\n", wrapped.markers.end()).into_bytes());
            }
            chunks
        });
    }

    /// Everything sent so far, newline included when requested
    pub fn sent(&self) -> Vec<String> {
        lock(&self.sent).clone()
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }
}

impl Default for MemoryTerminal {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemoryTerminal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryTerminal")
            .field("working_directory", &*lock(&self.working_directory))
            .field("sent", &lock(&self.sent).len())
            .finish()
    }
}

impl Terminal for MemoryTerminal {
    fn subscribe(&self) -> mpsc::UnboundedReceiver<TerminalEvent> {
        self.events.subscribe()
    }

    fn send_text(&self, text: &str, append_newline: bool) -> Result<()> {
        if let Some(message) = lock(&self.send_error).as_ref() {
            return Err(anyhow!("{}", message));
        }

        let mut line = text.to_string();
        if append_newline {
            line.push('\n');
        }
        lock(&self.sent).push(line);

        let replies = match lock(&self.responder).as_ref() {
            Some(responder) => responder(text),
            None => Vec::new(),
        };
        for chunk in replies {
            self.emit_bytes(&chunk);
        }
        Ok(())
    }

    fn working_directory(&self) -> Option<PathBuf> {
        lock(&self.working_directory).clone()
    }
}

type CommandRunner = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Creates [`MemoryTerminal`]s bound to the requested directory and keeps a
/// handle to each one so tests can drive them.
#[derive(Clone, Default)]
pub struct MemoryTerminalFactory {
    terminals: Arc<StdMutex<Vec<(SessionId, Arc<MemoryTerminal>)>>>,
    runner: Option<CommandRunner>,
    fail_with: Option<String>,
}

impl MemoryTerminalFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every created terminal answers wrapped commands through `run`
    pub fn with_command_runner<F>(run: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            runner: Some(Arc::new(run)),
            ..Self::default()
        }
    }

    /// Every spawn attempt fails with `message`
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            fail_with: Some(message.into()),
            ..Self::default()
        }
    }

    /// Terminal created for session `id`
    pub fn terminal(&self, id: SessionId) -> Option<Arc<MemoryTerminal>> {
        lock(&self.terminals)
            .iter()
            .find(|(session_id, _)| *session_id == id)
            .map(|(_, terminal)| Arc::clone(terminal))
    }

    pub fn spawned(&self) -> usize {
        lock(&self.terminals).len()
    }
}

impl TerminalFactory for MemoryTerminalFactory {
    fn spawn(&self, id: SessionId, working_directory: &Path) -> Result<Arc<dyn Terminal>> {
        if let Some(message) = &self.fail_with {
            return Err(anyhow!("{}", message));
        }

        let terminal = Arc::new(MemoryTerminal::with_working_directory(working_directory));
        if let Some(runner) = &self.runner {
            let runner = Arc::clone(runner);
            terminal.respond_to_commands(move |command| runner(command));
        }
        lock(&self.terminals).push((id, Arc::clone(&terminal)));
        Ok(terminal as Arc<dyn Terminal>)
    }
}
