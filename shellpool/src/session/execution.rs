//! Per-command execution state machine.
//!
//! A [`CommandExecution`] sends one wrapped command to a terminal and turns
//! the raw output stream back into lines:
//!
//! - output before the start marker is discarded,
//! - output between the markers is split into sanitized lines, appended to
//!   the full output record and, while someone is listening, emitted as
//!   [`ExecutionEvent::Line`],
//! - the end marker flushes the last partial line and settles the execution.
//!
//! Line boundaries never depend on how the terminal chunked its output.
//! Every processed line also refreshes the hot window picked by the
//! [`HotPolicy`].

use crate::session::activity::HotPolicy;
use crate::session::framing::{find_marker, partial_marker_len, Markers};
use crate::session::lock;
use crate::session::protocol::{ExecutionError, ExecutionEvent, ExecutionPhase, SessionId};
use crate::session::sanitize::{sanitize_lines, sanitize_output, AnsiStripper, Utf8Decoder};
use crate::session::terminal::{Terminal, TerminalEvent};
use std::fmt;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tracing::{debug, warn};

/// Natural outcome of an execution
pub type Outcome = Result<(), ExecutionError>;

/// One command running inside one session
pub struct CommandExecution {
    session_id: SessionId,
    command: String,
    markers: Markers,
    policy: HotPolicy,
    state: StdMutex<ExecutionState>,
    pump: StdMutex<Option<JoinHandle<()>>>,
}

struct ExecutionState {
    phase: ExecutionPhase,
    decoder: Utf8Decoder,
    stripper: AnsiStripper,
    /// Text not yet split into lines
    pending: String,
    full_output: String,
    last_retrieved_index: usize,
    last_activity: Option<Instant>,
    cooldown: Duration,
    listening: bool,
    /// Every event emitted so far, replayed to late subscribers
    history: Vec<ExecutionEvent>,
    subscribers: Vec<mpsc::UnboundedSender<ExecutionEvent>>,
    outcome_tx: Option<oneshot::Sender<Outcome>>,
}

impl ExecutionState {
    fn new(cooldown: Duration) -> Self {
        Self {
            phase: ExecutionPhase::Created,
            decoder: Utf8Decoder::new(),
            stripper: AnsiStripper::new(),
            pending: String::new(),
            full_output: String::new(),
            last_retrieved_index: 0,
            last_activity: None,
            cooldown,
            listening: true,
            history: Vec::new(),
            subscribers: Vec::new(),
            outcome_tx: None,
        }
    }

    /// Record `event` and hand it to live subscribers. Returns whether at
    /// least one of them received it.
    fn emit(&mut self, event: ExecutionEvent) -> bool {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        self.history.push(event);
        !self.subscribers.is_empty()
    }

    fn process_line(&mut self, raw: &str, policy: &HotPolicy) {
        let line = sanitize_output(raw);
        if line.is_empty() {
            return;
        }

        self.cooldown = policy.cooldown_for(&line);
        self.last_activity = Some(Instant::now());

        self.full_output.push_str(&line);
        self.full_output.push('\n');

        // A line a subscriber already received is not pending anymore
        if self.listening && self.emit(ExecutionEvent::Line(line)) {
            self.last_retrieved_index = self.full_output.len();
        }
    }

    fn process_lines(&mut self, text: &str, policy: &HotPolicy) {
        for raw in text.split('\n') {
            self.process_line(raw, policy);
        }
    }

    /// Feed raw bytes. Returns true once the end marker has been seen.
    fn feed(&mut self, bytes: &[u8], markers: &Markers, policy: &HotPolicy) -> bool {
        let decoded = self.decoder.push(bytes);
        let text = self.stripper.push(&decoded);
        self.ingest(&text, markers, policy)
    }

    fn ingest(&mut self, text: &str, markers: &Markers, policy: &HotPolicy) -> bool {
        match self.phase {
            ExecutionPhase::AwaitingStart => {
                self.pending.push_str(text);
                match find_marker(&self.pending, markers.start()) {
                    Some(idx) => {
                        let rest = self.pending.split_off(idx + markers.start().len());
                        self.pending.clear();
                        self.phase = ExecutionPhase::Capturing;
                        self.capture(&rest, markers, policy)
                    }
                    None => {
                        // Only the current line can still become the marker
                        if let Some(pos) = self.pending.rfind('\n') {
                            self.pending.drain(..=pos);
                        }
                        false
                    }
                }
            }
            ExecutionPhase::Capturing => self.capture(text, markers, policy),
            _ => false,
        }
    }

    fn capture(&mut self, text: &str, markers: &Markers, policy: &HotPolicy) -> bool {
        self.pending.push_str(text);

        if let Some(idx) = find_marker(&self.pending, markers.end()) {
            self.pending.truncate(idx);
            let remaining = std::mem::take(&mut self.pending);
            self.process_lines(&remaining, policy);
            return true;
        }

        if let Some(pos) = self.pending.rfind('\n') {
            let tail = self.pending.split_off(pos + 1);
            let complete = std::mem::replace(&mut self.pending, tail);
            self.process_lines(&complete, policy);
        }
        false
    }

    fn close_subscribers(&mut self) {
        self.subscribers.clear();
    }

    /// Move to a terminal phase exactly once
    fn settle(&mut self, phase: ExecutionPhase, outcome: Outcome) -> bool {
        if self.phase.is_terminal() {
            return false;
        }
        self.phase = phase;

        match &outcome {
            Ok(()) => {
                self.emit(ExecutionEvent::Completed);
                self.emit(ExecutionEvent::Continue);
            }
            Err(err) => {
                self.emit(ExecutionEvent::Error(err.clone()));
            }
        }
        self.listening = false;
        self.close_subscribers();

        if let Some(tx) = self.outcome_tx.take() {
            let _ = tx.send(outcome);
        }
        true
    }
}

impl CommandExecution {
    /// New execution with freshly generated markers
    pub fn new(session_id: SessionId, command: impl Into<String>, policy: HotPolicy) -> Arc<Self> {
        Self::with_markers(session_id, command, Markers::generate(), policy)
    }

    pub fn with_markers(
        session_id: SessionId,
        command: impl Into<String>,
        markers: Markers,
        policy: HotPolicy,
    ) -> Arc<Self> {
        let cooldown = policy.settled_cooldown();
        Arc::new(Self {
            session_id,
            command: command.into(),
            markers,
            policy,
            state: StdMutex::new(ExecutionState::new(cooldown)),
            pump: StdMutex::new(None),
        })
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn markers(&self) -> &Markers {
        &self.markers
    }

    /// Text actually typed into the shell
    pub fn wrapped_command(&self) -> String {
        self.markers.wrap(&self.command)
    }

    pub fn phase(&self) -> ExecutionPhase {
        lock(&self.state).phase
    }

    /// Whether line events are still delivered
    pub fn is_listening(&self) -> bool {
        lock(&self.state).listening
    }

    /// Send the wrapped command and start consuming terminal output.
    ///
    /// The returned receiver yields the natural outcome: `Ok(())` once the
    /// end marker is seen, or the error that stopped the execution. Timeouts
    /// are the caller's business, see [`CommandExecution::time_out`].
    pub fn run(self: &Arc<Self>, terminal: Arc<dyn Terminal>) -> Result<oneshot::Receiver<Outcome>, ExecutionError> {
        let (outcome_tx, outcome_rx) = oneshot::channel();
        {
            let mut state = lock(&self.state);
            if state.phase != ExecutionPhase::Created {
                return Err(ExecutionError::AlreadyStarted {
                    session_id: self.session_id,
                });
            }
            state.phase = ExecutionPhase::AwaitingStart;
            state.outcome_tx = Some(outcome_tx);
        }

        // Subscribe before sending so no output can slip past
        let events = terminal.subscribe();
        if let Err(err) = terminal.send_text(&self.wrapped_command(), true) {
            let error = ExecutionError::Session {
                session_id: self.session_id,
                message: format!("{err:#}"),
            };
            warn!(session_id = self.session_id, error = %error, "failed to send command");
            self.settle(ExecutionPhase::Failed, Err(error.clone()));
            return Err(error);
        }
        debug!(session_id = self.session_id, command = %self.command, "command sent");

        let execution = Arc::clone(self);
        let pump = tokio::spawn(async move { execution.pump(events).await });
        *lock(&self.pump) = Some(pump);

        Ok(outcome_rx)
    }

    async fn pump(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<TerminalEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                TerminalEvent::Data(bytes) => {
                    if self.push_output(&bytes) {
                        return;
                    }
                }
                TerminalEvent::Closed => {
                    if self.phase() == ExecutionPhase::AwaitingStart {
                        // A shell that exited after the previous command; the
                        // provider restarts it for ours
                        debug!(session_id = self.session_id, "ignoring close before start marker");
                        continue;
                    }
                    self.fail(ExecutionError::Session {
                        session_id: self.session_id,
                        message: "terminal closed before the command finished".to_string(),
                    });
                    return;
                }
            }
        }

        self.fail(ExecutionError::Session {
            session_id: self.session_id,
            message: "terminal output stream ended".to_string(),
        });
    }

    /// Feed raw terminal output. Returns true once the execution has settled.
    pub(crate) fn push_output(&self, bytes: &[u8]) -> bool {
        let mut state = lock(&self.state);
        if state.phase.is_terminal() {
            return true;
        }
        if state.feed(bytes, &self.markers, &self.policy) {
            debug!(session_id = self.session_id, command = %self.command, "end marker received");
            state.settle(ExecutionPhase::Completed, Ok(()));
        }
        state.phase.is_terminal()
    }

    fn settle(&self, phase: ExecutionPhase, outcome: Outcome) -> bool {
        lock(&self.state).settle(phase, outcome)
    }

    fn stop_pump(&self) {
        if let Some(pump) = lock(&self.pump).take() {
            pump.abort();
        }
    }

    /// Fail the execution with a session error
    pub(crate) fn fail(&self, error: ExecutionError) {
        if self.settle(ExecutionPhase::Failed, Err(error.clone())) {
            warn!(session_id = self.session_id, error = %error, "execution failed");
        }
        self.stop_pump();
    }

    /// Give up waiting for the end marker.
    ///
    /// Only the bookkeeping stops; the shell is not signalled and whatever it
    /// prints later is ignored.
    pub fn time_out(&self, timeout: Duration) -> ExecutionError {
        let error = ExecutionError::TimedOut {
            command: self.command.clone(),
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        };
        self.settle(ExecutionPhase::TimedOut, Err(error.clone()));
        self.stop_pump();
        error
    }

    /// Stream of events: everything emitted so far, then live events until
    /// the execution detaches or settles.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ExecutionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = lock(&self.state);
        for event in &state.history {
            let _ = tx.send(event.clone());
        }
        if state.listening {
            state.subscribers.push(tx);
        }
        rx
    }

    /// Stop delivering line events while output keeps accumulating.
    ///
    /// The in-flight partial line is flushed first so nothing typed so far is
    /// lost. A partial line that could still grow into the end marker is held
    /// back.
    pub fn detach(&self) {
        let mut state = lock(&self.state);
        if !state.listening {
            return;
        }

        if state.phase == ExecutionPhase::Capturing && !state.pending.is_empty() {
            let keep = partial_marker_len(&state.pending, self.markers.end());
            let split_at = state.pending.len() - keep;
            let held = state.pending.split_off(split_at);
            let partial = std::mem::replace(&mut state.pending, held);
            state.process_line(&partial, &self.policy);
        }

        state.listening = false;
        state.emit(ExecutionEvent::Continue);
        state.close_subscribers();
        debug!(session_id = self.session_id, "detached from line events");
    }

    /// Whether the command is probably still producing output.
    ///
    /// Decays on its own: true only while less than the current cooldown
    /// has elapsed since the last output line.
    pub fn is_hot(&self) -> bool {
        let state = lock(&self.state);
        state
            .last_activity
            .is_some_and(|at| at.elapsed() < state.cooldown)
    }

    /// Current hot window
    pub fn cooldown(&self) -> Duration {
        lock(&self.state).cooldown
    }

    /// Output not yet handed out, sanitized.
    ///
    /// Lines delivered to a live subscriber count as handed out, so this only
    /// returns what arrived while nobody was listening or after a detach.
    pub fn unretrieved_output(&self) -> String {
        let mut state = lock(&self.state);
        let start = state.last_retrieved_index;
        let output = sanitize_output(&state.full_output[start..]);
        state.last_retrieved_index = state.full_output.len();
        output
    }

    /// Everything captured so far, one line per `\n`
    pub fn full_output(&self) -> String {
        lock(&self.state).full_output.clone()
    }

    /// Captured lines with prompt residue removed
    pub fn output_lines(&self) -> Vec<String> {
        sanitize_lines(lock(&self.state).full_output.lines())
    }
}

impl fmt::Debug for CommandExecution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("CommandExecution")
            .field("session_id", &self.session_id)
            .field("command", &self.command)
            .field("phase", &state.phase)
            .field("listening", &state.listening)
            .field("output_bytes", &state.full_output.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::activity::{BUILDING_COOLDOWN, SETTLED_COOLDOWN};
    use crate::session::terminal::MemoryTerminal;

    fn execution(command: &str) -> Arc<CommandExecution> {
        CommandExecution::with_markers(1, command, Markers::from_token("t"), HotPolicy::default())
    }

    fn start(execution: &CommandExecution) {
        lock(&execution.state).phase = ExecutionPhase::AwaitingStart;
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ExecutionEvent>) -> Vec<ExecutionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn lines(events: &[ExecutionEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|event| match event {
                ExecutionEvent::Line(line) => Some(line.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn discards_output_before_start_marker() {
        let exec = execution("echo hi");
        start(&exec);
        let mut rx = exec.subscribe();

        exec.push_output(b"$ echo \"__SHELLPOOL_START_t__\";\r\nnoise\r\n");
        exec.push_output(b"__SHELLPOOL_START_t__\r\nhi\r\n");

        assert_eq!(exec.phase(), ExecutionPhase::Capturing);
        assert_eq!(lines(&drain(&mut rx)), vec!["hi"]);
        assert_eq!(exec.full_output(), "hi\n");
    }

    #[test]
    fn end_marker_flushes_partial_line_and_settles() {
        let exec = execution("printf done");
        start(&exec);
        let mut rx = exec.subscribe();

        let settled = exec.push_output(b"__SHELLPOOL_START_t__\r\nfirst\r\nlast");
        assert!(!settled);
        let settled = exec.push_output(b"__SHELLPOOL_END_t__\r\n");
        assert!(settled);

        assert_eq!(exec.phase(), ExecutionPhase::Completed);
        assert_eq!(
            drain(&mut rx),
            vec![
                ExecutionEvent::Line("first".into()),
                ExecutionEvent::Line("last".into()),
                ExecutionEvent::Completed,
                ExecutionEvent::Continue,
            ]
        );
        assert!(!exec.is_listening());
    }

    #[test]
    fn output_after_completion_is_ignored() {
        let exec = execution("true");
        start(&exec);
        exec.push_output(b"__SHELLPOOL_START_t__\n__SHELLPOOL_END_t__\n");
        assert!(exec.push_output(b"late output\n"));
        assert_eq!(exec.full_output(), "");
    }

    #[test]
    fn markers_in_one_chunk_with_output() {
        let exec = execution("echo a; echo b");
        start(&exec);
        exec.push_output(b"__SHELLPOOL_START_t__\na\nb\n__SHELLPOOL_END_t__\n");
        assert_eq!(exec.phase(), ExecutionPhase::Completed);
        assert_eq!(exec.output_lines(), vec!["a", "b"]);
    }

    #[test]
    fn ansi_sequences_are_stripped_before_matching() {
        let exec = execution("ls --color");
        start(&exec);
        exec.push_output(b"\x1b[1m__SHELLPOOL_START_t__\x1b[0m\r\n\x1b[34mdir\x1b[0m\r\n");
        exec.push_output(b"__SHELLPOOL_END_t__\r\n");
        assert_eq!(exec.phase(), ExecutionPhase::Completed);
        assert_eq!(exec.full_output(), "dir\n");
    }

    #[test]
    fn unretrieved_output_never_redelivers() {
        let exec = execution("cat log");
        start(&exec);
        exec.push_output(b"__SHELLPOOL_START_t__\none\ntwo\n");
        assert_eq!(exec.unretrieved_output(), "one\ntwo");
        assert_eq!(exec.unretrieved_output(), "");

        exec.push_output(b"three\n");
        assert_eq!(exec.unretrieved_output(), "three");
        assert_eq!(exec.unretrieved_output(), "");
    }

    #[test]
    fn lines_delivered_to_subscribers_are_not_pending() {
        let exec = execution("npm test");
        start(&exec);
        let mut rx = exec.subscribe();

        exec.push_output(b"__SHELLPOOL_START_t__\nrunning\npartial");
        assert_eq!(lines(&drain(&mut rx)), vec!["running"]);
        assert_eq!(exec.unretrieved_output(), "");

        // "partial" still reaches the subscriber on detach, "done" does not
        exec.detach();
        exec.push_output(b" done\n");
        assert_eq!(exec.unretrieved_output(), "done");
        assert_eq!(exec.unretrieved_output(), "");
    }

    #[test]
    fn output_read_before_anyone_subscribes_is_pending() {
        let exec = execution("echo hello");
        start(&exec);
        exec.push_output(b"__SHELLPOOL_START_t__\nhello\n");
        assert_eq!(exec.unretrieved_output(), "hello");

        let mut rx = exec.subscribe();
        assert_eq!(lines(&drain(&mut rx)), vec!["hello"]);
        exec.push_output(b"__SHELLPOOL_END_t__\n");
        assert_eq!(exec.unretrieved_output(), "");
    }

    #[test]
    fn dropped_subscribers_leave_lines_pending() {
        let exec = execution("make");
        start(&exec);
        drop(exec.subscribe());

        exec.push_output(b"__SHELLPOOL_START_t__\nbuilt\n");
        assert_eq!(exec.unretrieved_output(), "built");
    }

    #[test]
    fn detach_flushes_partial_line_and_stops_events() {
        let exec = execution("tail -f log");
        start(&exec);
        let mut rx = exec.subscribe();

        exec.push_output(b"__SHELLPOOL_START_t__\nline one\npartial");
        exec.detach();

        assert_eq!(exec.full_output(), "line one\npartial\n");
        assert!(!exec.is_listening());

        exec.push_output(b" more\n");
        assert_eq!(exec.full_output(), "line one\npartial\nmore\n");

        let events = drain(&mut rx);
        assert_eq!(
            events,
            vec![
                ExecutionEvent::Line("line one".into()),
                ExecutionEvent::Line("partial".into()),
                ExecutionEvent::Continue,
            ]
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn detach_holds_back_partial_end_marker() {
        let exec = execution("make");
        start(&exec);
        exec.push_output(b"__SHELLPOOL_START_t__\nbuilt__SHELLPOOL_E");
        exec.detach();
        assert_eq!(exec.full_output(), "built\n");

        exec.push_output(b"ND_t__\n");
        assert_eq!(exec.phase(), ExecutionPhase::Completed);
        assert_eq!(exec.full_output(), "built\n");
    }

    #[test]
    fn late_subscribers_get_history() {
        let exec = execution("echo hello");
        start(&exec);
        exec.push_output(b"__SHELLPOOL_START_t__\nhello\n__SHELLPOOL_END_t__\n");

        let mut rx = exec.subscribe();
        assert_eq!(
            drain(&mut rx),
            vec![
                ExecutionEvent::Line("hello".into()),
                ExecutionEvent::Completed,
                ExecutionEvent::Continue,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn hot_window_follows_activity() {
        let exec = execution("npm run build");
        start(&exec);
        assert!(!exec.is_hot());

        exec.push_output(b"__SHELLPOOL_START_t__\ncompiling module A\n");
        assert!(exec.is_hot());
        assert_eq!(exec.cooldown(), BUILDING_COOLDOWN);

        tokio::time::advance(Duration::from_millis(14_000)).await;
        assert!(exec.is_hot());

        exec.push_output(b"build complete\n");
        assert_eq!(exec.cooldown(), SETTLED_COOLDOWN);

        tokio::time::advance(Duration::from_millis(1_500)).await;
        assert!(exec.is_hot());
        tokio::time::advance(Duration::from_millis(600)).await;
        assert!(!exec.is_hot());
    }

    #[tokio::test]
    async fn run_streams_terminal_output() {
        let terminal = Arc::new(MemoryTerminal::new());
        terminal.respond_to_commands(|command| {
            assert_eq!(command, "echo hello");
            Some("hello\r\n".to_string())
        });

        let exec = execution("echo hello");
        let outcome = exec.run(terminal.clone()).expect("run should start");
        assert_eq!(outcome.await.unwrap(), Ok(()));

        let mut rx = exec.subscribe();
        assert_eq!(lines(&drain(&mut rx)), vec!["hello"]);
        assert_eq!(terminal.sent(), vec![format!("{}\n", exec.wrapped_command())]);
    }

    #[tokio::test]
    async fn output_queued_before_the_pump_runs_is_not_lost() {
        let terminal = Arc::new(MemoryTerminal::new());
        let exec = execution("seq 1 2000");
        let outcome = exec.run(terminal.clone()).expect("run should start");

        // Nothing has been consumed yet; every chunk sits in the queue
        terminal.emit("__SHELLPOOL_START_t__\r\n");
        for i in 1..=2000 {
            terminal.emit(&format!("{i}\n"));
        }
        terminal.emit("__SHELLPOOL_END_t__\r\n");

        assert_eq!(outcome.await.unwrap(), Ok(()));
        let captured = exec.output_lines();
        assert_eq!(captured.len(), 2000);
        assert_eq!(captured.first().map(String::as_str), Some("1"));
        assert_eq!(captured.last().map(String::as_str), Some("2000"));
    }

    #[tokio::test]
    async fn dropped_terminal_fails_execution() {
        let terminal = Arc::new(MemoryTerminal::new());
        let exec = execution("sleep 100");
        let outcome = exec.run(terminal.clone()).unwrap();
        drop(terminal);

        let result = outcome.await.unwrap();
        assert!(matches!(result, Err(ExecutionError::Session { .. })), "{result:?}");
    }

    #[tokio::test]
    async fn run_twice_is_rejected() {
        let terminal = Arc::new(MemoryTerminal::new());
        let exec = execution("true");
        let _outcome = exec.run(terminal.clone()).unwrap();
        assert_eq!(
            exec.run(terminal).unwrap_err(),
            ExecutionError::AlreadyStarted { session_id: 1 }
        );
    }

    #[tokio::test]
    async fn send_failure_fails_execution() {
        let terminal = Arc::new(MemoryTerminal::new());
        terminal.fail_sends("session closed");

        let exec = execution("ls");
        let err = exec.run(terminal).unwrap_err();
        assert_eq!(
            err,
            ExecutionError::Session {
                session_id: 1,
                message: "session closed".into()
            }
        );
        assert_eq!(exec.phase(), ExecutionPhase::Failed);
    }

    #[tokio::test]
    async fn terminal_close_while_capturing_is_an_error() {
        let terminal = Arc::new(MemoryTerminal::new());
        terminal.respond_to_commands(|_| None);

        let exec = execution("sleep 100");
        let outcome = exec.run(terminal.clone()).unwrap();
        terminal.emit("partial output\n");
        terminal.close();

        let result = outcome.await.unwrap();
        assert!(matches!(result, Err(ExecutionError::Session { .. })));
        assert_eq!(exec.full_output(), "partial output\n");
    }

    #[test]
    fn time_out_settles_with_error() {
        let exec = execution("sleep 100");
        start(&exec);
        let mut rx = exec.subscribe();

        let err = exec.time_out(Duration::from_secs(30));
        assert_eq!(
            err,
            ExecutionError::TimedOut {
                command: "sleep 100".into(),
                timeout_ms: 30_000
            }
        );
        assert_eq!(exec.phase(), ExecutionPhase::TimedOut);
        assert_eq!(drain(&mut rx), vec![ExecutionEvent::Error(err)]);
        assert!(exec.push_output(b"__SHELLPOOL_START_t__\nlate\n"));
    }
}
