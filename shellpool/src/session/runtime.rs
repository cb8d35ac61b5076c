// PTY-backed terminal provider
//
// Wraps portable-pty to give a session a real shell:
// - Spawning the shell in the session's directory
// - Fanning raw output out to subscribers
// - Writing input from a dedicated thread
// - Respawning the shell after a framed command made it exit

use crate::session::config::PoolConfig;
use crate::session::framing::WrappedCommand;
use crate::session::lock;
use crate::session::protocol::SessionId;
use crate::session::registry::TerminalFactory;
use crate::session::terminal::{EventFanout, Terminal, TerminalEvent};
use anyhow::{bail, Context, Result};
use portable_pty::{native_pty_system, CommandBuilder, MasterPty, PtySize};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Typed into every fresh shell before anything else: no echo, no prompts
pub const DEFAULT_INIT: &str = "stty -echo 2>/dev/null; PS1=''; PS2=''";

/// How shells are spawned
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtyOptions {
    pub shell: Vec<String>,
    pub cols: u16,
    pub rows: u16,
    /// Line typed into each fresh shell, if any
    pub init: Option<String>,
}

impl PtyOptions {
    pub fn from_config(config: &PoolConfig) -> Self {
        Self {
            shell: config.shell.clone(),
            cols: config.pty_cols,
            rows: config.pty_rows,
            init: Some(DEFAULT_INIT.to_string()),
        }
    }
}

impl Default for PtyOptions {
    fn default() -> Self {
        Self::from_config(&PoolConfig::default())
    }
}

/// One shell process and the threads servicing it
struct PtyProcess {
    input_tx: mpsc::UnboundedSender<Vec<u8>>,
    /// Held so the PTY stays open while the shell runs
    _master: Box<dyn MasterPty + Send>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    alive: Arc<AtomicBool>,
    child_pid: Option<u32>,
    /// A framed command was typed; the shell exits once it finishes
    framed: bool,
}

impl PtyProcess {
    fn spawn(
        session_id: SessionId,
        directory: &Path,
        options: &PtyOptions,
        generation: u64,
        current: Arc<AtomicU64>,
        events: EventFanout,
    ) -> Result<Self> {
        let pty_system = native_pty_system();

        let pair = pty_system
            .openpty(PtySize {
                rows: options.rows,
                cols: options.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .context("Failed to open PTY")?;

        let portable_pty::PtyPair { master, slave } = pair;

        let mut cmd = build_shell_command(&options.shell);
        cmd.cwd(directory);
        cmd.env("TERM", "dumb");
        cmd.env("SHELLPOOL_SESSION_ID", session_id.to_string());

        let mut child = slave
            .spawn_command(cmd)
            .context("Failed to spawn shell process")?;
        drop(slave);

        let child_pid = child.process_id();

        let reader = match master.try_clone_reader() {
            Ok(reader) => reader,
            Err(err) => {
                let _ = child.kill();
                return Err(err).context("Failed to clone PTY reader");
            }
        };
        let writer = match master.take_writer() {
            Ok(writer) => writer,
            Err(err) => {
                let _ = child.kill();
                return Err(err).context("Failed to take PTY writer");
            }
        };

        let (input_tx, input_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let alive = Arc::new(AtomicBool::new(true));

        spawn_reader_thread(
            session_id,
            reader,
            generation,
            current,
            events,
            Arc::clone(&alive),
        );
        spawn_writer_thread(writer, input_rx, Arc::clone(&alive));
        spawn_wait_thread(session_id, child, shutdown_rx, Arc::clone(&alive));

        let process = Self {
            input_tx,
            _master: master,
            shutdown_tx: Some(shutdown_tx),
            alive,
            child_pid,
            framed: false,
        };
        if let Some(init) = &options.init {
            process.write(format!("{init}\n").into_bytes())?;
        }

        debug!(session_id, generation, pid = ?child_pid, dir = %directory.display(), "spawned shell");
        Ok(process)
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn write(&self, data: Vec<u8>) -> Result<()> {
        self.input_tx
            .send(data)
            .map_err(|_| anyhow::anyhow!("PTY writer has shut down"))
    }

    fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for PtyProcess {
    fn drop(&mut self) {
        self.stop();
    }
}

#[derive(Default)]
struct Processes {
    current: Option<PtyProcess>,
    /// Replaced shells that are still running; kept until they exit
    retired: Vec<PtyProcess>,
}

/// Terminal backed by a shell in a PTY, bound to one directory
pub struct PtyTerminal {
    session_id: SessionId,
    directory: PathBuf,
    options: PtyOptions,
    events: EventFanout,
    generation: Arc<AtomicU64>,
    processes: StdMutex<Processes>,
}

impl PtyTerminal {
    /// Spawn a shell for `session_id` in `directory`
    pub fn spawn(session_id: SessionId, directory: &Path, options: PtyOptions) -> Result<Self> {
        let terminal = Self {
            session_id,
            directory: directory.to_path_buf(),
            options,
            events: EventFanout::new(),
            generation: Arc::new(AtomicU64::new(0)),
            processes: StdMutex::new(Processes::default()),
        };
        {
            let mut processes = lock(&terminal.processes);
            terminal.respawn(&mut processes)?;
        }
        Ok(terminal)
    }

    /// Whether the current shell is running
    pub fn is_alive(&self) -> bool {
        lock(&self.processes)
            .current
            .as_ref()
            .is_some_and(PtyProcess::is_alive)
    }

    pub fn pid(&self) -> Option<u32> {
        lock(&self.processes)
            .current
            .as_ref()
            .and_then(|process| process.child_pid)
    }

    fn respawn(&self, processes: &mut Processes) -> Result<()> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let process = PtyProcess::spawn(
            self.session_id,
            &self.directory,
            &self.options,
            generation,
            Arc::clone(&self.generation),
            self.events.clone(),
        )?;

        if let Some(previous) = processes.current.replace(process) {
            if previous.is_alive() {
                processes.retired.push(previous);
            }
        }
        processes.retired.retain(PtyProcess::is_alive);
        Ok(())
    }
}

impl Terminal for PtyTerminal {
    fn subscribe(&self) -> mpsc::UnboundedReceiver<TerminalEvent> {
        self.events.subscribe()
    }

    fn send_text(&self, text: &str, append_newline: bool) -> Result<()> {
        let mut processes = lock(&self.processes);

        let needs_shell = match processes.current.as_ref() {
            Some(process) => !process.is_alive() || process.framed,
            None => true,
        };
        if needs_shell {
            self.respawn(&mut processes)
                .with_context(|| format!("Failed to restart shell for session {}", self.session_id))?;
        }

        let Some(process) = processes.current.as_mut() else {
            bail!("session {} has no shell", self.session_id);
        };

        let mut data = text.as_bytes().to_vec();
        if append_newline {
            data.push(b'\n');
        }
        process.write(data).context("Failed to send input to PTY")?;

        if WrappedCommand::parse(text).is_some() {
            process.framed = true;
        }
        Ok(())
    }

    fn working_directory(&self) -> Option<PathBuf> {
        #[cfg(target_os = "linux")]
        {
            if let Some(pid) = self.pid().filter(|_| self.is_alive()) {
                if let Ok(cwd) = std::fs::read_link(format!("/proc/{pid}/cwd")) {
                    return Some(cwd);
                }
            }
        }
        Some(self.directory.clone())
    }
}

impl std::fmt::Debug for PtyTerminal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtyTerminal")
            .field("session_id", &self.session_id)
            .field("directory", &self.directory)
            .field("generation", &self.generation.load(Ordering::SeqCst))
            .finish()
    }
}

/// Spawns a [`PtyTerminal`] per session
#[derive(Debug, Clone, Default)]
pub struct PtyTerminalFactory {
    options: PtyOptions,
}

impl PtyTerminalFactory {
    pub fn new(options: PtyOptions) -> Self {
        Self { options }
    }

    pub fn from_config(config: &PoolConfig) -> Self {
        Self::new(PtyOptions::from_config(config))
    }
}

impl TerminalFactory for PtyTerminalFactory {
    fn spawn(&self, id: SessionId, working_directory: &Path) -> Result<Arc<dyn Terminal>> {
        if !working_directory.is_dir() {
            bail!("{} is not a directory", working_directory.display());
        }
        let terminal = PtyTerminal::spawn(id, working_directory, self.options.clone())?;
        Ok(Arc::new(terminal) as Arc<dyn Terminal>)
    }
}

/// Read PTY output until EOF
///
/// Only the current generation is forwarded, so a replaced shell that is
/// still winding down cannot leak into the next command's stream.
fn spawn_reader_thread(
    session_id: SessionId,
    mut reader: Box<dyn Read + Send>,
    generation: u64,
    current: Arc<AtomicU64>,
    events: EventFanout,
    alive: Arc<AtomicBool>,
) {
    std::thread::spawn(move || {
        let mut buf = [0u8; 4096];
        let is_current = || current.load(Ordering::SeqCst) == generation;

        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if is_current() {
                        // Dropped when nobody listens, like output on a real tty
                        events.send(TerminalEvent::Data(buf[..n].to_vec()));
                    }
                }
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    // EIO is how Linux reports the slave side closing
                    debug!(session_id, generation, error = %err, "PTY read ended");
                    break;
                }
            }
        }

        alive.store(false, Ordering::SeqCst);
        if is_current() {
            events.send(TerminalEvent::Closed);
        }
    });
}

fn spawn_writer_thread(
    mut writer: Box<dyn Write + Send>,
    mut input_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    alive: Arc<AtomicBool>,
) {
    std::thread::spawn(move || {
        while let Some(data) = input_rx.blocking_recv() {
            if !alive.load(Ordering::SeqCst) {
                break;
            }
            if writer.write_all(&data).is_err() {
                break;
            }
            let _ = writer.flush();
        }
    });
}

/// Wait for the child to exit or for a shutdown request
fn spawn_wait_thread(
    session_id: SessionId,
    mut child: Box<dyn portable_pty::Child + Send>,
    mut shutdown_rx: oneshot::Receiver<()>,
    alive: Arc<AtomicBool>,
) {
    std::thread::spawn(move || loop {
        match shutdown_rx.try_recv() {
            Ok(()) | Err(oneshot::error::TryRecvError::Closed) => {
                if alive.load(Ordering::SeqCst) {
                    let _ = child.kill();
                }
                let _ = child.wait();
                alive.store(false, Ordering::SeqCst);
                break;
            }
            Err(oneshot::error::TryRecvError::Empty) => {}
        }

        match child.try_wait() {
            Ok(Some(status)) => {
                debug!(session_id, exit_code = status.exit_code(), "shell exited");
                alive.store(false, Ordering::SeqCst);
                break;
            }
            Ok(None) => std::thread::sleep(Duration::from_millis(50)),
            Err(err) => {
                warn!(session_id, error = %err, "error waiting for shell");
                alive.store(false, Ordering::SeqCst);
                break;
            }
        }
    });
}

/// Build a CommandBuilder from shell arguments or /bin/sh
fn build_shell_command(shell: &[String]) -> CommandBuilder {
    match shell.split_first() {
        Some((program, args)) => {
            let mut cmd = CommandBuilder::new(program);
            for arg in args {
                cmd.arg(arg);
            }
            cmd
        }
        None => CommandBuilder::new("/bin/sh"),
    }
}
