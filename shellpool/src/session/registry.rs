// Session registry - process-wide table of shell sessions keyed by id
//
// The pool never reaches for a global; it is handed a `SessionRegistry` and
// asks it to create, look up and enumerate sessions.

use crate::session::lock;
use crate::session::protocol::{SessionId, SessionSummary};
use crate::session::terminal::Terminal;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tracing::info;

/// A reusable shell bound to a working directory
pub struct Session {
    id: SessionId,
    terminal: Arc<dyn Terminal>,
    busy: AtomicBool,
    last_command: StdMutex<String>,
}

impl Session {
    pub fn new(id: SessionId, terminal: Arc<dyn Terminal>) -> Self {
        Self {
            id,
            terminal,
            busy: AtomicBool::new(false),
            last_command: StdMutex::new(String::new()),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn terminal(&self) -> &Arc<dyn Terminal> {
        &self.terminal
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Claim the session for a command. Returns false if it was already busy.
    pub fn try_mark_busy(&self) -> bool {
        self.busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn mark_idle(&self) {
        self.busy.store(false, Ordering::SeqCst);
    }

    pub fn last_command(&self) -> String {
        lock(&self.last_command).clone()
    }

    pub fn set_last_command(&self, command: &str) {
        *lock(&self.last_command) = command.to_string();
    }

    /// Working directory reported by the terminal, if any
    pub fn working_directory(&self) -> Option<PathBuf> {
        self.terminal.working_directory()
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id,
            last_command: self.last_command(),
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("busy", &self.is_busy())
            .field("last_command", &self.last_command())
            .field("working_directory", &self.working_directory())
            .finish()
    }
}

/// Process-wide table of sessions
#[async_trait]
pub trait SessionRegistry: Send + Sync {
    /// Provision a new session bound to `working_directory`
    async fn create_session(&self, working_directory: &Path) -> Result<Arc<Session>>;

    fn get_session(&self, id: SessionId) -> Option<Arc<Session>>;

    /// All sessions, in a stable order
    fn list_sessions(&self) -> Vec<Arc<Session>>;
}

/// Spawns the terminal behind a new session
pub trait TerminalFactory: Send + Sync {
    fn spawn(&self, id: SessionId, working_directory: &Path) -> Result<Arc<dyn Terminal>>;
}

impl<F> TerminalFactory for F
where
    F: Fn(SessionId, &Path) -> Result<Arc<dyn Terminal>> + Send + Sync,
{
    fn spawn(&self, id: SessionId, working_directory: &Path) -> Result<Arc<dyn Terminal>> {
        self(id, working_directory)
    }
}

/// In-process registry allocating sequential ids, listing in id order
pub struct LocalRegistry<F> {
    factory: F,
    next_id: AtomicU64,
    sessions: StdMutex<BTreeMap<SessionId, Arc<Session>>>,
}

impl<F: TerminalFactory> LocalRegistry<F> {
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            next_id: AtomicU64::new(1),
            sessions: StdMutex::new(BTreeMap::new()),
        }
    }

    /// Allocate a new session ID
    fn allocate_id(&self) -> SessionId {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Insert an externally built session
    pub fn insert(&self, session: Arc<Session>) {
        lock(&self.sessions).insert(session.id(), session);
    }

    pub fn len(&self) -> usize {
        lock(&self.sessions).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl<F: TerminalFactory> SessionRegistry for LocalRegistry<F> {
    async fn create_session(&self, working_directory: &Path) -> Result<Arc<Session>> {
        let id = self.allocate_id();
        let terminal = self.factory.spawn(id, working_directory).with_context(|| {
            format!(
                "Failed to spawn terminal for session {} in {}",
                id,
                working_directory.display()
            )
        })?;

        let session = Arc::new(Session::new(id, terminal));
        self.insert(Arc::clone(&session));
        info!(session_id = id, dir = %working_directory.display(), "created session");
        Ok(session)
    }

    fn get_session(&self, id: SessionId) -> Option<Arc<Session>> {
        lock(&self.sessions).get(&id).cloned()
    }

    fn list_sessions(&self) -> Vec<Arc<Session>> {
        lock(&self.sessions).values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::terminal::{MemoryTerminal, MemoryTerminalFactory};

    #[tokio::test]
    async fn creates_sessions_with_sequential_ids() {
        let registry = LocalRegistry::new(MemoryTerminalFactory::new());
        let first = registry.create_session(Path::new("/a")).await.unwrap();
        let second = registry.create_session(Path::new("/b")).await.unwrap();

        assert_eq!(first.id(), 1);
        assert_eq!(second.id(), 2);
        assert_eq!(second.working_directory(), Some(PathBuf::from("/b")));

        let ids: Vec<_> = registry.list_sessions().iter().map(|s| s.id()).collect();
        assert_eq!(ids, vec![1, 2]);
        assert!(registry.get_session(2).is_some());
        assert!(registry.get_session(3).is_none());
    }

    #[tokio::test]
    async fn spawn_failure_leaves_no_session() {
        let registry = LocalRegistry::new(MemoryTerminalFactory::failing("no pty available"));
        let err = registry
            .create_session(Path::new("/a"))
            .await
            .expect_err("spawn should fail");

        assert!(format!("{err:#}").contains("no pty available"));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn closures_work_as_factories() {
        let registry = LocalRegistry::new(
            |_id: SessionId, dir: &Path| -> Result<Arc<dyn Terminal>> {
                Ok(Arc::new(MemoryTerminal::with_working_directory(dir)))
            },
        );
        let session = registry.create_session(Path::new("/tmp")).await.unwrap();
        assert_eq!(session.working_directory(), Some(PathBuf::from("/tmp")));
    }

    #[test]
    fn busy_flag_is_exclusive() {
        let session = Session::new(1, Arc::new(MemoryTerminal::new()));
        assert!(session.try_mark_busy());
        assert!(!session.try_mark_busy());
        session.mark_idle();
        assert!(!session.is_busy());
    }
}
