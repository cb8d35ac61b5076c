//! Session pool.
//!
//! Maps working directories to reusable sessions, keeps a session busy while
//! one command runs in it and races every command against the configured
//! timeout. [`SessionPool::submit_command`] starts the command right away and
//! returns an [`ExecutionHandle`] that can be streamed and awaited.

use crate::session::activity::{HotPolicy, KeywordClassifier};
use crate::session::config::PoolConfig;
use crate::session::execution::CommandExecution;
use crate::session::handle::ExecutionHandle;
use crate::session::lock;
use crate::session::protocol::{ExecutionError, SessionId, SessionSummary};
use crate::session::registry::{Session, SessionRegistry};
use crate::session::sanitize::sanitize_user_input;
use anyhow::{Context, Result};
use std::collections::{BTreeSet, HashMap};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Hands out sessions and runs commands in them
#[derive(Clone)]
pub struct SessionPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    registry: Arc<dyn SessionRegistry>,
    config: PoolConfig,
    policy: HotPolicy,
    state: StdMutex<PoolState>,
}

#[derive(Default)]
struct PoolState {
    /// Sessions this pool acquired; scopes the query methods
    owned: BTreeSet<SessionId>,
    /// Executions that have not settled yet
    running: HashMap<SessionId, Arc<CommandExecution>>,
    /// Most recent execution per session, kept after it settles
    recorded: HashMap<SessionId, Arc<CommandExecution>>,
}

impl PoolInner {
    /// Mark the session idle and forget its running entry
    fn release(&self, session: &Session, execution: &Arc<CommandExecution>) {
        {
            let mut state = lock(&self.state);
            let is_current = state
                .running
                .get(&session.id())
                .is_some_and(|running| Arc::ptr_eq(running, execution));
            if is_current {
                state.running.remove(&session.id());
            }
        }
        session.mark_idle();
        debug!(session_id = session.id(), "session released");
    }
}

impl SessionPool {
    pub fn new(registry: Arc<dyn SessionRegistry>) -> Self {
        Self::with_config(registry, PoolConfig::default())
    }

    /// Pool using the default keyword classifier with the configured cooldowns
    pub fn with_config(registry: Arc<dyn SessionRegistry>, config: PoolConfig) -> Self {
        let policy = HotPolicy::new(
            Arc::new(KeywordClassifier::default()),
            config.building_cooldown,
            config.settled_cooldown,
        );
        Self::with_parts(registry, config, policy)
    }

    pub fn with_parts(registry: Arc<dyn SessionRegistry>, config: PoolConfig, policy: HotPolicy) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                registry,
                config,
                policy,
                state: StdMutex::new(PoolState::default()),
            }),
        }
    }

    /// Pool over real shells in PTYs
    #[cfg(unix)]
    pub fn with_pty(config: PoolConfig) -> Self {
        use crate::session::registry::LocalRegistry;
        use crate::session::runtime::PtyTerminalFactory;

        let registry = LocalRegistry::new(PtyTerminalFactory::from_config(&config));
        Self::with_config(Arc::new(registry), config)
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub fn policy(&self) -> &HotPolicy {
        &self.inner.policy
    }

    pub fn registry(&self) -> &Arc<dyn SessionRegistry> {
        &self.inner.registry
    }

    /// An idle session reporting `working_directory`, or a new one bound to it
    pub async fn acquire_session(&self, working_directory: &Path) -> Result<Arc<Session>> {
        let wanted = normalize_path(working_directory);

        let reused = self.inner.registry.list_sessions().into_iter().find(|session| {
            !session.is_busy()
                && session
                    .working_directory()
                    .is_some_and(|dir| normalize_path(&dir) == wanted)
        });

        let session = match reused {
            Some(session) => {
                debug!(session_id = session.id(), dir = %working_directory.display(), "reusing idle session");
                session
            }
            None => self
                .inner
                .registry
                .create_session(working_directory)
                .await
                .with_context(|| format!("Failed to create session for {}", working_directory.display()))?,
        };

        lock(&self.inner.state).owned.insert(session.id());
        Ok(session)
    }

    /// Owned sessions whose busy flag equals `busy`, in id order
    pub fn list_sessions(&self, busy: bool) -> Vec<SessionSummary> {
        let owned: Vec<SessionId> = lock(&self.inner.state).owned.iter().copied().collect();
        owned
            .into_iter()
            .filter_map(|id| self.inner.registry.get_session(id))
            .filter(|session| session.is_busy() == busy)
            .map(|session| session.summary())
            .collect()
    }

    /// Output of the session's latest command not yet handed out
    pub fn pending_output(&self, id: SessionId) -> String {
        let execution = {
            let state = lock(&self.inner.state);
            if !state.owned.contains(&id) {
                return String::new();
            }
            state.recorded.get(&id).cloned()
        };
        execution
            .map(|execution| execution.unretrieved_output())
            .unwrap_or_default()
    }

    /// Whether the session's latest command is probably still producing output
    pub fn is_hot(&self, id: SessionId) -> bool {
        self.execution(id).is_some_and(|execution| execution.is_hot())
    }

    /// Latest execution recorded for a session
    pub fn execution(&self, id: SessionId) -> Option<Arc<CommandExecution>> {
        lock(&self.inner.state).recorded.get(&id).cloned()
    }

    /// Executions that have not settled yet, by session id
    pub fn running_executions(&self) -> Vec<Arc<CommandExecution>> {
        let state = lock(&self.inner.state);
        let mut running: Vec<_> = state.running.values().cloned().collect();
        running.sort_by_key(|execution| execution.session_id());
        running
    }

    /// Run `command` in `session`.
    ///
    /// The command is sent before this returns. The handle settles with
    /// `Ok(())` once the command finishes, or with an error when the session
    /// fails, is busy, or the command outlives the configured timeout. The
    /// session is idle again by the time the handle settles.
    pub fn submit_command(&self, session: &Arc<Session>, command: &str) -> ExecutionHandle {
        let command = sanitize_user_input(command);
        let execution = CommandExecution::new(session.id(), command.as_str(), self.inner.policy.clone());

        if !session.try_mark_busy() {
            debug!(session_id = session.id(), command = %command, "session busy, rejecting command");
            return ExecutionHandle::rejected(execution, ExecutionError::Busy { session_id: session.id() });
        }

        // Measured from submission
        let timeout = self.inner.config.command_timeout;
        let deadline = Instant::now() + timeout;

        session.set_last_command(&command);
        {
            let mut state = lock(&self.inner.state);
            state.running.insert(session.id(), Arc::clone(&execution));
            state.recorded.insert(session.id(), Arc::clone(&execution));
        }

        let natural = match execution.run(Arc::clone(session.terminal())) {
            Ok(natural) => natural,
            Err(error) => {
                self.inner.release(session, &execution);
                return ExecutionHandle::rejected(execution, error);
            }
        };

        let (outcome_tx, outcome_rx) = oneshot::channel();
        let inner = Arc::clone(&self.inner);
        let session = Arc::clone(session);
        let supervised = Arc::clone(&execution);
        tokio::spawn(async move {
            let outcome = tokio::select! {
                biased;
                natural = natural => natural.unwrap_or(Err(ExecutionError::Abandoned)),
                _ = tokio::time::sleep_until(deadline) => {
                    let error = supervised.time_out(timeout);
                    warn!(session_id = session.id(), error = %error, "command timed out");
                    Err(error)
                }
            };

            inner.release(&session, &supervised);
            let _ = outcome_tx.send(outcome);
        });

        ExecutionHandle::new(execution, outcome_rx)
    }
}

impl std::fmt::Debug for SessionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.inner.state);
        f.debug_struct("SessionPool")
            .field("owned", &state.owned)
            .field("running", &state.running.len())
            .field("config", &self.inner.config)
            .finish()
    }
}

/// Canonical form of a directory for matching.
///
/// Uses the filesystem when the path exists, otherwise resolves `.` and `..`
/// lexically.
pub fn normalize_path(path: &Path) -> PathBuf {
    if let Ok(canonical) = path.canonicalize() {
        return canonical;
    }

    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push(component.as_os_str());
                }
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}
