// Session pool library (shared by the CLI binary and embedders)
pub mod session;

pub use session::config::PoolConfig;
pub use session::execution::CommandExecution;
pub use session::handle::ExecutionHandle;
pub use session::pool::SessionPool;
pub use session::protocol::{ExecutionError, ExecutionEvent, SessionId, SessionSummary};
pub use session::registry::{LocalRegistry, Session, SessionRegistry, TerminalFactory};
pub use session::terminal::{EventFanout, MemoryTerminal, MemoryTerminalFactory, Terminal, TerminalEvent};

#[cfg(unix)]
pub use session::runtime::{PtyTerminal, PtyTerminalFactory};
