// Execution handle - what `SessionPool::submit_command` hands back
//
// Awaiting the handle yields the outcome; the timeout has already been
// applied by the pool. The handle also exposes the streaming side of the
// execution it belongs to.

use crate::session::execution::{CommandExecution, Outcome};
use crate::session::protocol::{ExecutionError, ExecutionEvent, SessionId};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};

#[derive(Debug)]
pub struct ExecutionHandle {
    execution: Arc<CommandExecution>,
    outcome: oneshot::Receiver<Outcome>,
    settled: Option<Outcome>,
}

impl ExecutionHandle {
    pub(crate) fn new(execution: Arc<CommandExecution>, outcome: oneshot::Receiver<Outcome>) -> Self {
        Self {
            execution,
            outcome,
            settled: None,
        }
    }

    /// A handle that is already settled with `error`
    pub(crate) fn rejected(execution: Arc<CommandExecution>, error: ExecutionError) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Err(error));
        Self::new(execution, rx)
    }

    pub fn execution(&self) -> &Arc<CommandExecution> {
        &self.execution
    }

    pub fn session_id(&self) -> SessionId {
        self.execution.session_id()
    }

    /// Line events, see [`CommandExecution::subscribe`]
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ExecutionEvent> {
        self.execution.subscribe()
    }

    /// Stop line events, keep accumulating output
    pub fn detach(&self) {
        self.execution.detach();
    }

    pub fn unretrieved_output(&self) -> String {
        self.execution.unretrieved_output()
    }

    pub fn is_hot(&self) -> bool {
        self.execution.is_hot()
    }

    /// The outcome if it is already known, without waiting
    pub fn try_outcome(&mut self) -> Option<Outcome> {
        if self.settled.is_none() {
            match self.outcome.try_recv() {
                Ok(outcome) => self.settled = Some(outcome),
                Err(oneshot::error::TryRecvError::Empty) => return None,
                Err(oneshot::error::TryRecvError::Closed) => {
                    self.settled = Some(Err(ExecutionError::Abandoned))
                }
            }
        }
        self.settled.clone()
    }
}

impl Future for ExecutionHandle {
    type Output = Outcome;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if let Some(outcome) = &this.settled {
            return Poll::Ready(outcome.clone());
        }

        let outcome = match Pin::new(&mut this.outcome).poll(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(Ok(outcome)) => outcome,
            Poll::Ready(Err(_)) => Err(ExecutionError::Abandoned),
        };
        this.settled = Some(outcome.clone());
        Poll::Ready(outcome)
    }
}
