use crate::request::{Envelope, RequestId};
use core_model::{BridgeError, CancelReason};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Caller's handle on a submitted request. Resolves to exactly one
/// [`Envelope`]: either the operation's outcome or `Cancelled`, whichever
/// won the race. Dropping the handle does not cancel the request.
#[derive(Debug)]
pub struct PendingReply {
    pub(crate) request_id: RequestId,
    pub(crate) plugin_id: String,
    pub(crate) token: CancellationToken,
    pub(crate) task: JoinHandle<Envelope>,
}

impl PendingReply {
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    /// Ask for cancellation. Has no effect once the reply is already decided.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Future for PendingReply {
    type Output = Envelope;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Envelope> {
        match Pin::new(&mut self.task).poll(cx) {
            Poll::Ready(Ok(envelope)) => Poll::Ready(envelope),
            Poll::Ready(Err(err)) => {
                // Runtime shutting down or the request task panicked.
                tracing::warn!(target: "gateway", request = %self.request_id, error = %err, "request_task_lost");
                Poll::Ready(Envelope {
                    request_id: self.request_id,
                    plugin_id: self.plugin_id.clone(),
                    outcome: Err(BridgeError::cancelled(CancelReason::Shutdown)),
                })
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
