//! The future a submitting caller awaits.

use futures::future::FusedFuture;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

use crate::acks::{Acknowledgements, CorrelationId};
use crate::error::{Result, TwinlinkError};

enum Slot {
    Ready(Option<Acknowledgements>),
    Waiting(oneshot::Receiver<Acknowledgements>),
    Done,
}

/// Resolves exactly once with the aggregate result of a submitted command.
///
/// Awaiting suspends the caller without blocking other work. The only error
/// is `AggregationAbandoned`, raised when the aggregation was dropped without
/// producing a result (for example because its dispatcher went away).
#[must_use = "the aggregate result is only observed by awaiting"]
pub struct PendingAcknowledgements {
    correlation_id: CorrelationId,
    slot: Slot,
}

impl std::fmt::Debug for PendingAcknowledgements {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slot = match self.slot {
            Slot::Ready(_) => "ready",
            Slot::Waiting(_) => "waiting",
            Slot::Done => "done",
        };
        f.debug_struct("PendingAcknowledgements")
            .field("correlation_id", &self.correlation_id)
            .field("slot", &slot)
            .finish()
    }
}

impl PendingAcknowledgements {
    pub(crate) fn ready(result: Acknowledgements) -> Self {
        Self {
            correlation_id: result.correlation_id().clone(),
            slot: Slot::Ready(Some(result)),
        }
    }

    pub(crate) fn waiting(
        correlation_id: CorrelationId,
        receiver: oneshot::Receiver<Acknowledgements>,
    ) -> Self {
        Self {
            correlation_id,
            slot: Slot::Waiting(receiver),
        }
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    /// Whether the result was available at submission time.
    pub fn is_immediate(&self) -> bool {
        matches!(self.slot, Slot::Ready(_))
    }
}

impl Future for PendingAcknowledgements {
    type Output = Result<Acknowledgements>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let outcome = match &mut this.slot {
            Slot::Ready(result) => match result.take() {
                Some(result) => Ok(result),
                None => Err(TwinlinkError::internal("pending result polled after completion")),
            },
            Slot::Waiting(receiver) => match Pin::new(receiver).poll(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Ok(result)) => Ok(result),
                Poll::Ready(Err(_)) => Err(TwinlinkError::aggregation_abandoned(&this.correlation_id)),
            },
            Slot::Done => Err(TwinlinkError::internal("pending result polled after completion")),
        };
        this.slot = Slot::Done;
        Poll::Ready(outcome)
    }
}

impl FusedFuture for PendingAcknowledgements {
    fn is_terminated(&self) -> bool {
        matches!(self.slot, Slot::Done)
    }
}
