//! Futures handed out for suspended calls

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;
use tracing::debug;

use crate::domain::{Exchange, RequestId};
use crate::error::BridgeError;

enum ResponseState<E: Exchange> {
    Waiting(oneshot::Receiver<Result<E::Answer, BridgeError>>),
    Failed(Option<BridgeError>),
}

/// Suspended `submit_request` call
///
/// The request is already registered when this future is created. It
/// resolves with the answer passed to `resolve`, the error passed to
/// `reject`, or `Aborted` if the bridge is torn down first.
pub struct ResponseFuture<E: Exchange> {
    id: Option<RequestId>,
    state: ResponseState<E>,
}

impl<E: Exchange> ResponseFuture<E> {
    pub(crate) fn waiting(id: RequestId, rx: oneshot::Receiver<Result<E::Answer, BridgeError>>) -> Self {
        Self {
            id: Some(id),
            state: ResponseState::Waiting(rx),
        }
    }

    pub(crate) fn failed(error: BridgeError) -> Self {
        Self {
            id: None,
            state: ResponseState::Failed(Some(error)),
        }
    }

    /// Id assigned to the request, or None if it was never registered
    pub fn id(&self) -> Option<RequestId> {
        self.id
    }
}

impl<E: Exchange> Future for ResponseFuture<E> {
    type Output = Result<E::Answer, BridgeError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.state {
            ResponseState::Waiting(rx) => match Pin::new(rx).poll(cx) {
                Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
                Poll::Ready(Err(_)) => {
                    debug!(id = ?this.id, "ResponseFuture::poll: bridge dropped the resolver");
                    Poll::Ready(Err(BridgeError::Aborted))
                }
                Poll::Pending => Poll::Pending,
            },
            ResponseState::Failed(error) => Poll::Ready(Err(error.take().unwrap_or(BridgeError::Aborted))),
        }
    }
}

/// Suspended `finalize` call, released by `Bridge::release`
pub struct BarrierFuture {
    state: BarrierState,
}

enum BarrierState {
    Waiting(oneshot::Receiver<()>),
    Failed(Option<BridgeError>),
}

impl BarrierFuture {
    pub(crate) fn waiting(rx: oneshot::Receiver<()>) -> Self {
        Self {
            state: BarrierState::Waiting(rx),
        }
    }

    pub(crate) fn failed(error: BridgeError) -> Self {
        Self {
            state: BarrierState::Failed(Some(error)),
        }
    }
}

impl Future for BarrierFuture {
    type Output = Result<(), BridgeError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.state {
            BarrierState::Waiting(rx) => Pin::new(rx).poll(cx).map(|released| released.map_err(|_| BridgeError::Aborted)),
            BarrierState::Failed(error) => Poll::Ready(Err(error.take().unwrap_or(BridgeError::Aborted))),
        }
    }
}
