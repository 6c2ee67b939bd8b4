use core::future::Future;
use core::pin::Pin;
use core::task::{Context, Poll};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::types::Outcome;

/// Receiver gets the outcome of a flight exactly once.
///
/// It can be awaited, or drained from a plain thread with `blocking_recv`.
/// Dropping it only stops this caller from listening; the work keeps running
/// for everybody else.
#[derive(Debug)]
pub struct Receiver<V, E> {
    rx: oneshot::Receiver<Outcome<V, E>>,
}

impl<V, E> Receiver<V, E> {
    pub(crate) fn new(rx: oneshot::Receiver<Outcome<V, E>>) -> Self {
        Self { rx }
    }

    /// blocking_recv parks the current thread until the outcome arrives.
    ///
    /// # Panics
    ///
    /// Panics when called from within an asynchronous execution context.
    pub fn blocking_recv(self) -> Result<Outcome<V, E>, Error> {
        self.rx.blocking_recv().map_err(|_| Error::Abandoned)
    }

    /// recv_or_cancel waits for the outcome unless `token` fires first, in
    /// which case `Error::Cancelled` is returned and the flight carries on.
    pub async fn recv_or_cancel(self, token: &CancellationToken) -> Result<Outcome<V, E>, Error> {
        tokio::select! {
            res = self => res,
            _ = token.cancelled() => Err(Error::Cancelled),
        }
    }
}

impl<V, E> Future for Receiver<V, E> {
    type Output = Result<Outcome<V, E>, Error>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|res| res.map_err(|_| Error::Abandoned))
    }
}
