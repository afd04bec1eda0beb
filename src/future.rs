//! Response future for [`RequestTimeout`].
//!
//! [`RequestTimeout`]: crate::RequestTimeout

use crate::{body::TimeoutBody, guard::FinishOnDrop};
use http::Response;
use pin_project_lite::pin_project;
use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};
use tokio::sync::oneshot;
use tower::BoxError;

pin_project! {
    /// Response future for [`RequestTimeout`].
    ///
    /// [`RequestTimeout`]: crate::RequestTimeout
    #[derive(Debug)]
    pub struct ResponseFuture<F> {
        #[pin]
        pub(crate) inner: F,
        pub(crate) guard: FinishOnDrop,
        pub(crate) timeout: Option<oneshot::Receiver<BoxError>>,
    }
}

impl<F, B, E> Future for ResponseFuture<F>
where
    F: Future<Output = Result<Response<B>, E>>,
    E: Into<BoxError>,
{
    type Output = Result<Response<TimeoutBody<B>>, BoxError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        if let Some(err) = poll_timeout(this.timeout, cx) {
            return Poll::Ready(Err(err));
        }

        let result = match this.inner.poll(cx) {
            Poll::Ready(result) => result,
            Poll::Pending => return Poll::Pending,
        };

        let guard = this.guard.take();
        match result {
            Ok(res) => {
                // The response head is the first write.
                if let Some(guard) = &guard {
                    guard.record_activity();
                }
                let timeout = this.timeout.take();
                Poll::Ready(Ok(res.map(|body| TimeoutBody::new(body, guard, timeout))))
            }
            Err(err) => {
                if let Some(guard) = guard {
                    guard.finish();
                }
                Poll::Ready(Err(err.into()))
            }
        }
    }
}

/// Polls for a reported timeout, clearing `timeout` once it resolves.
pub(crate) fn poll_timeout(
    timeout: &mut Option<oneshot::Receiver<BoxError>>,
    cx: &mut Context<'_>,
) -> Option<BoxError> {
    let rx = timeout.as_mut()?;
    match Pin::new(rx).poll(cx) {
        Poll::Ready(result) => {
            *timeout = None;
            result.ok()
        }
        Poll::Pending => None,
    }
}
