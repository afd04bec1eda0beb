//! Response body that keeps a request's guard informed of its progress.

use crate::{
    future::poll_timeout,
    guard::{FinishOnDrop, RequestTimeoutGuard},
};
use futures_core::ready;
use http_body::{Body, Frame, SizeHint};
use pin_project_lite::pin_project;
use std::{
    pin::Pin,
    task::{Context, Poll},
};
use tokio::sync::oneshot;
use tower::BoxError;

pin_project! {
    /// Response body for [`RequestTimeout`].
    ///
    /// Every frame counts as activity for the request's guard. Reaching the
    /// end of the body, or dropping it, completes the response. If the
    /// request times out first the body yields the timeout error and then
    /// ends.
    ///
    /// [`RequestTimeout`]: crate::RequestTimeout
    #[derive(Debug)]
    pub struct TimeoutBody<B> {
        #[pin]
        inner: B,
        guard: FinishOnDrop,
        timeout: Option<oneshot::Receiver<BoxError>>,
        timed_out: bool,
    }
}

impl<B> TimeoutBody<B> {
    pub(crate) fn new(
        inner: B,
        guard: Option<RequestTimeoutGuard>,
        timeout: Option<oneshot::Receiver<BoxError>>,
    ) -> Self {
        Self {
            inner,
            guard: FinishOnDrop::new(guard),
            timeout,
            timed_out: false,
        }
    }
}

impl<B> Body for TimeoutBody<B>
where
    B: Body,
    B::Error: Into<BoxError>,
{
    type Data = B::Data;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.project();

        if *this.timed_out {
            return Poll::Ready(None);
        }

        // Checked before the inner body so a body that always has data ready
        // still runs into the ceiling.
        if let Some(err) = poll_timeout(this.timeout, cx) {
            *this.timed_out = true;
            return Poll::Ready(Some(Err(err)));
        }

        match ready!(this.inner.poll_frame(cx)) {
            Some(Ok(frame)) => {
                if let Some(guard) = this.guard.get() {
                    guard.record_activity();
                }
                Poll::Ready(Some(Ok(frame)))
            }
            Some(Err(err)) => {
                if let Some(guard) = this.guard.take() {
                    guard.finish();
                }
                Poll::Ready(Some(Err(err.into())))
            }
            None => {
                if let Some(guard) = this.guard.take() {
                    guard.finish();
                }
                Poll::Ready(None)
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.timed_out || self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        if self.timed_out {
            SizeHint::with_exact(0)
        } else {
            self.inner.size_hint()
        }
    }
}
