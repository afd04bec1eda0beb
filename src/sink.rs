//! Observing writes to a response.
//!
//! Servers that write responses imperatively, rather than returning an
//! [`http::Response`] from a [`Service`], can implement [`ResponseSink`] and
//! wrap their sink in an [`ObservingResponseSink`]. Every header or body write
//! then counts as activity for the guard, and finishing the response disarms
//! it.
//!
//! [`Service`]: tower_service::Service

use crate::guard::RequestTimeoutGuard;
use bytes::Bytes;
use http::{HeaderMap, StatusCode};

/// Where a response is written to.
pub trait ResponseSink {
    /// Error returned by the underlying transport.
    type Error;

    /// Whether the response has been completed.
    fn is_finished(&self) -> bool;

    /// Write the status line and headers.
    fn write_header(&mut self, status: StatusCode, headers: &HeaderMap) -> Result<(), Self::Error>;

    /// Write a chunk of the body.
    fn write_body(&mut self, chunk: Bytes) -> Result<(), Self::Error>;

    /// Complete the response.
    fn finish(&mut self) -> Result<(), Self::Error>;
}

impl<S> ResponseSink for &mut S
where
    S: ResponseSink + ?Sized,
{
    type Error = S::Error;

    fn is_finished(&self) -> bool {
        (**self).is_finished()
    }

    fn write_header(&mut self, status: StatusCode, headers: &HeaderMap) -> Result<(), Self::Error> {
        (**self).write_header(status, headers)
    }

    fn write_body(&mut self, chunk: Bytes) -> Result<(), Self::Error> {
        (**self).write_body(chunk)
    }

    fn finish(&mut self) -> Result<(), Self::Error> {
        (**self).finish()
    }
}

/// [`ResponseSink`] that reports writes to a [`RequestTimeoutGuard`].
///
/// Calls are forwarded to the inner sink exactly once with the same
/// arguments, and its results are returned unchanged.
#[derive(Debug)]
pub struct ObservingResponseSink<S> {
    inner: S,
    guard: RequestTimeoutGuard,
    finished: bool,
}

impl<S> ObservingResponseSink<S> {
    /// Create a new `ObservingResponseSink`.
    pub fn new(inner: S, guard: RequestTimeoutGuard) -> Self {
        Self {
            inner,
            guard,
            finished: false,
        }
    }

    /// The guard writes are reported to.
    pub fn guard(&self) -> &RequestTimeoutGuard {
        &self.guard
    }

    /// Gets a reference to the underlying sink.
    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    /// Gets a mutable reference to the underlying sink.
    ///
    /// Writes made through it are not observed.
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    /// Consumes `self`, returning the underlying sink.
    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S> ResponseSink for ObservingResponseSink<S>
where
    S: ResponseSink,
{
    type Error = S::Error;

    fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }

    fn write_header(&mut self, status: StatusCode, headers: &HeaderMap) -> Result<(), Self::Error> {
        if !self.finished {
            self.guard.record_activity();
        }
        self.inner.write_header(status, headers)
    }

    fn write_body(&mut self, chunk: Bytes) -> Result<(), Self::Error> {
        if !self.finished {
            self.guard.record_activity();
        }
        self.inner.write_body(chunk)
    }

    fn finish(&mut self) -> Result<(), Self::Error> {
        if !self.finished {
            self.finished = true;
            self.guard.finish();
        }
        self.inner.finish()
    }
}
