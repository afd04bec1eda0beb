//! Middleware that times out requests, granting extra time to responses that
//! are still being written.
//!
//! Unlike [`tower::timeout::Timeout`][tower-timeout], which only bounds the response future,
//! [`RequestTimeout`] keeps watching the response body. Each cycle of the
//! timeout is extended as long as the response made progress during it, up
//! to a cumulative ceiling. Producing the response head and every body frame
//! counts as progress. The body reaching its end disarms the timeout.
//!
//! Handlers can adjust their own timeout through the [`TimeoutHandle`] found
//! in the request extensions.
//!
//! # Example
//!
//! ```
//! use bytes::Bytes;
//! use http::{Request, Response};
//! use http_body_util::Full;
//! use std::{convert::Infallible, time::Duration};
//! use tower::{ServiceBuilder, ServiceExt};
//! use tower_http_request_timeout::{GuardConfig, RequestTimeoutLayer, TimeoutHandle};
//!
//! async fn handle(req: Request<Full<Bytes>>) -> Result<Response<Full<Bytes>>, Infallible> {
//!     if let Some(timeout) = req.extensions().get::<TimeoutHandle>() {
//!         timeout.set_timeout(Duration::from_secs(30));
//!     }
//!     Ok(Response::new(Full::<Bytes>::from("done")))
//! }
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), tower::BoxError> {
//! let config = GuardConfig::new()
//!     .timeout(Duration::from_secs(10))
//!     .max_timeout(Duration::from_secs(600));
//!
//! let svc = ServiceBuilder::new()
//!     .layer(RequestTimeoutLayer::new(config))
//!     .service_fn(handle);
//!
//! let res = svc.oneshot(Request::new(Full::default())).await?;
//! # assert_eq!(res.status(), 200);
//! # Ok(())
//! # }
//! ```
//!
//! [`TimeoutHandle`]: crate::TimeoutHandle
//! [tower-timeout]: https://docs.rs/tower/latest/tower/timeout/struct.Timeout.html

use crate::{
    body::TimeoutBody,
    config::GuardConfig,
    future::ResponseFuture,
    guard::{FinishOnDrop, RequestTimeoutGuard},
    scheduler::{Scheduler, TokioScheduler},
};
use http::{Request, Response};
use std::{
    sync::Arc,
    task::{Context, Poll},
};
use tokio::sync::oneshot;
use tower::BoxError;
use tower_layer::Layer;
use tower_service::Service;

/// Layer that applies [`RequestTimeout`].
///
/// See the [module docs](crate::service) for an example.
#[derive(Debug, Clone)]
pub struct RequestTimeoutLayer {
    config: Arc<GuardConfig>,
    scheduler: Arc<dyn Scheduler>,
}

impl RequestTimeoutLayer {
    /// Create a new `RequestTimeoutLayer` driven by the tokio timer.
    pub fn new(config: GuardConfig) -> Self {
        Self::with_scheduler(config, TokioScheduler::new())
    }

    /// Create a new `RequestTimeoutLayer` driven by `scheduler`.
    pub fn with_scheduler<T>(config: GuardConfig, scheduler: T) -> Self
    where
        T: Scheduler,
    {
        Self {
            config: Arc::new(config),
            scheduler: Arc::new(scheduler),
        }
    }
}

impl Default for RequestTimeoutLayer {
    fn default() -> Self {
        Self::new(GuardConfig::default())
    }
}

impl<S> Layer<S> for RequestTimeoutLayer {
    type Service = RequestTimeout<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestTimeout {
            inner,
            config: self.config.clone(),
            scheduler: self.scheduler.clone(),
        }
    }
}

/// Middleware that times out stalled requests.
///
/// Failed requests resolve to a [`BoxError`] built by the configured error
/// factory, by default a [`RequestTimeoutError`]. If the timeout hits while
/// the response body is streaming, the body yields that error instead.
///
/// See the [module docs](crate::service) for an example.
///
/// [`RequestTimeoutError`]: crate::RequestTimeoutError
#[derive(Debug, Clone)]
pub struct RequestTimeout<S> {
    inner: S,
    config: Arc<GuardConfig>,
    scheduler: Arc<dyn Scheduler>,
}

impl<S> RequestTimeout<S> {
    /// Create a new `RequestTimeout` driven by the tokio timer.
    pub fn new(inner: S, config: GuardConfig) -> Self {
        RequestTimeoutLayer::new(config).layer(inner)
    }

    /// Returns a new [`Layer`] that wraps services with a [`RequestTimeout`] middleware.
    ///
    /// [`Layer`]: tower_layer::Layer
    pub fn layer(config: GuardConfig) -> RequestTimeoutLayer {
        RequestTimeoutLayer::new(config)
    }

    /// The configuration shared by every request.
    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    /// Gets a reference to the underlying service.
    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    /// Gets a mutable reference to the underlying service.
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    /// Consumes `self`, returning the underlying service.
    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for RequestTimeout<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    S::Error: Into<BoxError>,
{
    type Response = Response<TimeoutBody<ResBody>>;
    type Error = BoxError;
    type Future = ResponseFuture<S::Future>;

    #[inline]
    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        let (tx, rx) = oneshot::channel();
        let guard = RequestTimeoutGuard::new(
            self.config.clone(),
            &req,
            self.scheduler.clone(),
            move |err| {
                let _ = tx.send(err);
            },
        );
        guard.start();
        req.extensions_mut().insert(guard.handle());

        ResponseFuture {
            inner: self.inner.call(req),
            guard: FinishOnDrop::new(guard),
            timeout: Some(rx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::RequestTimeoutError,
        guard::TimeoutHandle,
        test_helpers::{data, ChannelBody},
        ServiceBuilderExt,
    };
    use bytes::Bytes;
    use http::header;
    use http_body_util::{BodyExt, Empty, Full};
    use std::{convert::Infallible, io, time::Duration};
    use tokio::time::{sleep, Instant};
    use tower::{service_fn, ServiceBuilder, ServiceExt};

    fn ms(ms: u64) -> Duration {
        Duration::from_millis(ms)
    }

    fn config(timeout: u64, max: u64) -> GuardConfig {
        GuardConfig::new().timeout(ms(timeout)).max_timeout(ms(max))
    }

    fn get(uri: &str) -> Request<Empty<Bytes>> {
        Request::get(uri).body(Empty::new()).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn handler_that_never_answers_times_out() {
        let svc = ServiceBuilder::new()
            .layer(RequestTimeoutLayer::new(config(100, 250)))
            .service_fn(|_: Request<Empty<Bytes>>| async {
                std::future::pending::<Result<Response<Full<Bytes>>, Infallible>>().await
            });

        let start = Instant::now();
        let err = svc.oneshot(get("/x")).await.unwrap_err();

        assert!(err.is::<RequestTimeoutError>());
        assert_eq!(err.to_string(), "Timeout GET /x");
        assert!(start.elapsed() >= ms(100));
        assert!(start.elapsed() < ms(150));
    }

    #[tokio::test(start_paused = true)]
    async fn quick_response_is_untouched() {
        let svc = ServiceBuilder::new()
            .request_timeout(config(100, 250))
            .service_fn(|_: Request<Empty<Bytes>>| async {
                Ok::<_, Infallible>(Response::new(Full::<Bytes>::from("hello")))
            });

        let res = svc.oneshot(get("/")).await.unwrap();
        let body = res.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"hello");

        // Nothing left running that could fire later.
        sleep(Duration::from_secs(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn inner_errors_pass_through() {
        let svc = RequestTimeout::new(
            service_fn(|_: Request<Empty<Bytes>>| async {
                Err::<Response<Full<Bytes>>, _>(io::Error::new(io::ErrorKind::Other, "boom"))
            }),
            config(100, 250),
        );

        let err = svc.oneshot(get("/")).await.unwrap_err();
        assert!(err.is::<io::Error>());
    }

    #[tokio::test(start_paused = true)]
    async fn streaming_response_gets_grace() {
        let svc = ServiceBuilder::new()
            .layer(RequestTimeoutLayer::new(config(100, 1_000)))
            .service_fn(|_: Request<Empty<Bytes>>| async {
                let (tx, body) = ChannelBody::new();
                tokio::spawn(async move {
                    for _ in 0..5 {
                        sleep(ms(60)).await;
                        tx.send(data("tick")).unwrap();
                    }
                });
                Ok::<_, Infallible>(Response::new(body))
            });

        let res = svc.oneshot(get("/events")).await.unwrap();
        let body = res.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"tickticktickticktick");
    }

    #[tokio::test(start_paused = true)]
    async fn streaming_response_hits_the_ceiling() {
        let svc = ServiceBuilder::new()
            .layer(RequestTimeoutLayer::new(config(100, 150)))
            .service_fn(|_: Request<Empty<Bytes>>| async {
                let (tx, body) = ChannelBody::new();
                tokio::spawn(async move {
                    while tx.send(data("tick")).is_ok() {
                        sleep(ms(50)).await;
                    }
                });
                Ok::<_, Infallible>(Response::new(body))
            });

        let start = Instant::now();
        let res = svc.oneshot(get("/events")).await.unwrap();
        let err = res.into_body().collect().await.unwrap_err();

        assert!(err.is::<RequestTimeoutError>());
        assert_eq!(err.to_string(), "Timeout GET /events");
        assert_eq!(start.elapsed(), ms(200));
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_body_times_out() {
        let svc = ServiceBuilder::new()
            .layer(RequestTimeoutLayer::new(config(100, 1_000)))
            .service_fn(|_: Request<Empty<Bytes>>| async {
                let (tx, body) = ChannelBody::new();
                tokio::spawn(async move {
                    sleep(ms(50)).await;
                    tx.send(data("partial")).unwrap();
                    std::future::pending::<()>().await;
                    drop(tx);
                });
                Ok::<_, Infallible>(Response::new(body))
            });

        let start = Instant::now();
        let res = svc.oneshot(get("/download")).await.unwrap();
        let err = res.into_body().collect().await.unwrap_err();

        assert!(err.is::<RequestTimeoutError>());
        assert_eq!(start.elapsed(), ms(200));
    }

    #[tokio::test(start_paused = true)]
    async fn handler_can_extend_its_timeout() {
        let svc = ServiceBuilder::new()
            .layer(RequestTimeoutLayer::new(config(100, 1_000)))
            .service_fn(|req: Request<Empty<Bytes>>| async move {
                let timeout = req.extensions().get::<TimeoutHandle>().unwrap();
                assert_eq!(timeout.timeout(), ms(100));
                timeout.set_timeout(ms(300));
                assert_eq!(timeout.timeout(), ms(300));

                sleep(ms(250)).await;
                Ok::<_, Infallible>(Response::new(Full::<Bytes>::from("slow")))
            });

        let res = svc.oneshot(get("/slow")).await.unwrap();
        let body = res.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"slow");
    }

    #[tokio::test(start_paused = true)]
    async fn handler_can_clear_its_timeout() {
        let svc = ServiceBuilder::new()
            .layer(RequestTimeoutLayer::new(config(100, 250)))
            .service_fn(|req: Request<Empty<Bytes>>| async move {
                let timeout = req.extensions().get::<TimeoutHandle>().unwrap();
                timeout.clear_timeout();
                timeout.clear_timeout();

                sleep(Duration::from_secs(5)).await;
                Ok::<_, Infallible>(Response::new(Full::<Bytes>::from("eventually")))
            });

        let res = svc.oneshot(get("/")).await.unwrap();
        assert!(res.into_body().collect().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn handler_supplied_error_factory_is_used() {
        let svc = ServiceBuilder::new()
            .layer(RequestTimeoutLayer::new(config(100, 250)))
            .service_fn(|req: Request<Empty<Bytes>>| async move {
                let timeout = req.extensions().get::<TimeoutHandle>().unwrap();
                timeout.set_timeout_with(Some(ms(20)), |msg| {
                    io::Error::new(io::ErrorKind::TimedOut, msg)
                });

                std::future::pending::<Result<Response<Full<Bytes>>, Infallible>>().await
            });

        let start = Instant::now();
        let err = svc.oneshot(get("/custom")).await.unwrap_err();

        let err = err.downcast::<io::Error>().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        assert_eq!(err.to_string(), "Timeout GET /custom");
        assert_eq!(start.elapsed(), ms(20));
    }

    #[tokio::test(start_paused = true)]
    async fn uploads_use_the_upload_timeout() {
        let config = GuardConfig::new()
            .timeout(ms(100))
            .upload_timeout(ms(500));
        let svc = ServiceBuilder::new()
            .layer(RequestTimeoutLayer::new(config))
            .service_fn(|req: Request<Empty<Bytes>>| async move {
                let timeout = req.extensions().get::<TimeoutHandle>().unwrap();
                assert_eq!(timeout.timeout(), ms(500));

                sleep(ms(400)).await;
                Ok::<_, Infallible>(Response::new(Full::<Bytes>::from("stored")))
            });

        let req = Request::post("/files")
            .header(header::CONTENT_TYPE, "multipart/form-data; boundary=xyz")
            .body(Empty::new())
            .unwrap();
        let res = svc.oneshot(req).await.unwrap();
        assert!(res.into_body().collect().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn every_request_gets_its_own_guard() {
        let mut svc = ServiceBuilder::new()
            .layer(RequestTimeoutLayer::new(config(100, 250)))
            .service_fn(|req: Request<Empty<Bytes>>| async move {
                if req.uri().path() == "/slow" {
                    sleep(Duration::from_secs(1)).await;
                }
                Ok::<_, Infallible>(Response::new(Full::<Bytes>::from("ok")))
            });

        let slow = svc.ready().await.unwrap().call(get("/slow"));
        let fast = svc.ready().await.unwrap().call(get("/fast"));

        let (slow, fast) = tokio::join!(slow, fast);
        assert!(slow.unwrap_err().is::<RequestTimeoutError>());
        assert!(fast.is_ok());
    }
}
