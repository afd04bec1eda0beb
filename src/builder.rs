use crate::{config::GuardConfig, service::RequestTimeoutLayer};
use tower::ServiceBuilder;
use tower_layer::Stack;

/// Extension trait that adds methods to [`tower::ServiceBuilder`] for adding the request timeout
/// middleware.
///
/// # Example
///
/// ```rust
/// use bytes::Bytes;
/// use http::{Request, Response};
/// use http_body_util::Full;
/// use std::{convert::Infallible, time::Duration};
/// use tower::{ServiceBuilder, ServiceExt};
/// use tower_http_request_timeout::{GuardConfig, ServiceBuilderExt};
///
/// async fn handle(_: Request<Full<Bytes>>) -> Result<Response<Full<Bytes>>, Infallible> {
///     Ok(Response::new(Full::default()))
/// }
///
/// # #[tokio::main]
/// # async fn main() {
/// let service = ServiceBuilder::new()
///     .request_timeout(GuardConfig::new().timeout(Duration::from_secs(30)))
///     .service_fn(handle);
/// # service.oneshot(Request::new(Full::default())).await.unwrap();
/// # }
/// ```
pub trait ServiceBuilderExt<L>: sealed::Sealed<L> + Sized {
    /// Time out requests that stop making progress.
    ///
    /// See [`tower_http_request_timeout::service`] for more details.
    ///
    /// [`tower_http_request_timeout::service`]: crate::service
    fn request_timeout(self, config: GuardConfig) -> ServiceBuilder<Stack<RequestTimeoutLayer, L>>;
}

mod sealed {
    #[allow(unreachable_pub, unused)]
    pub trait Sealed<T> {}
}

impl<L> sealed::Sealed<L> for ServiceBuilder<L> {}

impl<L> ServiceBuilderExt<L> for ServiceBuilder<L> {
    fn request_timeout(self, config: GuardConfig) -> ServiceBuilder<Stack<RequestTimeoutLayer, L>> {
        self.layer(RequestTimeoutLayer::new(config))
    }
}
