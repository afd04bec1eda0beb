//! Process wide settings shared by every request guard.

use crate::error::RequestTimeoutError;
use std::{fmt, sync::Arc, time::Duration};
use tower::BoxError;

/// Per-cycle duration used for ordinary requests.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-cycle duration used for `multipart/form-data` uploads.
pub const DEFAULT_UPLOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// Ceiling on the cumulative time a request may keep extending itself.
pub const DEFAULT_MAX_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Builds the error value reported when a request times out, given the
/// `Timeout <METHOD> <URL>` message.
#[derive(Clone)]
pub struct ErrorFactory(Arc<dyn Fn(String) -> BoxError + Send + Sync>);

impl ErrorFactory {
    /// Create a new `ErrorFactory` from a closure.
    ///
    /// # Example
    ///
    /// ```
    /// use tower_http_request_timeout::ErrorFactory;
    /// use std::io;
    ///
    /// let factory = ErrorFactory::new(|msg| io::Error::new(io::ErrorKind::TimedOut, msg));
    /// let err = factory.make("Timeout GET /".to_owned());
    /// assert!(err.is::<io::Error>());
    /// ```
    pub fn new<F, E>(f: F) -> Self
    where
        F: Fn(String) -> E + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        Self(Arc::new(move |message| f(message).into()))
    }

    /// Build the error for `message`.
    pub fn make(&self, message: String) -> BoxError {
        (self.0)(message)
    }
}

impl Default for ErrorFactory {
    fn default() -> Self {
        Self::new(RequestTimeoutError::new)
    }
}

impl fmt::Debug for ErrorFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ErrorFactory").finish()
    }
}

/// Configuration for [`RequestTimeoutGuard`]s.
///
/// Built once while setting up the middleware stack and shared, read only,
/// by every in-flight request.
///
/// # Example
///
/// ```
/// use tower_http_request_timeout::GuardConfig;
/// use std::time::Duration;
///
/// let config = GuardConfig::new()
///     .timeout(Duration::from_secs(5))
///     .upload_timeout(Duration::from_secs(30))
///     .max_timeout(Duration::from_secs(120));
///
/// assert_eq!(config.get_timeout(), Duration::from_secs(5));
/// ```
///
/// [`RequestTimeoutGuard`]: crate::RequestTimeoutGuard
#[derive(Clone, Debug)]
pub struct GuardConfig {
    timeout: Duration,
    upload_timeout: Duration,
    max_timeout: Duration,
    error_factory: ErrorFactory,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            upload_timeout: DEFAULT_UPLOAD_TIMEOUT,
            max_timeout: DEFAULT_MAX_TIMEOUT,
            error_factory: ErrorFactory::default(),
        }
    }
}

impl GuardConfig {
    /// Create a new `GuardConfig` with the default durations.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-cycle duration for ordinary requests.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the per-cycle duration for `multipart/form-data` uploads.
    pub fn upload_timeout(mut self, timeout: Duration) -> Self {
        self.upload_timeout = timeout;
        self
    }

    /// Set the hard ceiling on the cumulative time spent across cycles.
    ///
    /// Once reached the request times out even if it is still writing.
    pub fn max_timeout(mut self, timeout: Duration) -> Self {
        self.max_timeout = timeout;
        self
    }

    /// Set the factory used to build reported errors.
    pub fn error_factory<F, E>(mut self, f: F) -> Self
    where
        F: Fn(String) -> E + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        self.error_factory = ErrorFactory::new(f);
        self
    }

    /// The per-cycle duration for ordinary requests.
    pub fn get_timeout(&self) -> Duration {
        self.timeout
    }

    /// The per-cycle duration for uploads.
    pub fn get_upload_timeout(&self) -> Duration {
        self.upload_timeout
    }

    /// The cumulative ceiling.
    pub fn get_max_timeout(&self) -> Duration {
        self.max_timeout
    }

    /// The default error factory.
    pub fn get_error_factory(&self) -> &ErrorFactory {
        &self.error_factory
    }

    pub(crate) fn initial_timeout(&self, is_upload: bool) -> Duration {
        if is_upload {
            self.upload_timeout
        } else {
            self.timeout
        }
    }
}
