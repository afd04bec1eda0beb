//! The per-request timeout state machine.
//!
//! A [`RequestTimeoutGuard`] is created when a request starts and armed right
//! away. Every time its timer fires it either extends itself, if the response
//! was written to during the last cycle and the cumulative ceiling has not
//! been reached, or reports a timeout error through the error channel it was
//! created with.
//!
//! ```text
//! Idle --start--> Armed --fire, activity, under ceiling--> Armed
//!                   |
//!                   +--fire, idle or ceiling reached--> TimedOut
//!                   +--finish--> Finished
//! ```
//!
//! `TimedOut` and `Finished` are terminal: nothing done to the guard after
//! reaching either has any effect.
//!
//! # Example
//!
//! ```
//! use tower_http_request_timeout::{GuardConfig, RequestTimeoutGuard, TokioScheduler};
//! use http::Request;
//! use std::{sync::Arc, time::Duration};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let config = Arc::new(GuardConfig::new().timeout(Duration::from_secs(5)));
//! let req = Request::get("/reports").body(()).unwrap();
//!
//! let guard = RequestTimeoutGuard::new(
//!     config,
//!     &req,
//!     Arc::new(TokioScheduler::new()),
//!     |err| eprintln!("{}", err),
//! );
//! guard.start();
//!
//! // Writing to the response counts as activity.
//! guard.record_activity();
//!
//! // Completing the response disarms the timer for good.
//! guard.finish();
//! assert!(guard.is_finished());
//! # }
//! ```

use crate::{
    config::{ErrorFactory, GuardConfig},
    context::RequestContext,
    error::timeout_message,
    scheduler::{Scheduler, TaskHandle},
};
use std::{
    convert::TryFrom,
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    time::Duration,
};
use tower::BoxError;

type Reporter = Box<dyn FnOnce(BoxError) + Send + 'static>;

/// Timeout state machine for a single request.
///
/// Cloning a guard yields another handle to the same state.
#[derive(Clone)]
pub struct RequestTimeoutGuard {
    shared: Arc<Shared>,
}

struct Shared {
    config: Arc<GuardConfig>,
    scheduler: Arc<dyn Scheduler>,
    method: String,
    url: String,
    state: Mutex<State>,
}

struct State {
    current_timeout: Duration,
    elapsed_total: Duration,
    activity: bool,
    timer: Option<TaskHandle>,
    armed: bool,
    // Bumped on every arm so a fire from an earlier cycle can be told apart.
    cycle: u64,
    factory: Option<ErrorFactory>,
    finished: bool,
    timed_out: bool,
    reporter: Option<Reporter>,
}

impl State {
    fn is_terminal(&self) -> bool {
        self.finished || self.timed_out
    }

    // Starts a new cycle. The returned handle, if any, must be cancelled
    // once the lock is released.
    fn next_cycle(&mut self) -> (u64, Option<TaskHandle>) {
        self.armed = true;
        self.cycle = self.cycle.wrapping_add(1);
        (self.cycle, self.timer.take())
    }

    fn disarm(&mut self) -> Option<TaskHandle> {
        self.armed = false;
        self.timer.take()
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(timer) = state.disarm() {
            timer.cancel();
        }
    }
}

enum Fired {
    Stale,
    Extended {
        cycle: u64,
        delay: Duration,
    },
    TimedOut {
        factory: ErrorFactory,
        reporter: Option<Reporter>,
        elapsed: Duration,
    },
}

impl RequestTimeoutGuard {
    /// Create a new guard for the request described by `ctx`.
    ///
    /// The initial cycle duration is the config's upload timeout for
    /// `multipart/form-data` requests and its regular timeout otherwise.
    /// `on_timeout` receives the error if the request times out; it is called
    /// at most once.
    ///
    /// The guard starts out idle. Call [`start`](Self::start) to arm it.
    pub fn new<C, F>(
        config: Arc<GuardConfig>,
        ctx: &C,
        scheduler: Arc<dyn Scheduler>,
        on_timeout: F,
    ) -> Self
    where
        C: RequestContext + ?Sized,
        F: FnOnce(BoxError) + Send + 'static,
    {
        let current_timeout = config.initial_timeout(ctx.is_multipart());

        Self {
            shared: Arc::new(Shared {
                config,
                scheduler,
                method: ctx.method().to_owned(),
                url: ctx.url(),
                state: Mutex::new(State {
                    current_timeout,
                    elapsed_total: Duration::ZERO,
                    activity: false,
                    timer: None,
                    armed: false,
                    cycle: 0,
                    factory: None,
                    finished: false,
                    timed_out: false,
                    reporter: Some(Box::new(on_timeout)),
                }),
            }),
        }
    }

    /// Arm the first cycle with the initial timeout.
    pub fn start(&self) {
        self.arm(None, None);
    }

    /// (Re)start the timeout cycle.
    ///
    /// `timeout`, if given, replaces the cycle duration for this and all
    /// following cycles. `factory`, if given, is used instead of the config's
    /// error factory for this cycle and every automatic extension of it.
    /// Any pending timer is cancelled first, so this is safe to call
    /// repeatedly. Does nothing once the guard has finished or timed out.
    pub fn arm(&self, timeout: Option<Duration>, factory: Option<ErrorFactory>) {
        let (cycle, delay, previous) = {
            let mut state = self.lock();
            if state.is_terminal() {
                return;
            }

            if let Some(timeout) = timeout {
                state.current_timeout = timeout;
            }
            state.factory = factory;

            let (cycle, previous) = state.next_cycle();
            (cycle, state.current_timeout, previous)
        };

        if let Some(timer) = previous {
            timer.cancel();
        }

        tracing::trace!(
            method = %self.shared.method,
            url = %self.shared.url,
            timeout_ms = millis(delay),
            "request timeout armed"
        );
        self.schedule(cycle, delay);
    }

    /// Cancel the pending timer, if any.
    pub fn disarm(&self) {
        let timer = self.lock().disarm();
        if let Some(timer) = timer {
            timer.cancel();
        }
    }

    /// The duration of the current cycle. This is not the time remaining.
    pub fn timeout(&self) -> Duration {
        self.lock().current_timeout
    }

    /// Total time accounted across all fired cycles.
    pub fn elapsed(&self) -> Duration {
        self.lock().elapsed_total
    }

    /// Note that the response was written to during the current cycle.
    pub fn record_activity(&self) {
        let mut state = self.lock();
        if !state.is_terminal() {
            state.activity = true;
        }
    }

    /// Mark the response as completed and cancel the timer for good.
    pub fn finish(&self) {
        let timer = {
            let mut state = self.lock();
            if state.is_terminal() {
                return;
            }
            state.finished = true;
            state.disarm()
        };

        if let Some(timer) = timer {
            timer.cancel();
        }

        tracing::trace!(
            method = %self.shared.method,
            url = %self.shared.url,
            "response finished, request timeout disarmed"
        );
    }

    /// Whether the response has completed.
    pub fn is_finished(&self) -> bool {
        self.lock().finished
    }

    /// Whether a timeout has been reported.
    pub fn is_timed_out(&self) -> bool {
        self.lock().timed_out
    }

    /// Get a [`TimeoutHandle`] for downstream handlers.
    pub fn handle(&self) -> TimeoutHandle {
        TimeoutHandle {
            guard: self.clone(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    // Called without the lock held. The handle is only kept if `cycle` is
    // still the live one once the scheduler returns.
    fn schedule(&self, cycle: u64, delay: Duration) {
        let weak = Arc::downgrade(&self.shared);
        let timer = self
            .shared
            .scheduler
            .schedule(delay, Box::new(move || on_fire(weak, cycle)));

        let superseded = {
            let mut state = self.lock();
            if state.armed && state.cycle == cycle {
                state.timer.replace(timer)
            } else {
                Some(timer)
            }
        };

        if let Some(timer) = superseded {
            timer.cancel();
        }
    }

    fn fire(&self, cycle: u64) {
        let fired = {
            let mut state = self.lock();
            self.evaluate(&mut state, cycle)
        };

        match fired {
            Fired::Stale => {}
            Fired::Extended { cycle, delay } => self.schedule(cycle, delay),
            Fired::TimedOut {
                factory,
                reporter,
                elapsed,
            } => {
                tracing::debug!(
                    method = %self.shared.method,
                    url = %self.shared.url,
                    elapsed_ms = millis(elapsed),
                    "request timed out"
                );

                let err = factory.make(timeout_message(&self.shared.method, &self.shared.url));
                if let Some(report) = reporter {
                    report(err);
                }
            }
        }
    }

    fn evaluate(&self, state: &mut State, cycle: u64) -> Fired {
        if state.is_terminal() || !state.armed || state.cycle != cycle {
            return Fired::Stale;
        }

        // The handle belongs to the task running right now.
        state.timer = None;
        state.elapsed_total += state.current_timeout;

        if state.elapsed_total >= self.shared.config.get_max_timeout() || !state.activity {
            state.timed_out = true;
            state.armed = false;
            let factory = state
                .factory
                .take()
                .unwrap_or_else(|| self.shared.config.get_error_factory().clone());

            return Fired::TimedOut {
                factory,
                reporter: state.reporter.take(),
                elapsed: state.elapsed_total,
            };
        }

        state.activity = false;
        tracing::debug!(
            method = %self.shared.method,
            url = %self.shared.url,
            elapsed_ms = millis(state.elapsed_total),
            "response still being written, extending request timeout"
        );
        let (cycle, _) = state.next_cycle();
        Fired::Extended {
            cycle,
            delay: state.current_timeout,
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn on_fire(shared: Weak<Shared>, cycle: u64) {
    if let Some(shared) = shared.upgrade() {
        RequestTimeoutGuard { shared }.fire(cycle);
    }
}

impl fmt::Debug for RequestTimeoutGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("RequestTimeoutGuard")
            .field("method", &self.shared.method)
            .field("url", &self.shared.url)
            .field("timeout", &state.current_timeout)
            .field("elapsed", &state.elapsed_total)
            .field("armed", &state.armed)
            .field("finished", &state.finished)
            .field("timed_out", &state.timed_out)
            .finish()
    }
}

/// Controls over a request's timeout, handed to downstream handlers.
///
/// [`RequestTimeout`] inserts one into the request extensions.
///
/// # Example
///
/// ```
/// use tower_http_request_timeout::TimeoutHandle;
/// use http::{Request, Response};
/// use std::{convert::Infallible, time::Duration};
///
/// async fn export(req: Request<String>) -> Result<Response<String>, Infallible> {
///     if let Some(timeout) = req.extensions().get::<TimeoutHandle>() {
///         // This one is known to be slow.
///         timeout.set_timeout(Duration::from_secs(60));
///     }
///     Ok(Response::new(String::new()))
/// }
/// ```
///
/// [`RequestTimeout`]: crate::RequestTimeout
#[derive(Clone, Debug)]
pub struct TimeoutHandle {
    guard: RequestTimeoutGuard,
}

impl TimeoutHandle {
    /// Restart the current cycle with the current duration.
    pub fn reset(&self) {
        self.guard.arm(None, None);
    }

    /// Restart the timeout with a new cycle duration.
    pub fn set_timeout(&self, timeout: Duration) {
        self.guard.arm(Some(timeout), None);
    }

    /// Restart the timeout, reporting with `f` instead of the configured
    /// error factory if it expires.
    ///
    /// Passing `None` keeps the current cycle duration.
    pub fn set_timeout_with<F, E>(&self, timeout: Option<Duration>, f: F)
    where
        F: Fn(String) -> E + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        self.guard.arm(timeout, Some(ErrorFactory::new(f)));
    }

    /// Cancel the pending timeout.
    pub fn clear_timeout(&self) {
        self.guard.disarm();
    }

    /// The duration of the current cycle, not the time remaining.
    pub fn timeout(&self) -> Duration {
        self.guard.timeout()
    }
}

// Finishes the guard when dropped unless it has been taken out.
pub(crate) struct FinishOnDrop {
    guard: Option<RequestTimeoutGuard>,
}

impl FinishOnDrop {
    pub(crate) fn new(guard: impl Into<Option<RequestTimeoutGuard>>) -> Self {
        Self {
            guard: guard.into(),
        }
    }

    pub(crate) fn get(&self) -> Option<&RequestTimeoutGuard> {
        self.guard.as_ref()
    }

    pub(crate) fn take(&mut self) -> Option<RequestTimeoutGuard> {
        self.guard.take()
    }
}

impl Drop for FinishOnDrop {
    fn drop(&mut self) {
        if let Some(guard) = self.guard.take() {
            guard.finish();
        }
    }
}

impl fmt::Debug for FinishOnDrop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FinishOnDrop")
            .field("guard", &self.guard)
            .finish()
    }
}
