//! Request timeouts that give responses still being written extra time.
//!
//! A request is given a fixed amount of time per cycle. When a cycle runs
//! out, the request fails unless the response was written to during that
//! cycle, in which case another cycle starts. Extensions stop once the
//! cumulative time reaches a ceiling, no matter how busy the response is.
//! Requests uploading `multipart/form-data` start with a longer cycle.
//!
//! The crate has two layers:
//!
//! - [`RequestTimeoutGuard`]: the per-request state machine, usable by any
//!   server through [`ObservingResponseSink`].
//! - [`RequestTimeout`]: a tower middleware that drives a guard from the
//!   response future and [`TimeoutBody`].
//!
//! # Example
//!
//! ```rust
//! use bytes::Bytes;
//! use http::{Request, Response};
//! use http_body_util::Full;
//! use std::{convert::Infallible, time::Duration};
//! use tower::{ServiceBuilder, ServiceExt};
//! use tower_http_request_timeout::{GuardConfig, RequestTimeoutError, ServiceBuilderExt};
//!
//! async fn handle(_: Request<Full<Bytes>>) -> Result<Response<Full<Bytes>>, Infallible> {
//!     tokio::time::sleep(Duration::from_secs(60)).await;
//!     Ok(Response::new(Full::from("too late")))
//! }
//!
//! # #[tokio::main(flavor = "current_thread", start_paused = true)]
//! # async fn main() {
//! let config = GuardConfig::new()
//!     .timeout(Duration::from_secs(10))
//!     .upload_timeout(Duration::from_secs(60))
//!     .max_timeout(Duration::from_secs(600));
//!
//! let service = ServiceBuilder::new()
//!     .request_timeout(config)
//!     .service_fn(handle);
//!
//! let err = service.oneshot(Request::get("/report").body(Full::default()).unwrap())
//!     .await
//!     .unwrap_err();
//!
//! assert!(err.is::<RequestTimeoutError>());
//! assert_eq!(err.to_string(), "Timeout GET /report");
//! # }
//! ```

#![warn(
    clippy::all,
    clippy::dbg_macro,
    clippy::todo,
    clippy::empty_enum,
    clippy::enum_glob_use,
    clippy::mem_forget,
    clippy::unused_self,
    clippy::filter_map_next,
    clippy::needless_continue,
    clippy::needless_borrow,
    clippy::match_wildcard_for_single_variants,
    clippy::if_let_mutex,
    clippy::await_holding_lock,
    clippy::imprecise_flops,
    clippy::suboptimal_flops,
    clippy::lossy_float_literal,
    clippy::rest_pat_in_fully_bound_structs,
    clippy::fn_params_excessive_bools,
    clippy::exit,
    clippy::inefficient_to_string,
    clippy::linkedlist,
    clippy::macro_use_imports,
    clippy::option_option,
    clippy::verbose_file_reads,
    clippy::unnested_or_patterns,
    rust_2018_idioms,
    future_incompatible,
    nonstandard_style,
    missing_docs
)]
#![deny(unreachable_pub)]
#![allow(elided_lifetimes_in_paths, clippy::type_complexity)]
#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod body;
mod builder;
mod config;
mod context;
mod error;
mod future;
mod guard;
mod scheduler;

pub mod service;
pub mod sink;

#[cfg(test)]
mod test_helpers;

pub use self::{
    body::TimeoutBody,
    builder::ServiceBuilderExt,
    config::{
        ErrorFactory, GuardConfig, DEFAULT_MAX_TIMEOUT, DEFAULT_TIMEOUT, DEFAULT_UPLOAD_TIMEOUT,
    },
    context::RequestContext,
    error::RequestTimeoutError,
    future::ResponseFuture,
    guard::{RequestTimeoutGuard, TimeoutHandle},
    scheduler::{Scheduler, Task, TaskHandle, TokioScheduler},
    service::{RequestTimeout, RequestTimeoutLayer},
    sink::{ObservingResponseSink, ResponseSink},
};
