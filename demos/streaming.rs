//! Drives a streaming handler and a stalled handler through the middleware
//! and logs what the guard decides.
//!
//! Run with `cargo run --example streaming`.

use bytes::Bytes;
use http::{Request, Response};
use http_body::Frame;
use http_body_util::{BodyExt, Empty, StreamBody};
use std::{
    convert::{Infallible, TryFrom},
    time::Duration,
};
use tokio::sync::mpsc;
use tower::{BoxError, ServiceBuilder, ServiceExt};
use tower_http_request_timeout::{GuardConfig, ServiceBuilderExt, TimeoutHandle};

type Chunk = Result<Frame<Bytes>, Infallible>;

async fn handle(
    req: Request<Empty<Bytes>>,
) -> Result<Response<StreamBody<ChunkStream>>, Infallible> {
    let (tx, rx) = mpsc::channel::<Chunk>(1);
    let ticks = if req.uri().path() == "/stall" { 1 } else { 5 };

    if let Some(timeout) = req.extensions().get::<TimeoutHandle>() {
        let timeout_ms = u64::try_from(timeout.timeout().as_millis()).unwrap_or(u64::MAX);
        tracing::info!(timeout_ms, "handler started");
    }

    tokio::spawn(async move {
        for n in 0..ticks {
            tokio::time::sleep(Duration::from_millis(300)).await;
            if tx.send(Ok(Frame::data(Bytes::from(format!("tick {}\n", n))))).await.is_err() {
                return;
            }
        }
        if ticks == 1 {
            // Hold the stream open without writing.
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
    });

    Ok(Response::new(StreamBody::new(ChunkStream(rx))))
}

struct ChunkStream(mpsc::Receiver<Chunk>);

impl futures_core::Stream for ChunkStream {
    type Item = Chunk;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        self.0.poll_recv(cx)
    }
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .init();

    let config = GuardConfig::new()
        .timeout(Duration::from_millis(500))
        .max_timeout(Duration::from_secs(2));

    for path in ["/stream", "/stall"] {
        let svc = ServiceBuilder::new()
            .request_timeout(config.clone())
            .service_fn(handle);

        let req = Request::get(path).body(Empty::new())?;
        let res = svc.oneshot(req).await?;

        match res.into_body().collect().await {
            Ok(body) => tracing::info!(path, bytes = body.to_bytes().len(), "completed"),
            Err(err) => tracing::warn!(path, %err, "aborted"),
        }
    }

    Ok(())
}
