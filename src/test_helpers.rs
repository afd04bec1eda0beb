use crate::scheduler::{Scheduler, Task, TaskHandle};
use bytes::Bytes;
use http::HeaderMap;
use http_body::Frame;
use std::{
    convert::Infallible,
    fmt,
    pin::Pin,
    sync::{Arc, Mutex},
    task::{Context, Poll},
    time::Duration,
};
use tokio::sync::mpsc;

/// A [`Scheduler`] whose clock only moves when told to.
#[derive(Clone, Debug)]
pub(crate) struct ManualScheduler {
    queue: Arc<Mutex<Queue>>,
}

struct Queue {
    now: Duration,
    next_id: u64,
    honour_cancel: bool,
    entries: Vec<Entry>,
}

struct Entry {
    id: u64,
    deadline: Duration,
    task: Task,
}

impl fmt::Debug for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue")
            .field("now", &self.now)
            .field("pending", &self.entries.len())
            .finish()
    }
}

impl ManualScheduler {
    pub(crate) fn new() -> Self {
        Self::with_cancel(true)
    }

    /// Cancelling a task leaves it queued, like a timer that already fired
    /// but whose callback hasn't run yet.
    pub(crate) fn ignoring_cancel() -> Self {
        Self::with_cancel(false)
    }

    fn with_cancel(honour_cancel: bool) -> Self {
        Self {
            queue: Arc::new(Mutex::new(Queue {
                now: Duration::ZERO,
                next_id: 0,
                honour_cancel,
                entries: Vec::new(),
            })),
        }
    }

    pub(crate) fn now(&self) -> Duration {
        self.queue.lock().unwrap().now
    }

    pub(crate) fn pending(&self) -> usize {
        self.queue.lock().unwrap().entries.len()
    }

    /// Move the clock forward, running due tasks in deadline order.
    pub(crate) fn advance(&self, by: Duration) {
        let target = self.now() + by;

        loop {
            let task = {
                let mut queue = self.queue.lock().unwrap();
                let next = queue
                    .entries
                    .iter()
                    .enumerate()
                    .filter(|(_, entry)| entry.deadline <= target)
                    .min_by_key(|(_, entry)| (entry.deadline, entry.id))
                    .map(|(idx, _)| idx);

                match next {
                    Some(idx) => {
                        let entry = queue.entries.remove(idx);
                        queue.now = entry.deadline;
                        entry.task
                    }
                    None => break,
                }
            };

            // Run outside the lock so the task can schedule more work.
            task();
        }

        self.queue.lock().unwrap().now = target;
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> TaskHandle {
        let mut queue = self.queue.lock().unwrap();
        let id = queue.next_id;
        queue.next_id += 1;
        let deadline = queue.now + delay;
        queue.entries.push(Entry { id, deadline, task });

        let honour_cancel = queue.honour_cancel;
        let weak = Arc::downgrade(&self.queue);
        TaskHandle::new(move || {
            if !honour_cancel {
                return;
            }
            if let Some(queue) = weak.upgrade() {
                queue.lock().unwrap().entries.retain(|entry| entry.id != id);
            }
        })
    }
}

/// Response body fed through a channel so tests decide when frames arrive.
#[derive(Debug)]
pub(crate) struct ChannelBody {
    rx: mpsc::UnboundedReceiver<Frame<Bytes>>,
}

impl ChannelBody {
    pub(crate) fn new() -> (mpsc::UnboundedSender<Frame<Bytes>>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }
}

impl http_body::Body for ChannelBody {
    type Data = Bytes;
    type Error = Infallible;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        self.rx.poll_recv(cx).map(|frame| frame.map(Ok))
    }
}

pub(crate) fn data(chunk: &'static str) -> Frame<Bytes> {
    Frame::data(Bytes::from_static(chunk.as_bytes()))
}

pub(crate) fn trailers() -> Frame<Bytes> {
    let mut trailers = HeaderMap::new();
    trailers.insert("grpc-status", "0".parse().unwrap());
    Frame::trailers(trailers)
}
