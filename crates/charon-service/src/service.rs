//! The service façade and its fixed worker pool.
//!
//! Requests are enqueued from the bus edge and drained by worker threads.
//! Per-request events stream back through an injected [`EventSink`]:
//! `data` once per requested virtual path, then a terminal `completed` or
//! `error`. The enqueue acknowledgement is delivered under a barrier lock
//! that every worker takes before dispatching, so a successful
//! `start_request` is observable before any event for that id.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use charon::{DataMap, FileFormat, OpenMode, VirtualFile};

use crate::queue::{JobQueue, Request, MAX_QUEUE_SIZE};

/// The fixed number of worker threads.
pub const WORKER_COUNT: usize = 2;

/// The terminal error message of a cancelled request.
pub const CANCELED_MESSAGE: &str = "Request canceled";

/// Receives the per-request events of the service. Implementations forward
/// them onto the bus transport.
pub trait EventSink: Send + Sync {
    fn data(&self, request_id: &str, data: DataMap);
    fn completed(&self, request_id: &str);
    fn error(&self, request_id: &str, message: &str);
}

pub struct FileService {
    queue: Arc<JobQueue>,
    sink: Arc<dyn EventSink>,
    /// Not a mutual exclusion of work: a barrier ordering the enqueue
    /// acknowledgement before any event for the request.
    barrier: Arc<Mutex<()>>,
    workers: Vec<JoinHandle<()>>,
}

impl FileService {
    /// Starts the service with the standard worker pool.
    pub fn start(sink: Arc<dyn EventSink>) -> Self {
        Self::with_queue(Arc::new(JobQueue::new(MAX_QUEUE_SIZE)), sink, WORKER_COUNT)
    }

    /// Starts the service over an existing queue, with an explicit worker
    /// count. Embedders and tests use this to control dispatch.
    pub fn with_queue(queue: Arc<JobQueue>, sink: Arc<dyn EventSink>, worker_count: usize) -> Self {
        let barrier = Arc::new(Mutex::new(()));
        let workers = (0..worker_count)
            .map(|index| {
                let queue = queue.clone();
                let sink = sink.clone();
                let barrier = barrier.clone();
                std::thread::Builder::new()
                    .name(format!("charon-worker-{}", index))
                    .spawn(move || worker_loop(queue, sink, barrier))
                    .unwrap_or_else(|err| panic!("failed to spawn worker thread: {}", err))
            })
            .collect();

        FileService {
            queue,
            sink,
            barrier,
            workers,
        }
    }

    /// Enqueues a request and delivers the acknowledgement through `ack`
    /// while the barrier is held, so no event for the id can precede it.
    /// Returns whether the request was accepted.
    pub fn start_request<F: FnOnce(bool)>(
        &self,
        id: &str,
        file_path: &str,
        virtual_paths: Vec<String>,
        ack: F,
    ) -> bool {
        let guard = self
            .barrier
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let accepted = match self
            .queue
            .enqueue(Request::new(id, file_path, virtual_paths))
        {
            Ok(()) => true,
            Err(err) => {
                tracing::debug!(id, error = %err, "rejecting request");
                false
            }
        };
        ack(accepted);
        drop(guard);
        accepted
    }

    /// Soft-cancels a queued request. On success the terminal error event is
    /// emitted immediately; a request already being executed runs to
    /// completion instead.
    pub fn cancel_request(&self, id: &str) {
        if self.queue.cancel(id) {
            self.sink.error(id, CANCELED_MESSAGE);
        } else {
            tracing::debug!(id, "cancel requested for an id that is not queued");
        }
    }

    /// Stops accepting work and joins the workers.
    pub fn shutdown(self) {
        self.queue.shut_down();
        for worker in self.workers {
            if worker.join().is_err() {
                tracing::warn!("a worker thread panicked during shutdown");
            }
        }
    }
}

fn worker_loop(queue: Arc<JobQueue>, sink: Arc<dyn EventSink>, barrier: Arc<Mutex<()>>) {
    while let Some(request) = queue.take_next() {
        if request.cancelled {
            tracing::debug!(id = %request.id, "discarding soft-cancelled request");
            continue;
        }
        // Wait for the enqueuer to finish delivering the acknowledgement.
        drop(
            barrier
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| execute(&request, sink.as_ref())));
        if outcome.is_err() {
            tracing::warn!(id = %request.id, "request execution panicked");
        }
    }
}

/// Runs one request to completion, emitting its events. Any error becomes a
/// single terminal `error` event; `completed` is only emitted after every
/// `data` event succeeded.
fn execute(request: &Request, sink: &dyn EventSink) {
    tracing::debug!(id = %request.id, file = %request.file_path, "executing request");
    match run(request, sink) {
        Ok(()) => sink.completed(&request.id),
        Err(err) => {
            tracing::debug!(id = %request.id, error = %err, "request failed");
            sink.error(&request.id, &err.to_string());
        }
    }
}

fn run(request: &Request, sink: &dyn EventSink) -> charon::Result<()> {
    let mut file = VirtualFile::open(&request.file_path, OpenMode::ReadOnly)?;
    for virtual_path in &request.virtual_paths {
        let data = file.get_data(virtual_path)?;
        sink.data(&request.id, data);
    }
    file.close()?;
    Ok(())
}
