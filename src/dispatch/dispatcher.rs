use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Mutex, Semaphore, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::ConnectConfig;
use crate::error::{PgPipeError, Result};
use crate::request::{Request, Session, SessionStep};

use super::AsyncMessage;
use super::fuse::TransportFuse;
use super::loops;
use super::processor::{BoxProcessor, SerializeItem, TypedProcessor};

/// Handle to a running connection dispatcher.
///
/// Cloneable; all clones share the same pipeline. Requests submitted from
/// any number of tasks are admitted atomically, so the order of admission
/// equals the order on the wire equals the order replies are parsed.
#[derive(Clone)]
pub struct Dispatcher {
    shared: Arc<Shared>,
}

struct Shared {
    submit_tx: mpsc::Sender<SerializeItem>,
    processor_tx: mpsc::UnboundedSender<BoxProcessor>,
    /// Held across the two enqueues of one submission, and never across
    /// anything else.
    submit_lock: Mutex<()>,
    fuse: TransportFuse,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Spawn the five loops over `stream` and return the handle.
    ///
    /// Unaffiliated messages (notifications, stray errors) are routed to
    /// `sink`; dropping the receiving end discards them without blocking
    /// the interpreter. Must be called within a tokio runtime.
    pub fn start<S>(
        stream: S,
        sink: mpsc::UnboundedSender<AsyncMessage>,
        cfg: &ConnectConfig,
    ) -> Dispatcher
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let fuse = TransportFuse::new();

        let (submit_tx, submit_rx) = mpsc::channel(cfg.submit_queue_depth.max(1));
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel::<Bytes>();
        let (chunk_tx, chunk_rx) = mpsc::channel(cfg.inbound_chunk_depth.max(1));
        let (msg_tx, msg_rx) = mpsc::channel(cfg.inbound_message_depth.max(1));
        let (processor_tx, processor_rx) = mpsc::unbounded_channel::<BoxProcessor>();

        let budget_limit = cfg.outgoing_buffer_bytes.max(1);
        let budget = Arc::new(Semaphore::new(budget_limit));

        let tasks = vec![
            tokio::spawn(loops::run_serializer(
                submit_rx,
                outgoing_tx,
                budget.clone(),
                budget_limit,
                fuse.clone(),
            )),
            tokio::spawn(loops::run_sender(
                writer,
                outgoing_rx,
                budget,
                budget_limit,
                fuse.clone(),
            )),
            tokio::spawn(loops::run_receiver(
                reader,
                chunk_tx,
                cfg.read_buffer_size.max(1),
                fuse.clone(),
            )),
            tokio::spawn(loops::run_slicer(chunk_rx, msg_tx, fuse.clone())),
            tokio::spawn(loops::run_interpreter(
                msg_rx,
                processor_rx,
                sink,
                fuse.clone(),
            )),
        ];
        debug!("dispatcher started");

        Dispatcher {
            shared: Arc::new(Shared {
                submit_tx,
                processor_tx,
                submit_lock: Mutex::new(()),
                fuse,
                tasks: std::sync::Mutex::new(tasks),
            }),
        }
    }

    /// Submit one request and wait for its reply.
    ///
    /// The request's encoder and its result processor are enqueued under
    /// one lock - the only point where pipeline ordering is established.
    /// The processor goes first: its bytes must never reach the wire before
    /// the interpreter can claim their response.
    pub async fn perform<R: Send + 'static>(&self, request: Request<R>) -> Result<R> {
        let shared = &self.shared;
        if let Some(err) = shared.fuse.get() {
            return Err(err);
        }

        let (tx, rx) = oneshot::channel();
        let processor: BoxProcessor = Box::new(TypedProcessor::new(request.parser, tx));

        {
            let _guard = shared.submit_lock.lock().await;
            shared
                .processor_tx
                .send(processor)
                .map_err(|_| shared.fuse.get_or_stopped())?;
            shared
                .submit_tx
                .send(SerializeItem {
                    encode: request.encode,
                })
                .await
                .map_err(|_| shared.fuse.get_or_stopped())?;
        }

        // Guard the wait with the fuse: a transport error published before
        // the reply resolves this call with that error.
        tokio::select! {
            biased;
            outcome = rx => match outcome {
                Ok(outcome) => outcome,
                Err(_) => Err(shared.fuse.get_or_stopped()),
            },
            err = shared.fuse.tripped() => Err(err),
        }
    }

    /// Drive a session to completion: perform each request, feed its reply
    /// to the continuation, repeat. Transport and protocol errors
    /// short-circuit; so do server errors, without closing the connection.
    pub async fn run_session<R: Send + 'static>(&self, session: Session<R>) -> Result<R> {
        let mut session = session;
        loop {
            match session.step() {
                SessionStep::Finished(value) => return Ok(value),
                SessionStep::Perform(request) => session = self.perform(request).await?,
            }
        }
    }

    /// The terminal error, if the connection has already failed.
    pub fn terminal_error(&self) -> Option<PgPipeError> {
        self.shared.fuse.get()
    }

    /// Graceful shutdown: tear down all loops and wait for them.
    ///
    /// In-flight and subsequent requests resolve with a "connection
    /// stopped" transport error. Queued outbound bytes are drained and a
    /// Terminate is written best-effort before the socket drops.
    pub async fn stop(&self) {
        self.shared.fuse.trip(PgPipeError::stopped());
        let tasks = {
            let mut guard = self.shared.tasks.lock().expect("task list lock");
            std::mem::take(&mut *guard)
        };
        for task in tasks {
            if let Err(e) = task.await {
                tracing::error!("dispatcher loop panicked: {e}");
            }
        }
        debug!("dispatcher stopped");
    }
}
