//! The five dispatcher loops.
//!
//! Each loop owns exactly one responsibility and communicates only through
//! its queues and the transport fuse. No loop holds a lock across an await;
//! within a loop everything is sequential.
//!
//! Serializer: submit queue -> outgoing bytes. Sender: outgoing bytes ->
//! write half. Receiver: read half -> inbound chunks. Slicer: inbound
//! chunks -> inbound messages. Interpreter: inbound messages + processor
//! queue -> result cells and the unaffiliated sink.

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::sync::Semaphore;
use tracing::{debug, error, trace};

use crate::error::PgPipeError;
use crate::protocol::backend::{parse_error_fields, parse_notification};
use crate::protocol::framing::{BackendMessage, MessageSlicer, tag};
use crate::protocol::frontend;

use super::AsyncMessage;
use super::fuse::TransportFuse;
use super::processor::{BoxProcessor, Feed, SerializeItem};

/// Serializer: materialise each submitted encoding into one contiguous
/// buffer and push it downstream.
///
/// The byte budget is acquired here and released by the sender after the
/// write, so a slow socket backs pressure up through this loop into
/// `perform`. Oversized buffers clamp to the whole budget and pass one at
/// a time.
pub(crate) async fn run_serializer(
    mut submit_rx: mpsc::Receiver<SerializeItem>,
    outgoing_tx: mpsc::UnboundedSender<Bytes>,
    budget: std::sync::Arc<Semaphore>,
    budget_limit: usize,
    fuse: TransportFuse,
) {
    loop {
        let item = tokio::select! {
            biased;
            _ = fuse.tripped() => break,
            item = submit_rx.recv() => match item {
                Some(item) => item,
                None => break,
            },
        };

        let mut buf = BytesMut::with_capacity(256);
        (item.encode)(&mut buf);
        if buf.is_empty() {
            continue;
        }

        // the sender releases permits only while alive, so guard the
        // acquire with the fuse or a dead sender would strand this loop
        let want = buf.len().min(budget_limit) as u32;
        let permits = tokio::select! {
            biased;
            _ = fuse.tripped() => break,
            permits = budget.clone().acquire_many_owned(want) => match permits {
                Ok(permits) => permits,
                Err(_) => break,
            },
        };
        permits.forget();

        if outgoing_tx.send(buf.freeze()).is_err() {
            break;
        }
    }
    debug!("serializer loop exited");
}

/// Sender: drain byte buffers to the write half.
///
/// `write_all` retries partial writes until each buffer is fully on the
/// wire; the stream is flushed whenever the queue goes momentarily empty.
/// An I/O failure publishes the transport error exactly once and exits. On
/// a stop (as opposed to an I/O failure) already-queued buffers are drained
/// and a Terminate is written best-effort.
pub(crate) async fn run_sender<W>(
    mut writer: W,
    mut outgoing_rx: mpsc::UnboundedReceiver<Bytes>,
    budget: std::sync::Arc<Semaphore>,
    budget_limit: usize,
    fuse: TransportFuse,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            biased;
            err = fuse.tripped() => {
                if err == PgPipeError::stopped() {
                    while let Ok(buf) = outgoing_rx.try_recv() {
                        if writer.write_all(&buf).await.is_err() {
                            break;
                        }
                    }
                    let mut term = BytesMut::with_capacity(5);
                    frontend::terminate(&mut term);
                    let _ = writer.write_all(&term).await;
                    let _ = writer.flush().await;
                }
                break;
            }
            buf = outgoing_rx.recv() => {
                let Some(buf) = buf else {
                    let _ = writer.flush().await;
                    break;
                };
                let released = buf.len().min(budget_limit);
                if let Err(e) = writer.write_all(&buf).await {
                    error!("socket write failed: {e}");
                    fuse.trip(e.into());
                    break;
                }
                budget.add_permits(released);
                if outgoing_rx.is_empty() {
                    if let Err(e) = writer.flush().await {
                        error!("socket flush failed: {e}");
                        fuse.trip(e.into());
                        break;
                    }
                }
            }
        }
    }
    debug!("sender loop exited");
}

/// Receiver: read raw chunks off the read half.
pub(crate) async fn run_receiver<R>(
    mut reader: R,
    chunk_tx: mpsc::Sender<Bytes>,
    read_buffer_size: usize,
    fuse: TransportFuse,
) where
    R: AsyncRead + Unpin,
{
    loop {
        let mut buf = BytesMut::with_capacity(read_buffer_size);
        tokio::select! {
            biased;
            _ = fuse.tripped() => break,
            res = reader.read_buf(&mut buf) => match res {
                Ok(0) => {
                    fuse.trip(PgPipeError::Transport("unexpected EOF".into()));
                    break;
                }
                Ok(n) => {
                    trace!("read {n} bytes");
                    if chunk_tx.send(buf.freeze()).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    error!("socket read failed: {e}");
                    fuse.trip(e.into());
                    break;
                }
            },
        }
    }
    debug!("receiver loop exited");
}

/// Slicer: frame the chunk stream into discrete messages.
///
/// A framing failure means the byte stream is unrecoverable, so it trips
/// the fuse rather than surfacing per-request.
///
/// Termination is by channel closure, not by watching the fuse: chunks
/// already received must still be framed and delivered so replies that
/// beat a transport error onto the wire reach their processors. The
/// receiver exits on the fuse and closes the chunk queue, which cascades
/// here.
pub(crate) async fn run_slicer(
    mut chunk_rx: mpsc::Receiver<Bytes>,
    msg_tx: mpsc::Sender<BackendMessage>,
    fuse: TransportFuse,
) {
    let mut slicer = MessageSlicer::new();
    'outer: loop {
        let Some(chunk) = chunk_rx.recv().await else {
            break;
        };
        slicer.push_chunk(&chunk);
        loop {
            match slicer.next_message() {
                Ok(Some(msg)) => {
                    trace!("framed '{}' ({} bytes)", msg.tag as char, msg.payload.len());
                    if msg_tx.send(msg).await.is_err() {
                        break 'outer;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    error!("framing failed: {e}");
                    fuse.trip(e);
                    break 'outer;
                }
            }
        }
    }
    debug!("slicer loop exited");
}

/// Interpreter: dispatch each inbound message to the head pending result
/// processor, or route it to the unaffiliated sink.
///
/// State is a single `Option<BoxProcessor>`: idle or parsing. The processor
/// queue is polled only *after* a message arrives - a pre-check would race
/// with submissions that happen while this loop is blocked on the message
/// queue. A freshly dequeued processor receives the very message that woke
/// the loop.
///
/// Like the slicer, this loop terminates on channel closure so that every
/// message framed before the transport died is still interpreted; a server
/// error followed by a hangup surfaces as the server error, not the hangup.
pub(crate) async fn run_interpreter(
    mut msg_rx: mpsc::Receiver<BackendMessage>,
    mut proc_rx: mpsc::UnboundedReceiver<BoxProcessor>,
    sink: mpsc::UnboundedSender<AsyncMessage>,
    fuse: TransportFuse,
) {
    let mut current: Option<BoxProcessor> = None;

    loop {
        let Some(msg) = msg_rx.recv().await else {
            break;
        };

        // NOTIFY can arrive in either state and is never part of a reply
        if msg.is_notification() {
            route_notification(&sink, &msg);
            continue;
        }

        if current.is_none() {
            if let Ok(next) = proc_rx.try_recv() {
                current = Some(next);
            }
        }

        match current.as_mut() {
            Some(processor) => match processor.feed(&msg) {
                Feed::NeedMore => {}
                Feed::Complete => {
                    trace!("reply complete");
                    current = None;
                }
                Feed::Failed(text) => {
                    error!("reply parse failed: {text}");
                    current = None;
                    // pipeline sync is lost; close the connection
                    fuse.trip(PgPipeError::Protocol(text));
                    break;
                }
            },
            None => {
                route_unaffiliated(&sink, &msg);
                // a processor submitted while we were handling the message
                if let Ok(next) = proc_rx.try_recv() {
                    current = Some(next);
                }
            }
        }
    }

    // Teardown: every pending continuation observes the terminal error.
    let err = fuse.get_or_stopped();
    if let Some(processor) = current.take() {
        processor.abort(err.clone());
    }
    proc_rx.close();
    while let Ok(processor) = proc_rx.try_recv() {
        processor.abort(err.clone());
    }
    debug!("interpreter loop exited");
}

fn route_notification(sink: &mpsc::UnboundedSender<AsyncMessage>, msg: &BackendMessage) {
    match parse_notification(&msg.payload) {
        Ok(n) => {
            let _ = sink.send(AsyncMessage::Notification(n));
        }
        Err(e) => {
            let _ = sink.send(AsyncMessage::Protocol(e.to_string()));
        }
    }
}

/// Idle-state routing: notifications and stray errors reach the sink;
/// ReadyForQuery, ParameterStatus, and NoticeResponse are ignored; anything
/// else is reported as a protocol anomaly without blocking the loop.
fn route_unaffiliated(sink: &mpsc::UnboundedSender<AsyncMessage>, msg: &BackendMessage) {
    match msg.tag {
        tag::ERROR_RESPONSE => match parse_error_fields(&msg.payload) {
            Ok(err) => {
                let _ = sink.send(AsyncMessage::Error(err));
            }
            Err(e) => {
                let _ = sink.send(AsyncMessage::Protocol(e.to_string()));
            }
        },
        tag::READY_FOR_QUERY | tag::PARAMETER_STATUS | tag::NOTICE_RESPONSE => {}
        other => {
            let _ = sink.send(AsyncMessage::Protocol(format!(
                "unexpected '{}' in idle state",
                other as char
            )));
        }
    }
}
