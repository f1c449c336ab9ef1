//! Pending pipeline entries: the parser/continuation pairs the interpreter
//! consumes in submission order.

use bytes::BytesMut;
use tokio::sync::oneshot;

use crate::error::{PgPipeError, Result};
use crate::protocol::framing::BackendMessage;
use crate::protocol::reply::{ReplyParser, Step};

/// One encoding job for the serializer loop: a closure that appends one or
/// more complete frontend messages to the outbound buffer.
pub(crate) struct SerializeItem {
    pub encode: Box<dyn FnOnce(&mut BytesMut) + Send>,
}

/// Outcome of feeding one message to a processor.
pub(crate) enum Feed {
    NeedMore,
    /// The continuation has been fulfilled; the interpreter returns to idle.
    Complete,
    /// The continuation has been fulfilled with a protocol error; pipeline
    /// sync is lost and the connection must close.
    Failed(String),
}

/// A type-erased (reply parser, continuation) pair.
///
/// The continuation observes exactly one outcome: `feed` and `abort` both
/// fulfil through a consumed-once sender.
pub(crate) trait Processor: Send {
    fn feed(&mut self, msg: &BackendMessage) -> Feed;

    /// Fulfil the continuation with `err` without further parsing. Used on
    /// teardown so pending result cells observe the transport error.
    fn abort(self: Box<Self>, err: PgPipeError);
}

pub(crate) type BoxProcessor = Box<dyn Processor>;

pub(crate) struct TypedProcessor<P: ReplyParser> {
    parser: P,
    tx: Option<oneshot::Sender<Result<P::Output>>>,
}

impl<P: ReplyParser> TypedProcessor<P> {
    pub fn new(parser: P, tx: oneshot::Sender<Result<P::Output>>) -> Self {
        Self {
            parser,
            tx: Some(tx),
        }
    }

    fn fulfil(&mut self, outcome: Result<P::Output>) {
        if let Some(tx) = self.tx.take() {
            // the caller may have given up; a dropped receiver is fine
            let _ = tx.send(outcome);
        }
    }
}

impl<P> Processor for TypedProcessor<P>
where
    P: ReplyParser,
    P::Output: Send,
{
    fn feed(&mut self, msg: &BackendMessage) -> Feed {
        match self.parser.feed(msg) {
            Step::NeedMore => Feed::NeedMore,
            Step::Done(value) => {
                self.fulfil(Ok(value));
                Feed::Complete
            }
            Step::Backend(err) => {
                self.fulfil(Err(PgPipeError::Server(err)));
                Feed::Complete
            }
            Step::Fail(text) => {
                self.fulfil(Err(PgPipeError::Protocol(text.clone())));
                Feed::Failed(text)
            }
        }
    }

    fn abort(mut self: Box<Self>, err: PgPipeError) {
        self.fulfil(Err(err));
    }
}
