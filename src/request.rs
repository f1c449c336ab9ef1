//! Requests and sessions: the units of pipeline admission.
//!
//! A [`Request`] pairs an encoder (appending one or more frontend messages
//! to the outbound buffer) with the reply parser that consumes its
//! response. Requests are atomic: their bytes enter the wire contiguously
//! and their parser occupies exactly one pipeline slot, so a multi-message
//! request (Parse + Bind + Execute + Sync) is the way to get wire-level
//! pipelining inside one logical operation.
//!
//! A [`Session`] chains requests where each next request may depend on the
//! previous reply. It is deliberately plain data - `Pure` or a request
//! whose parsed value is the rest of the session - stepped by
//! [`Dispatcher::run_session`](crate::dispatch::Dispatcher::run_session).
//! Inner requests stay separate pipeline entries; the next is submitted
//! once its predecessor's result is available.

use bytes::BytesMut;

use crate::protocol::backend::ColumnDescription;
use crate::protocol::frontend;
use crate::protocol::reply::{
    Ack, Alt, BoxReply, ExtendedQueryReply, ParameterDescriptionReply, ReplyParser,
    ReplyParserExt, RowDescriptionReply, SimpleQueryReply, SkipUntilReady, StartupOutcome,
    StartupReply, UntilReady,
};
use crate::results::ResultSet;

/// One pipeline entry: encoded frontend messages plus the parser for their
/// response.
pub struct Request<R> {
    pub(crate) encode: Box<dyn FnOnce(&mut BytesMut) + Send>,
    pub(crate) parser: BoxReply<R>,
}

impl<R: Send + 'static> Request<R> {
    pub fn new<E, P>(encode: E, parser: P) -> Self
    where
        E: FnOnce(&mut BytesMut) + Send + 'static,
        P: ReplyParser<Output = R> + 'static,
    {
        Self {
            encode: Box::new(encode),
            parser: parser.boxed(),
        }
    }

    /// Map the parsed reply value.
    pub fn map<S, F>(self, f: F) -> Request<S>
    where
        S: Send + 'static,
        F: FnOnce(R) -> S + Send + 'static,
    {
        Request {
            encode: self.encode,
            parser: self.parser.map(f).boxed(),
        }
    }
}

/// Description of a prepared statement.
#[derive(Debug, Clone)]
pub struct StatementDescription {
    /// Oids of the statement's parameters.
    pub parameters: Vec<u32>,
    /// Result columns; empty for statements returning no rows.
    pub columns: Vec<ColumnDescription>,
}

/// Simple-query round trip: `Query(sql)` -> result set.
pub fn simple_query(sql: impl Into<String>) -> Request<ResultSet> {
    let sql = sql.into();
    Request::new(
        move |buf| frontend::query(buf, &sql),
        SimpleQueryReply::new(),
    )
}

/// One extended-protocol batch against the unnamed statement:
/// Parse + Bind + Describe + Execute + Sync.
///
/// `params` are pre-encoded (format code, value) pairs; `max_rows` zero
/// means no limit.
pub fn extended_query(
    sql: impl Into<String>,
    params: Vec<(i16, Option<Vec<u8>>)>,
    max_rows: i32,
) -> Request<ResultSet> {
    let sql = sql.into();
    Request::new(
        move |buf| {
            frontend::parse(buf, "", &sql, &[]);
            let borrowed: Vec<(i16, Option<&[u8]>)> = params
                .iter()
                .map(|(f, v)| (*f, v.as_deref()))
                .collect();
            frontend::bind(buf, "", "", &borrowed, &[1]);
            frontend::describe_portal(buf, "");
            frontend::execute(buf, "", max_rows);
            frontend::sync(buf);
        },
        ExtendedQueryReply::new(),
    )
}

/// Bind + Describe + Execute + Sync against an already-prepared statement.
pub fn execute_prepared(
    statement: impl Into<String>,
    params: Vec<(i16, Option<Vec<u8>>)>,
    max_rows: i32,
) -> Request<ResultSet> {
    let statement = statement.into();
    Request::new(
        move |buf| {
            let borrowed: Vec<(i16, Option<&[u8]>)> = params
                .iter()
                .map(|(f, v)| (*f, v.as_deref()))
                .collect();
            frontend::bind(buf, "", &statement, &borrowed, &[1]);
            frontend::describe_portal(buf, "");
            frontend::execute(buf, "", max_rows);
            frontend::sync(buf);
        },
        ExtendedQueryReply::prepared(),
    )
}

/// Prepare a named statement and describe it:
/// Parse + Describe(statement) + Sync.
pub fn prepare(
    statement: impl Into<String>,
    sql: impl Into<String>,
    param_oids: Vec<u32>,
) -> Request<StatementDescription> {
    let statement = statement.into();
    let sql = sql.into();
    let parser = UntilReady::new(
        Ack::parse_complete()
            .then(ParameterDescriptionReply)
            .then(Alt::new(
                RowDescriptionReply.map(Some),
                Ack::no_data().map(|_| None),
            ))
            .then(SkipUntilReady::new())
            .map(|((((), parameters), columns), _status)| StatementDescription {
                parameters,
                columns: columns.unwrap_or_default(),
            }),
    );
    Request::new(
        move |buf| {
            frontend::parse(buf, &statement, &sql, &param_oids);
            frontend::describe_statement(buf, &statement);
            frontend::sync(buf);
        },
        parser,
    )
}

/// Close a named prepared statement: Close(statement) + Sync.
pub fn close_statement(statement: impl Into<String>) -> Request<()> {
    let statement = statement.into();
    let parser = UntilReady::new(
        Ack::close_complete()
            .then(SkipUntilReady::new())
            .map(|_| ()),
    );
    Request::new(
        move |buf| {
            frontend::close_statement(buf, &statement);
            frontend::sync(buf);
        },
        parser,
    )
}

/// The startup message itself; the reply is the first authentication
/// challenge (or a completed startup on trust auth).
pub fn startup(params: Vec<(String, String)>) -> Request<StartupOutcome> {
    Request::new(
        move |buf| {
            let borrowed: Vec<(&str, &str)> =
                params.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
            frontend::startup(buf, &borrowed);
        },
        StartupReply::new(),
    )
}

/// One authentication response (password or SASL payload); the reply is
/// the next challenge or the completed startup.
pub fn auth_response(payload: Vec<u8>) -> Request<StartupOutcome> {
    Request::new(
        move |buf| frontend::password(buf, &payload),
        StartupReply::new(),
    )
}

/// A free sequential composition of requests.
pub enum Session<R> {
    /// A finished session carrying its value.
    Pure(R),
    /// Run the request; its parsed value is the rest of the session.
    Free(Request<Session<R>>),
}

/// One step of session interpretation.
pub enum SessionStep<R> {
    Finished(R),
    Perform(Request<Session<R>>),
}

impl<R: Send + 'static> Session<R> {
    pub fn pure(value: R) -> Self {
        Session::Pure(value)
    }

    /// A single-request session.
    pub fn request(req: Request<R>) -> Self {
        Session::Free(req.map(Session::Pure))
    }

    /// Run `req`, then continue with whatever session `k` builds from its
    /// reply.
    pub fn bind<A, K>(req: Request<A>, k: K) -> Self
    where
        A: Send + 'static,
        K: FnOnce(A) -> Session<R> + Send + 'static,
    {
        Session::Free(req.map(k))
    }

    /// Step the session: either it is finished, or the next request (whose
    /// parsed value is the continuation) must be performed.
    pub fn step(self) -> SessionStep<R> {
        match self {
            Session::Pure(value) => SessionStep::Finished(value),
            Session::Free(req) => SessionStep::Perform(req),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::framing::{BackendMessage, tag};
    use crate::protocol::reply::Step;
    use bytes::Bytes;

    fn msg(t: u8, payload: &[u8]) -> BackendMessage {
        BackendMessage {
            tag: t,
            payload: Bytes::copy_from_slice(payload),
        }
    }

    fn encoded<R>(req: &mut Request<R>) -> BytesMut {
        let mut buf = BytesMut::new();
        let encode = std::mem::replace(&mut req.encode, Box::new(|_| {}));
        encode(&mut buf);
        buf
    }

    fn message_tags(mut buf: &[u8]) -> Vec<u8> {
        let mut tags = Vec::new();
        while buf.len() >= 5 {
            tags.push(buf[0]);
            let len = i32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]) as usize;
            buf = &buf[1 + len..];
        }
        tags
    }

    #[test]
    fn extended_query_encodes_full_batch() {
        let mut req = extended_query("SELECT $1", vec![(1, Some(vec![0, 0, 0, 5]))], 0);
        let buf = encoded(&mut req);
        assert_eq!(message_tags(&buf), vec![b'P', b'B', b'D', b'E', b'S']);
    }

    #[test]
    fn prepare_encodes_parse_describe_sync() {
        let mut req = prepare("s1", "SELECT 1", vec![]);
        let buf = encoded(&mut req);
        assert_eq!(message_tags(&buf), vec![b'P', b'D', b'S']);
    }

    #[test]
    fn prepare_reply_yields_description() {
        let mut req = prepare("s1", "SELECT 1", vec![]);
        let p = &mut req.parser;
        assert!(matches!(p.feed(&msg(tag::PARSE_COMPLETE, b"")), Step::NeedMore));
        let mut oids = Vec::new();
        oids.extend_from_slice(&1i16.to_be_bytes());
        oids.extend_from_slice(&23u32.to_be_bytes());
        assert!(matches!(
            p.feed(&msg(tag::PARAMETER_DESCRIPTION, &oids)),
            Step::NeedMore
        ));
        assert!(matches!(p.feed(&msg(tag::NO_DATA, b"")), Step::NeedMore));
        match p.feed(&msg(tag::READY_FOR_QUERY, b"I")) {
            Step::Done(desc) => {
                assert_eq!(desc.parameters, vec![23]);
                assert!(desc.columns.is_empty());
            }
            other => panic!("expected statement description, got {other:?}"),
        }
    }

    #[test]
    fn session_steps_through_chained_requests() {
        // a session whose second request depends on the first reply
        let session: Session<String> = Session::bind(
            simple_query("SELECT 'a'"),
            |set: ResultSet| {
                let n = set.rows.len();
                Session::bind(simple_query(format!("SELECT {n}")), move |set2| {
                    Session::pure(format!("{n}/{}", set2.rows.len()))
                })
            },
        );

        // step 1: perform the first request by hand
        let SessionStep::Perform(mut req) = session.step() else {
            panic!("expected a request step");
        };
        let buf = encoded(&mut req);
        assert_eq!(message_tags(&buf), vec![b'Q']);
        let next = match req.parser.feed(&msg(tag::READY_FOR_QUERY, b"I")) {
            Step::Done(next) => next,
            _ => panic!("expected session continuation"),
        };

        // step 2: the continuation is again a request
        let SessionStep::Perform(mut req2) = next.step() else {
            panic!("expected a second request step");
        };
        let final_session = match req2.parser.feed(&msg(tag::READY_FOR_QUERY, b"I")) {
            Step::Done(s) => s,
            _ => panic!("expected session continuation"),
        };
        let SessionStep::Finished(value) = final_session.step() else {
            panic!("expected a finished session");
        };
        assert_eq!(value, "0/0");
    }
}
