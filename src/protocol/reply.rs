//! Reply parsers: state machines over the inbound message stream.
//!
//! A reply parser consumes backend messages one at a time and either needs
//! more input, completes with a value, completes with a server error, or
//! fails with a protocol error. The interpreter feeds the active parser;
//! parsers never perform I/O.
//!
//! Parsers compose sequentially ([`Then`], [`map`](ReplyParserExt::map)) and
//! alternatively ([`Alt`], dispatching on the first significant message's
//! tag). Every parser accepts intervening NoticeResponse and ParameterStatus
//! messages transparently, and treats ErrorResponse at any accepted position
//! as a complete reply carrying a [`BackendError`] - a server error is an
//! expected shape, not a protocol failure.

use bytes::Bytes;

use crate::error::BackendError;
use crate::protocol::backend::{
    self, AuthRequest, BackendKeyData, ColumnDescription, CommandTag, ParameterStatus,
    TransactionStatus,
};
use crate::protocol::framing::{BackendMessage, tag};
use crate::results::ResultSet;

/// Outcome of feeding one message to a reply parser.
#[derive(Debug)]
pub enum Step<T> {
    /// The parser needs the next message.
    NeedMore,
    /// The reply parsed successfully.
    Done(T),
    /// The server answered this request with an ErrorResponse. The parse is
    /// complete; the connection stays usable.
    Backend(BackendError),
    /// The message stream did not match the expected reply shape. Terminal
    /// for the connection.
    Fail(String),
}

/// A state machine consuming a stream of backend messages.
pub trait ReplyParser: Send {
    type Output;

    fn feed(&mut self, msg: &BackendMessage) -> Step<Self::Output>;

    /// Whether this parser claims `tag` as its first significant message.
    /// Used by [`Alt`] to choose a branch.
    fn accepts(&self, tag: u8) -> bool {
        let _ = tag;
        true
    }
}

/// A boxed reply parser, as carried by requests.
pub type BoxReply<T> = Box<dyn ReplyParser<Output = T> + Send>;

impl<T> ReplyParser for BoxReply<T> {
    type Output = T;

    fn feed(&mut self, msg: &BackendMessage) -> Step<T> {
        (**self).feed(msg)
    }

    fn accepts(&self, tag: u8) -> bool {
        (**self).accepts(tag)
    }
}

/// Messages every parser skips without consuming its position.
#[inline]
fn is_transparent(t: u8) -> bool {
    t == tag::NOTICE_RESPONSE || t == tag::PARAMETER_STATUS
}

/// Decode an ErrorResponse payload into a [`Step`]: a malformed error
/// response is itself a protocol failure.
fn backend_step<T>(payload: &Bytes) -> Step<T> {
    match backend::parse_error_fields(payload) {
        Ok(err) => Step::Backend(err),
        Err(e) => Step::Fail(e.to_string()),
    }
}

pub trait ReplyParserExt: ReplyParser + Sized {
    /// Map the parsed value.
    fn map<U, F>(self, f: F) -> Map<Self, F>
    where
        F: FnOnce(Self::Output) -> U + Send,
    {
        Map {
            inner: self,
            f: Some(f),
        }
    }

    /// Run `self`, then `next`, yielding both outputs.
    fn then<B: ReplyParser>(self, next: B) -> Then<Self, B> {
        Then {
            first: self,
            second: next,
            first_out: None,
        }
    }

    fn boxed(self) -> BoxReply<Self::Output>
    where
        Self: 'static,
    {
        Box::new(self)
    }
}

impl<P: ReplyParser + Sized> ReplyParserExt for P {}

/// Sequential composition: see [`ReplyParserExt::then`].
pub struct Then<A: ReplyParser, B> {
    first: A,
    second: B,
    first_out: Option<A::Output>,
}

impl<A, B> ReplyParser for Then<A, B>
where
    A: ReplyParser,
    A::Output: Send,
    B: ReplyParser,
{
    type Output = (A::Output, B::Output);

    fn feed(&mut self, msg: &BackendMessage) -> Step<Self::Output> {
        if self.first_out.is_none() {
            return match self.first.feed(msg) {
                Step::NeedMore => Step::NeedMore,
                Step::Done(v) => {
                    self.first_out = Some(v);
                    Step::NeedMore
                }
                Step::Backend(e) => Step::Backend(e),
                Step::Fail(s) => Step::Fail(s),
            };
        }
        match self.second.feed(msg) {
            Step::NeedMore => Step::NeedMore,
            Step::Done(v) => Step::Done((
                self.first_out.take().expect("first output present"),
                v,
            )),
            Step::Backend(e) => Step::Backend(e),
            Step::Fail(s) => Step::Fail(s),
        }
    }

    fn accepts(&self, tag: u8) -> bool {
        self.first.accepts(tag)
    }
}

/// Output mapping: see [`ReplyParserExt::map`].
pub struct Map<P, F> {
    inner: P,
    f: Option<F>,
}

impl<P, U, F> ReplyParser for Map<P, F>
where
    P: ReplyParser,
    F: FnOnce(P::Output) -> U + Send,
{
    type Output = U;

    fn feed(&mut self, msg: &BackendMessage) -> Step<U> {
        match self.inner.feed(msg) {
            Step::NeedMore => Step::NeedMore,
            Step::Done(v) => match self.f.take() {
                Some(f) => Step::Done(f(v)),
                None => Step::Fail("reply parser polled after completion".into()),
            },
            Step::Backend(e) => Step::Backend(e),
            Step::Fail(s) => Step::Fail(s),
        }
    }

    fn accepts(&self, tag: u8) -> bool {
        self.inner.accepts(tag)
    }
}

/// Choice on the first significant message's tag.
///
/// Transparent messages are skipped before committing; once a branch claims
/// the tag, all further input goes to that branch.
pub struct Alt<A, B> {
    a: Option<A>,
    b: Option<B>,
    committed_a: Option<A>,
    committed_b: Option<B>,
}

impl<A, B> Alt<A, B> {
    pub fn new(a: A, b: B) -> Self {
        Self {
            a: Some(a),
            b: Some(b),
            committed_a: None,
            committed_b: None,
        }
    }
}

impl<A, B, T> ReplyParser for Alt<A, B>
where
    A: ReplyParser<Output = T> + Send,
    B: ReplyParser<Output = T> + Send,
{
    type Output = T;

    fn feed(&mut self, msg: &BackendMessage) -> Step<T> {
        if let Some(p) = &mut self.committed_a {
            return p.feed(msg);
        }
        if let Some(p) = &mut self.committed_b {
            return p.feed(msg);
        }
        if is_transparent(msg.tag) {
            return Step::NeedMore;
        }
        let mut a = self.a.take().expect("uncommitted alt holds both branches");
        let mut b = self.b.take().expect("uncommitted alt holds both branches");
        if a.accepts(msg.tag) {
            let step = a.feed(msg);
            self.committed_a = Some(a);
            step
        } else {
            let step = b.feed(msg);
            self.committed_b = Some(b);
            step
        }
    }

    fn accepts(&self, tag: u8) -> bool {
        match (&self.a, &self.b) {
            (Some(a), Some(b)) => a.accepts(tag) || b.accepts(tag),
            _ => true,
        }
    }
}

/// Wrap an RFQ-terminated reply so that a server error drains the rest of
/// the response (the server skips to Sync and sends ReadyForQuery) before
/// completing. Without the drain, the trailing ReadyForQuery would leak
/// into the next pipeline entry.
pub struct UntilReady<P> {
    inner: P,
    failed: Option<BackendError>,
}

impl<P> UntilReady<P> {
    pub fn new(inner: P) -> Self {
        Self {
            inner,
            failed: None,
        }
    }
}

impl<P: ReplyParser> ReplyParser for UntilReady<P> {
    type Output = P::Output;

    fn feed(&mut self, msg: &BackendMessage) -> Step<P::Output> {
        if self.failed.is_some() {
            return if msg.tag == tag::READY_FOR_QUERY {
                Step::Backend(self.failed.take().expect("failure captured"))
            } else {
                Step::NeedMore
            };
        }
        match self.inner.feed(msg) {
            Step::Backend(e) => {
                self.failed = Some(e);
                Step::NeedMore
            }
            step => step,
        }
    }

    fn accepts(&self, tag: u8) -> bool {
        self.inner.accepts(tag)
    }
}

/// Expect a single bodiless acknowledgement message.
///
/// Covers ParseComplete, BindComplete, CloseComplete, and NoData.
pub struct Ack {
    expect: u8,
    what: &'static str,
}

impl Ack {
    pub fn parse_complete() -> Self {
        Self {
            expect: tag::PARSE_COMPLETE,
            what: "ParseComplete",
        }
    }

    pub fn bind_complete() -> Self {
        Self {
            expect: tag::BIND_COMPLETE,
            what: "BindComplete",
        }
    }

    pub fn close_complete() -> Self {
        Self {
            expect: tag::CLOSE_COMPLETE,
            what: "CloseComplete",
        }
    }

    pub fn no_data() -> Self {
        Self {
            expect: tag::NO_DATA,
            what: "NoData",
        }
    }
}

impl ReplyParser for Ack {
    type Output = ();

    fn feed(&mut self, msg: &BackendMessage) -> Step<()> {
        if is_transparent(msg.tag) {
            return Step::NeedMore;
        }
        if msg.tag == tag::ERROR_RESPONSE {
            return backend_step(&msg.payload);
        }
        if msg.tag == self.expect {
            Step::Done(())
        } else {
            Step::Fail(format!(
                "expected {} ('{}'), got '{}'",
                self.what, self.expect as char, msg.tag as char
            ))
        }
    }

    fn accepts(&self, tag: u8) -> bool {
        tag == self.expect || tag == tag::ERROR_RESPONSE
    }
}

/// Expect a RowDescription.
pub struct RowDescriptionReply;

impl ReplyParser for RowDescriptionReply {
    type Output = Vec<ColumnDescription>;

    fn feed(&mut self, msg: &BackendMessage) -> Step<Vec<ColumnDescription>> {
        if is_transparent(msg.tag) {
            return Step::NeedMore;
        }
        match msg.tag {
            tag::ROW_DESCRIPTION => match backend::parse_row_description(&msg.payload) {
                Ok(cols) => Step::Done(cols),
                Err(e) => Step::Fail(e.to_string()),
            },
            tag::ERROR_RESPONSE => backend_step(&msg.payload),
            other => Step::Fail(format!(
                "expected RowDescription ('T'), got '{}'",
                other as char
            )),
        }
    }

    fn accepts(&self, tag: u8) -> bool {
        tag == tag::ROW_DESCRIPTION || tag == tag::ERROR_RESPONSE
    }
}

/// Expect a ParameterDescription.
pub struct ParameterDescriptionReply;

impl ReplyParser for ParameterDescriptionReply {
    type Output = Vec<u32>;

    fn feed(&mut self, msg: &BackendMessage) -> Step<Vec<u32>> {
        if is_transparent(msg.tag) {
            return Step::NeedMore;
        }
        match msg.tag {
            tag::PARAMETER_DESCRIPTION => {
                match backend::parse_parameter_description(&msg.payload) {
                    Ok(oids) => Step::Done(oids),
                    Err(e) => Step::Fail(e.to_string()),
                }
            }
            tag::ERROR_RESPONSE => backend_step(&msg.payload),
            other => Step::Fail(format!(
                "expected ParameterDescription ('t'), got '{}'",
                other as char
            )),
        }
    }

    fn accepts(&self, tag: u8) -> bool {
        tag == tag::PARAMETER_DESCRIPTION || tag == tag::ERROR_RESPONSE
    }
}

/// Expect a CommandComplete.
pub struct CommandCompleteReply;

impl ReplyParser for CommandCompleteReply {
    type Output = CommandTag;

    fn feed(&mut self, msg: &BackendMessage) -> Step<CommandTag> {
        if is_transparent(msg.tag) {
            return Step::NeedMore;
        }
        match msg.tag {
            tag::COMMAND_COMPLETE => match backend::parse_command_complete(&msg.payload) {
                Ok(t) => Step::Done(t),
                Err(e) => Step::Fail(e.to_string()),
            },
            tag::ERROR_RESPONSE => backend_step(&msg.payload),
            other => Step::Fail(format!(
                "expected CommandComplete ('C'), got '{}'",
                other as char
            )),
        }
    }

    fn accepts(&self, tag: u8) -> bool {
        tag == tag::COMMAND_COMPLETE || tag == tag::ERROR_RESPONSE
    }
}

/// How a batch of data rows ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowsEnd {
    /// CommandComplete with its tag.
    Complete(CommandTag),
    /// EmptyQueryResponse: the query string was empty.
    Empty,
    /// PortalSuspended: the row limit of Execute was reached.
    Suspended,
}

/// Collect DataRow messages until a terminal message.
pub struct DataRows {
    rows: Vec<Vec<Option<Bytes>>>,
}

impl DataRows {
    pub fn new() -> Self {
        Self { rows: Vec::new() }
    }
}

impl Default for DataRows {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplyParser for DataRows {
    type Output = (Vec<Vec<Option<Bytes>>>, RowsEnd);

    fn feed(&mut self, msg: &BackendMessage) -> Step<Self::Output> {
        if is_transparent(msg.tag) {
            return Step::NeedMore;
        }
        match msg.tag {
            tag::DATA_ROW => match backend::parse_data_row(&msg.payload) {
                Ok(row) => {
                    self.rows.push(row);
                    Step::NeedMore
                }
                Err(e) => Step::Fail(e.to_string()),
            },
            tag::COMMAND_COMPLETE => match backend::parse_command_complete(&msg.payload) {
                Ok(t) => Step::Done((std::mem::take(&mut self.rows), RowsEnd::Complete(t))),
                Err(e) => Step::Fail(e.to_string()),
            },
            tag::EMPTY_QUERY_RESPONSE => {
                Step::Done((std::mem::take(&mut self.rows), RowsEnd::Empty))
            }
            tag::PORTAL_SUSPENDED => {
                Step::Done((std::mem::take(&mut self.rows), RowsEnd::Suspended))
            }
            tag::ERROR_RESPONSE => backend_step(&msg.payload),
            other => Step::Fail(format!(
                "expected DataRow or terminal, got '{}'",
                other as char
            )),
        }
    }

    fn accepts(&self, t: u8) -> bool {
        matches!(
            t,
            tag::DATA_ROW
                | tag::COMMAND_COMPLETE
                | tag::EMPTY_QUERY_RESPONSE
                | tag::PORTAL_SUSPENDED
                | tag::ERROR_RESPONSE
        )
    }
}

/// Consume everything up to and including ReadyForQuery.
///
/// An ErrorResponse seen along the way is captured; the parser still drains
/// to ReadyForQuery and then completes with the captured server error, so
/// the pipeline stays in sync.
pub struct SkipUntilReady {
    failed: Option<BackendError>,
}

impl SkipUntilReady {
    pub fn new() -> Self {
        Self { failed: None }
    }
}

impl Default for SkipUntilReady {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplyParser for SkipUntilReady {
    type Output = TransactionStatus;

    fn feed(&mut self, msg: &BackendMessage) -> Step<TransactionStatus> {
        match msg.tag {
            tag::READY_FOR_QUERY => {
                if let Some(err) = self.failed.take() {
                    return Step::Backend(err);
                }
                match backend::parse_ready_for_query(&msg.payload) {
                    Ok(status) => Step::Done(status),
                    Err(e) => Step::Fail(e.to_string()),
                }
            }
            tag::ERROR_RESPONSE if self.failed.is_none() => {
                match backend::parse_error_fields(&msg.payload) {
                    Ok(err) => {
                        self.failed = Some(err);
                        Step::NeedMore
                    }
                    Err(e) => Step::Fail(e.to_string()),
                }
            }
            _ => Step::NeedMore,
        }
    }
}

/// Expect an ErrorResponse itself: the server error is the expected value.
pub struct ErrorResponseReply;

impl ReplyParser for ErrorResponseReply {
    type Output = BackendError;

    fn feed(&mut self, msg: &BackendMessage) -> Step<BackendError> {
        if is_transparent(msg.tag) {
            return Step::NeedMore;
        }
        if msg.tag == tag::ERROR_RESPONSE {
            match backend::parse_error_fields(&msg.payload) {
                Ok(err) => Step::Done(err),
                Err(e) => Step::Fail(e.to_string()),
            }
        } else {
            Step::Fail(format!(
                "expected ErrorResponse ('E'), got '{}'",
                msg.tag as char
            ))
        }
    }

    fn accepts(&self, tag: u8) -> bool {
        tag == tag::ERROR_RESPONSE
    }
}

/// Reply to one extended-protocol batch:
/// Parse + Bind + Describe(portal) + Execute + Sync.
///
/// Expected stream: ParseComplete, BindComplete, RowDescription | NoData,
/// DataRow*, CommandComplete | EmptyQueryResponse | PortalSuspended,
/// ReadyForQuery. `prepared` skips the ParseComplete stage for a Bind
/// against an existing statement.
pub struct ExtendedQueryReply {
    state: ExtendedState,
}

enum ExtendedState {
    WaitParse,
    WaitBind,
    WaitDescribe,
    Rows {
        columns: Vec<ColumnDescription>,
        rows: Vec<Vec<Option<Bytes>>>,
    },
    Finish {
        columns: Vec<ColumnDescription>,
        rows: Vec<Vec<Option<Bytes>>>,
        end: RowsEnd,
    },
    Failed(BackendError),
}

impl ExtendedQueryReply {
    /// Reply for a batch that begins with Parse.
    pub fn new() -> Self {
        Self {
            state: ExtendedState::WaitParse,
        }
    }

    /// Reply for a batch against an already-prepared statement.
    pub fn prepared() -> Self {
        Self {
            state: ExtendedState::WaitBind,
        }
    }
}

impl Default for ExtendedQueryReply {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplyParser for ExtendedQueryReply {
    type Output = ResultSet;

    fn feed(&mut self, msg: &BackendMessage) -> Step<ResultSet> {
        use ExtendedState::*;

        if is_transparent(msg.tag) {
            return Step::NeedMore;
        }
        if msg.tag == tag::ERROR_RESPONSE && !matches!(self.state, Failed(_)) {
            return match backend::parse_error_fields(&msg.payload) {
                Ok(err) => {
                    self.state = Failed(err);
                    Step::NeedMore
                }
                Err(e) => Step::Fail(e.to_string()),
            };
        }

        match &mut self.state {
            WaitParse => {
                if msg.tag == tag::PARSE_COMPLETE {
                    self.state = WaitBind;
                    Step::NeedMore
                } else {
                    Step::Fail(format!(
                        "expected ParseComplete ('1'), got '{}'",
                        msg.tag as char
                    ))
                }
            }
            WaitBind => {
                if msg.tag == tag::BIND_COMPLETE {
                    self.state = WaitDescribe;
                    Step::NeedMore
                } else {
                    Step::Fail(format!(
                        "expected BindComplete ('2'), got '{}'",
                        msg.tag as char
                    ))
                }
            }
            WaitDescribe => match msg.tag {
                tag::ROW_DESCRIPTION => match backend::parse_row_description(&msg.payload) {
                    Ok(columns) => {
                        self.state = Rows {
                            columns,
                            rows: Vec::new(),
                        };
                        Step::NeedMore
                    }
                    Err(e) => Step::Fail(e.to_string()),
                },
                tag::NO_DATA => {
                    self.state = Rows {
                        columns: Vec::new(),
                        rows: Vec::new(),
                    };
                    Step::NeedMore
                }
                other => Step::Fail(format!(
                    "expected RowDescription or NoData, got '{}'",
                    other as char
                )),
            },
            Rows { columns, rows } => match msg.tag {
                tag::DATA_ROW => match backend::parse_data_row(&msg.payload) {
                    Ok(row) => {
                        rows.push(row);
                        Step::NeedMore
                    }
                    Err(e) => Step::Fail(e.to_string()),
                },
                tag::COMMAND_COMPLETE => match backend::parse_command_complete(&msg.payload) {
                    Ok(t) => {
                        self.state = Finish {
                            columns: std::mem::take(columns),
                            rows: std::mem::take(rows),
                            end: RowsEnd::Complete(t),
                        };
                        Step::NeedMore
                    }
                    Err(e) => Step::Fail(e.to_string()),
                },
                tag::EMPTY_QUERY_RESPONSE => {
                    self.state = Finish {
                        columns: std::mem::take(columns),
                        rows: std::mem::take(rows),
                        end: RowsEnd::Empty,
                    };
                    Step::NeedMore
                }
                tag::PORTAL_SUSPENDED => {
                    self.state = Finish {
                        columns: std::mem::take(columns),
                        rows: std::mem::take(rows),
                        end: RowsEnd::Suspended,
                    };
                    Step::NeedMore
                }
                other => Step::Fail(format!(
                    "expected DataRow or terminal, got '{}'",
                    other as char
                )),
            },
            Finish { columns, rows, end } => {
                if msg.tag == tag::READY_FOR_QUERY {
                    match backend::parse_ready_for_query(&msg.payload) {
                        Ok(status) => Step::Done(ResultSet {
                            columns: std::mem::take(columns),
                            rows: std::mem::take(rows),
                            tag: match end {
                                RowsEnd::Complete(t) => Some(t.clone()),
                                _ => None,
                            },
                            suspended: matches!(end, RowsEnd::Suspended),
                            status,
                        }),
                        Err(e) => Step::Fail(e.to_string()),
                    }
                } else {
                    Step::Fail(format!(
                        "expected ReadyForQuery ('Z'), got '{}'",
                        msg.tag as char
                    ))
                }
            }
            Failed(err) => {
                if msg.tag == tag::READY_FOR_QUERY {
                    Step::Backend(err.clone())
                } else {
                    // server discards until Sync; skip whatever arrives
                    Step::NeedMore
                }
            }
        }
    }

    fn accepts(&self, t: u8) -> bool {
        matches!(
            t,
            tag::PARSE_COMPLETE | tag::BIND_COMPLETE | tag::ERROR_RESPONSE
        )
    }
}

/// Reply to one simple-query ('Q') round trip.
///
/// Accepts any interleaving of RowDescription, DataRow, CommandComplete,
/// and EmptyQueryResponse up to the final ReadyForQuery. For multi-statement
/// strings the rows accumulate; the last command tag wins.
pub struct SimpleQueryReply {
    columns: Vec<ColumnDescription>,
    rows: Vec<Vec<Option<Bytes>>>,
    tag: Option<CommandTag>,
    empty: bool,
    failed: Option<BackendError>,
}

impl SimpleQueryReply {
    pub fn new() -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
            tag: None,
            empty: false,
            failed: None,
        }
    }
}

impl Default for SimpleQueryReply {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplyParser for SimpleQueryReply {
    type Output = ResultSet;

    fn feed(&mut self, msg: &BackendMessage) -> Step<ResultSet> {
        if is_transparent(msg.tag) {
            return Step::NeedMore;
        }
        if self.failed.is_some() {
            return if msg.tag == tag::READY_FOR_QUERY {
                Step::Backend(self.failed.take().expect("failure captured"))
            } else {
                Step::NeedMore
            };
        }
        match msg.tag {
            tag::ROW_DESCRIPTION => match backend::parse_row_description(&msg.payload) {
                Ok(cols) => {
                    if self.columns.is_empty() {
                        self.columns = cols;
                    }
                    Step::NeedMore
                }
                Err(e) => Step::Fail(e.to_string()),
            },
            tag::DATA_ROW => match backend::parse_data_row(&msg.payload) {
                Ok(row) => {
                    self.rows.push(row);
                    Step::NeedMore
                }
                Err(e) => Step::Fail(e.to_string()),
            },
            tag::COMMAND_COMPLETE => match backend::parse_command_complete(&msg.payload) {
                Ok(t) => {
                    self.tag = Some(t);
                    Step::NeedMore
                }
                Err(e) => Step::Fail(e.to_string()),
            },
            tag::EMPTY_QUERY_RESPONSE => {
                self.empty = true;
                Step::NeedMore
            }
            tag::ERROR_RESPONSE => match backend::parse_error_fields(&msg.payload) {
                Ok(err) => {
                    self.failed = Some(err);
                    Step::NeedMore
                }
                Err(e) => Step::Fail(e.to_string()),
            },
            tag::READY_FOR_QUERY => match backend::parse_ready_for_query(&msg.payload) {
                Ok(status) => Step::Done(ResultSet {
                    columns: std::mem::take(&mut self.columns),
                    rows: std::mem::take(&mut self.rows),
                    tag: self.tag.take(),
                    suspended: false,
                    status,
                }),
                Err(e) => Step::Fail(e.to_string()),
            },
            other => Step::Fail(format!(
                "unexpected '{}' in simple query reply",
                other as char
            )),
        }
    }
}

/// Summary of a completed startup exchange.
#[derive(Debug, Clone)]
pub struct StartupSummary {
    pub key_data: Option<BackendKeyData>,
    pub parameters: Vec<ParameterStatus>,
    pub status: TransactionStatus,
    /// AuthenticationSASLFinal data (the server signature), when the
    /// exchange ended a SASL conversation. The server sends it in the same
    /// burst as AuthenticationOk, so it is captured here for the caller to
    /// verify rather than surfaced as a challenge of its own.
    pub sasl_final: Option<Bytes>,
}

impl StartupSummary {
    /// Value of a run-time parameter reported during startup.
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.value.as_str())
    }
}

/// Outcome of one startup-phase round trip.
#[derive(Debug, Clone)]
pub enum StartupOutcome {
    /// The server wants another authentication response.
    Challenge(AuthRequest),
    /// AuthenticationOk arrived and the session settled to ReadyForQuery.
    Complete(StartupSummary),
}

/// Reply to one startup-phase request (StartupMessage or PasswordMessage).
///
/// Completes at the first non-Ok AuthenticationRequest (the caller must
/// answer it), or runs through parameter reports and BackendKeyData to
/// ReadyForQuery once AuthenticationOk arrives. A startup ErrorResponse is
/// fatal on the server side (no ReadyForQuery follows), so it completes the
/// parse immediately.
pub struct StartupReply {
    settling: bool,
    key_data: Option<BackendKeyData>,
    parameters: Vec<ParameterStatus>,
    sasl_final: Option<Bytes>,
}

impl StartupReply {
    pub fn new() -> Self {
        Self {
            settling: false,
            key_data: None,
            parameters: Vec::new(),
            sasl_final: None,
        }
    }
}

impl Default for StartupReply {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplyParser for StartupReply {
    type Output = StartupOutcome;

    fn feed(&mut self, msg: &BackendMessage) -> Step<StartupOutcome> {
        if msg.tag == tag::NOTICE_RESPONSE {
            return Step::NeedMore;
        }
        if msg.tag == tag::ERROR_RESPONSE {
            return backend_step(&msg.payload);
        }
        if !self.settling {
            return match msg.tag {
                tag::AUTHENTICATION => match backend::parse_auth_request(&msg.payload) {
                    Ok(AuthRequest::Ok) => {
                        self.settling = true;
                        Step::NeedMore
                    }
                    // arrives in the same burst as AuthenticationOk
                    Ok(AuthRequest::SaslFinal { data }) => {
                        self.sasl_final = Some(data);
                        Step::NeedMore
                    }
                    Ok(challenge) => Step::Done(StartupOutcome::Challenge(challenge)),
                    Err(e) => Step::Fail(e.to_string()),
                },
                other => Step::Fail(format!(
                    "expected AuthenticationRequest ('R'), got '{}'",
                    other as char
                )),
            };
        }
        match msg.tag {
            tag::PARAMETER_STATUS => match backend::parse_parameter_status(&msg.payload) {
                Ok(p) => {
                    self.parameters.push(p);
                    Step::NeedMore
                }
                Err(e) => Step::Fail(e.to_string()),
            },
            tag::BACKEND_KEY_DATA => match backend::parse_backend_key_data(&msg.payload) {
                Ok(k) => {
                    self.key_data = Some(k);
                    Step::NeedMore
                }
                Err(e) => Step::Fail(e.to_string()),
            },
            tag::READY_FOR_QUERY => match backend::parse_ready_for_query(&msg.payload) {
                Ok(status) => Step::Done(StartupOutcome::Complete(StartupSummary {
                    key_data: self.key_data.take(),
                    parameters: std::mem::take(&mut self.parameters),
                    status,
                    sasl_final: self.sasl_final.take(),
                })),
                Err(e) => Step::Fail(e.to_string()),
            },
            other => Step::Fail(format!(
                "unexpected '{}' while settling startup",
                other as char
            )),
        }
    }
}
