//! High-level connection surface over the dispatcher.
//!
//! [`Connection::connect`] opens a TCP stream, spawns the dispatcher, and
//! performs the startup exchange *through* it as a [`Session`]: the startup
//! message, the authentication challenge loop, and the settle to
//! ReadyForQuery are ordinary pipeline entries, so the interpreter's
//! ordering rules cover the handshake too.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::debug;

use crate::auth;
use crate::config::ConnectConfig;
use crate::dispatch::{AsyncMessage, Dispatcher};
use crate::error::{PgPipeError, Result};
use crate::protocol::backend::{AuthRequest, BackendKeyData};
use crate::protocol::reply::{StartupOutcome, StartupSummary};
use crate::request::{self, Request, Session, StatementDescription};
use crate::results::ResultSet;
use crate::value::{Value, ValueCodec, WireCodec};

/// A named prepared statement.
#[derive(Debug, Clone)]
pub struct Statement {
    name: String,
    pub description: StatementDescription,
}

impl Statement {
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// An established, authenticated connection.
pub struct Connection {
    dispatcher: Dispatcher,
    messages: mpsc::UnboundedReceiver<AsyncMessage>,
    startup: StartupSummary,
    integer_datetimes: bool,
    codec: Arc<dyn ValueCodec>,
    next_statement: AtomicU64,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("startup", &self.startup)
            .field("integer_datetimes", &self.integer_datetimes)
            .field("next_statement", &self.next_statement)
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Connect over TCP and authenticate.
    pub async fn connect(cfg: &ConnectConfig) -> Result<Connection> {
        let tcp = TcpStream::connect((cfg.host.as_str(), cfg.port)).await?;
        tcp.set_nodelay(true)?;
        Self::connect_stream(tcp, cfg).await
    }

    /// Run the dispatcher and startup exchange over an arbitrary stream
    /// (an already-negotiated TLS stream, a unix socket, a test duplex).
    pub async fn connect_stream<S>(stream: S, cfg: &ConnectConfig) -> Result<Connection>
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin + 'static,
    {
        let (sink_tx, sink_rx) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher::start(stream, sink_tx, cfg);

        let startup = match dispatcher.run_session(startup_session(cfg)).await {
            Ok(Ok(summary)) => summary,
            Ok(Err(err)) => {
                dispatcher.stop().await;
                return Err(err);
            }
            Err(err) => {
                dispatcher.stop().await;
                return Err(err);
            }
        };

        let integer_datetimes = startup.parameter("integer_datetimes") != Some("off");
        debug!(
            backend_pid = ?startup.key_data.map(|k| k.process_id),
            integer_datetimes = integer_datetimes,
            "connection established"
        );

        Ok(Connection {
            dispatcher,
            messages: sink_rx,
            startup,
            integer_datetimes,
            codec: Arc::new(WireCodec),
            next_statement: AtomicU64::new(0),
        })
    }

    /// The dispatcher handle, for submitting hand-built requests and
    /// sessions alongside the convenience methods.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Replace the value codec used to encode parameters.
    pub fn set_codec(&mut self, codec: Arc<dyn ValueCodec>) {
        self.codec = codec;
    }

    /// Whether the server reports `integer_datetimes = on`; row decoders
    /// need it for binary temporal values.
    pub fn integer_datetimes(&self) -> bool {
        self.integer_datetimes
    }

    /// A run-time parameter reported during startup.
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.startup.parameter(name)
    }

    /// Cancellation key data, if the server sent it.
    pub fn backend_key(&self) -> Option<BackendKeyData> {
        self.startup.key_data
    }

    /// Run one simple-query round trip.
    pub async fn simple_query(&self, sql: &str) -> Result<ResultSet> {
        self.dispatcher.perform(request::simple_query(sql)).await
    }

    /// Run one parameterised query as a single pipelined batch
    /// (Parse + Bind + Describe + Execute + Sync).
    pub async fn query(&self, sql: &str, params: &[Value]) -> Result<ResultSet> {
        let encoded = self.encode_params(params);
        self.dispatcher
            .perform(request::extended_query(sql, encoded, 0))
            .await
    }

    /// Like [`query`](Self::query), returning the rows-affected count from
    /// the command tag (zero for commands without one).
    pub async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let set = self.query(sql, params).await?;
        Ok(set.tag.as_ref().and_then(|t| t.rows_affected()).unwrap_or(0))
    }

    /// Prepare a named statement and fetch its description.
    pub async fn prepare(&self, sql: &str) -> Result<Statement> {
        let name = format!("s{}", self.next_statement.fetch_add(1, Ordering::Relaxed));
        let description = self
            .dispatcher
            .perform(request::prepare(name.clone(), sql, Vec::new()))
            .await?;
        Ok(Statement { name, description })
    }

    /// Execute a prepared statement. `max_rows` zero means no limit; a
    /// reached limit is reported via [`ResultSet::suspended`].
    pub async fn query_prepared(
        &self,
        statement: &Statement,
        params: &[Value],
        max_rows: i32,
    ) -> Result<ResultSet> {
        let encoded = self.encode_params(params);
        self.dispatcher
            .perform(request::execute_prepared(
                statement.name.clone(),
                encoded,
                max_rows,
            ))
            .await
    }

    /// Close a prepared statement on the server.
    pub async fn close_statement(&self, statement: Statement) -> Result<()> {
        self.dispatcher
            .perform(request::close_statement(statement.name))
            .await
    }

    /// Submit a hand-built request.
    pub async fn perform<R: Send + 'static>(&self, req: Request<R>) -> Result<R> {
        self.dispatcher.perform(req).await
    }

    /// Drive a session of chained requests.
    pub async fn run_session<R: Send + 'static>(&self, session: Session<R>) -> Result<R> {
        self.dispatcher.run_session(session).await
    }

    /// Wait for the next unaffiliated message (notification, stray error).
    /// `None` once the dispatcher has shut down.
    pub async fn message(&mut self) -> Option<AsyncMessage> {
        self.messages.recv().await
    }

    /// Non-blocking variant of [`message`](Self::message).
    pub fn try_message(&mut self) -> Option<AsyncMessage> {
        self.messages.try_recv().ok()
    }

    /// Graceful shutdown; in-flight requests resolve with a "connection
    /// stopped" transport error.
    pub async fn close(self) {
        self.dispatcher.stop().await;
    }

    fn encode_params(&self, params: &[Value]) -> Vec<(i16, Option<Vec<u8>>)> {
        params
            .iter()
            .map(|v| self.codec.encode(v, self.integer_datetimes))
            .collect()
    }
}

struct AuthContext {
    user: String,
    password: String,
}

type StartupSession = Session<Result<StartupSummary>>;

fn startup_session(cfg: &ConnectConfig) -> StartupSession {
    let params = vec![
        ("user".to_string(), cfg.user.clone()),
        ("database".to_string(), cfg.database.clone()),
        ("client_encoding".to_string(), "UTF8".to_string()),
        ("application_name".to_string(), "pgpipe".to_string()),
    ];
    let auth = AuthContext {
        user: cfg.user.clone(),
        password: cfg.password.clone(),
    };
    Session::bind(request::startup(params), move |outcome| {
        continue_startup(outcome, auth)
    })
}

fn continue_startup(outcome: StartupOutcome, auth: AuthContext) -> StartupSession {
    match outcome {
        StartupOutcome::Complete(summary) => Session::pure(Ok(summary)),
        StartupOutcome::Challenge(challenge) => answer_challenge(challenge, auth),
    }
}

fn answer_challenge(challenge: AuthRequest, auth: AuthContext) -> StartupSession {
    match challenge {
        AuthRequest::CleartextPassword => {
            let payload = auth::cleartext_password(&auth.password);
            Session::bind(request::auth_response(payload), move |outcome| {
                continue_startup(outcome, auth)
            })
        }
        AuthRequest::Md5Password { salt } => md5_session(salt, auth),
        AuthRequest::Sasl { mechanisms } => sasl_session(mechanisms, auth),
        AuthRequest::Ok | AuthRequest::SaslContinue { .. } | AuthRequest::SaslFinal { .. } => {
            Session::pure(Err(PgPipeError::Auth(
                "authentication response out of sequence".into(),
            )))
        }
        AuthRequest::Unsupported(code) => Session::pure(Err(PgPipeError::Auth(format!(
            "unsupported auth method: {code}"
        )))),
    }
}

#[cfg(feature = "md5")]
fn md5_session(salt: [u8; 4], auth: AuthContext) -> StartupSession {
    let payload = auth::md5_password(&auth.user, &auth.password, &salt);
    Session::bind(request::auth_response(payload), move |outcome| {
        continue_startup(outcome, auth)
    })
}

#[cfg(not(feature = "md5"))]
fn md5_session(_salt: [u8; 4], _auth: AuthContext) -> StartupSession {
    Session::pure(Err(PgPipeError::Auth("md5 support disabled".into())))
}

#[cfg(feature = "scram")]
fn sasl_session(mechanisms: Vec<String>, auth: AuthContext) -> StartupSession {
    use crate::auth::scram;

    if !mechanisms.iter().any(|m| m == scram::MECHANISM) {
        return Session::pure(Err(PgPipeError::Auth(format!(
            "server offers no supported SASL mechanism: {mechanisms:?}"
        ))));
    }

    let flow = scram::ScramFlow::new(&auth.user);
    let first = flow.client_first();

    // SASLInitialResponse rides in a PasswordMessage:
    // mechanism\0 + int32(len) + initial-response bytes
    let mut payload = Vec::with_capacity(scram::MECHANISM.len() + 5 + first.len());
    payload.extend_from_slice(scram::MECHANISM.as_bytes());
    payload.push(0);
    payload.extend_from_slice(&(first.len() as i32).to_be_bytes());
    payload.extend_from_slice(first.as_bytes());

    Session::bind(request::auth_response(payload), move |outcome| {
        let StartupOutcome::Challenge(AuthRequest::SaslContinue { data }) = outcome else {
            return Session::pure(Err(PgPipeError::Auth(
                "expected SASL continuation from server".into(),
            )));
        };
        let server_first = match String::from_utf8(data.to_vec()) {
            Ok(s) => s,
            Err(e) => {
                return Session::pure(Err(PgPipeError::Auth(format!(
                    "SASL server-first not UTF-8: {e}"
                ))));
            }
        };
        let (client_final, proof) = match flow.answer(&auth.password, &server_first) {
            Ok(answer) => answer,
            Err(e) => return Session::pure(Err(e)),
        };
        Session::bind(
            request::auth_response(client_final.into_bytes()),
            move |outcome| finish_sasl(outcome, proof),
        )
    })
}

#[cfg(feature = "scram")]
fn finish_sasl(outcome: StartupOutcome, proof: crate::auth::scram::ServerProof) -> StartupSession {
    let StartupOutcome::Complete(summary) = outcome else {
        return Session::pure(Err(PgPipeError::Auth(
            "expected SASL completion from server".into(),
        )));
    };
    let Some(data) = summary.sasl_final.clone() else {
        return Session::pure(Err(PgPipeError::Auth(
            "server sent no SASL signature".into(),
        )));
    };
    let verified = String::from_utf8(data.to_vec())
        .map_err(|e| PgPipeError::Auth(format!("SASL server-final not UTF-8: {e}")))
        .and_then(|s| proof.verify(&s));
    match verified {
        Ok(()) => Session::pure(Ok(summary)),
        Err(e) => Session::pure(Err(e)),
    }
}

#[cfg(not(feature = "scram"))]
fn sasl_session(_mechanisms: Vec<String>, _auth: AuthContext) -> StartupSession {
    Session::pure(Err(PgPipeError::Auth("SCRAM support disabled".into())))
}
