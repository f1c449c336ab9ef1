//! End-to-end dispatcher tests against an in-process scripted server.
//!
//! A `tokio::io::duplex` pair stands in for the socket: the client half is
//! handed to the dispatcher, the server half to a script that frames client
//! messages and replies with hand-built backend messages. This keeps the
//! pipeline-ordering, error-routing, and teardown invariants hermetic and
//! deterministic.

use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

use pgpipe::value::ValueRow;
use pgpipe::{AsyncMessage, ConnectConfig, Connection, PgPipeError, Value, results};

// ============================================================================
// Test Infrastructure
// ============================================================================

fn test_config() -> ConnectConfig {
    ConnectConfig::new("test", "alice", "pw", "app")
}

struct ScriptServer {
    stream: DuplexStream,
}

impl ScriptServer {
    fn new(stream: DuplexStream) -> Self {
        Self { stream }
    }

    /// Read the startup message (length-prefixed, no tag byte).
    async fn read_startup(&mut self) -> Result<Vec<u8>> {
        let mut len = [0u8; 4];
        self.stream.read_exact(&mut len).await?;
        let len = i32::from_be_bytes(len) as usize;
        let mut payload = vec![0u8; len - 4];
        self.stream.read_exact(&mut payload).await?;
        Ok(payload)
    }

    /// Read one tagged frontend message.
    async fn read_message(&mut self) -> Result<(u8, Vec<u8>)> {
        let mut header = [0u8; 5];
        self.stream.read_exact(&mut header).await?;
        let tag = header[0];
        let len = i32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;
        let mut payload = vec![0u8; len - 4];
        self.stream.read_exact(&mut payload).await?;
        Ok((tag, payload))
    }

    /// Read tagged messages up to and including Sync ('S').
    async fn read_until_sync(&mut self) -> Result<Vec<u8>> {
        let mut tags = Vec::new();
        loop {
            let (tag, _) = self.read_message().await?;
            tags.push(tag);
            if tag == b'S' {
                return Ok(tags);
            }
        }
    }

    async fn send(&mut self, tag: u8, payload: &[u8]) -> Result<()> {
        let mut frame = Vec::with_capacity(5 + payload.len());
        frame.push(tag);
        frame.extend_from_slice(&((payload.len() as i32) + 4).to_be_bytes());
        frame.extend_from_slice(payload);
        self.stream.write_all(&frame).await?;
        Ok(())
    }

    /// Accept the startup message and settle straight to ReadyForQuery.
    async fn accept_startup(&mut self) -> Result<()> {
        self.read_startup().await?;
        self.send(b'R', &0i32.to_be_bytes()).await?; // AuthenticationOk
        self.send(b'S', b"integer_datetimes\0on\0").await?;
        let mut key = Vec::new();
        key.extend_from_slice(&7i32.to_be_bytes());
        key.extend_from_slice(&99i32.to_be_bytes());
        self.send(b'K', &key).await?;
        self.send(b'Z', b"I").await?;
        Ok(())
    }

    /// Reply to a simple query with one single-column text row.
    async fn send_text_row_result(&mut self, value: &str) -> Result<()> {
        self.send(b'T', &row_description_text(&["?column?"])).await?;
        self.send(b'D', &data_row(&[Some(value.as_bytes())])).await?;
        self.send(b'C', b"SELECT 1\0").await?;
        self.send(b'Z', b"I").await?;
        Ok(())
    }

    async fn send_error(&mut self, sqlstate: &str, message: &str) -> Result<()> {
        self.send(b'E', &error_fields(sqlstate, message)).await?;
        self.send(b'Z', b"I").await?;
        Ok(())
    }
}

fn row_description_text(names: &[&str]) -> Vec<u8> {
    row_description(names, 25, 0)
}

fn row_description(names: &[&str], type_oid: u32, format: i16) -> Vec<u8> {
    let mut p = Vec::new();
    p.extend_from_slice(&(names.len() as i16).to_be_bytes());
    for name in names {
        p.extend_from_slice(name.as_bytes());
        p.push(0);
        p.extend_from_slice(&0u32.to_be_bytes());
        p.extend_from_slice(&0i16.to_be_bytes());
        p.extend_from_slice(&type_oid.to_be_bytes());
        p.extend_from_slice(&(-1i16).to_be_bytes());
        p.extend_from_slice(&(-1i32).to_be_bytes());
        p.extend_from_slice(&format.to_be_bytes());
    }
    p
}

fn data_row(values: &[Option<&[u8]>]) -> Vec<u8> {
    let mut p = Vec::new();
    p.extend_from_slice(&(values.len() as i16).to_be_bytes());
    for v in values {
        match v {
            Some(v) => {
                p.extend_from_slice(&(v.len() as i32).to_be_bytes());
                p.extend_from_slice(v);
            }
            None => p.extend_from_slice(&(-1i32).to_be_bytes()),
        }
    }
    p
}

fn error_fields(sqlstate: &str, message: &str) -> Vec<u8> {
    let mut p = Vec::new();
    p.extend_from_slice(b"SERROR\0");
    p.push(b'C');
    p.extend_from_slice(sqlstate.as_bytes());
    p.push(0);
    p.push(b'M');
    p.extend_from_slice(message.as_bytes());
    p.push(0);
    p.push(0);
    p
}

fn notification(pid: i32, channel: &str, payload: &str) -> Vec<u8> {
    let mut p = Vec::new();
    p.extend_from_slice(&pid.to_be_bytes());
    p.extend_from_slice(channel.as_bytes());
    p.push(0);
    p.extend_from_slice(payload.as_bytes());
    p.push(0);
    p
}

async fn connect_scripted<F, Fut>(script: F) -> Result<Connection>
where
    F: FnOnce(ScriptServer) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = Result<()>> + Send,
{
    let (client, server) = tokio::io::duplex(64 * 1024);
    tokio::spawn(async move {
        let mut server = ScriptServer::new(server);
        if let Err(e) = server.accept_startup().await {
            eprintln!("script server handshake failed: {e}");
            return;
        }
        if let Err(e) = script(server).await {
            eprintln!("script server failed: {e}");
        }
    });
    Ok(Connection::connect_stream(client, &test_config()).await?)
}

fn text_cell(set: &pgpipe::ResultSet, row: usize) -> String {
    String::from_utf8(set.value(row, 0).expect("non-null cell").to_vec()).expect("utf8")
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn simple_query_returns_one_text_row() -> Result<()> {
    let conn = connect_scripted(|mut server| async move {
        let (tag, payload) = server.read_message().await?;
        assert_eq!(tag, b'Q');
        assert_eq!(payload, b"SELECT 1\0");
        server.send_text_row_result("1").await
    })
    .await?;

    assert!(conn.integer_datetimes());
    assert_eq!(conn.backend_key().unwrap().process_id, 7);

    let set = conn.simple_query("SELECT 1").await?;
    assert_eq!(set.rows.len(), 1);
    assert_eq!(set.columns.len(), 1);
    assert_eq!(text_cell(&set, 0), "1");

    conn.close().await;
    Ok(())
}

#[tokio::test]
async fn parameterised_query_round_trip() -> Result<()> {
    let conn = connect_scripted(|mut server| async move {
        let tags = server.read_until_sync().await?;
        assert_eq!(tags, vec![b'P', b'B', b'D', b'E', b'S']);
        server.send(b'1', b"").await?; // ParseComplete
        server.send(b'2', b"").await?; // BindComplete
        server
            .send(b'T', &row_description(&["sum"], 23, 1))
            .await?;
        server
            .send(b'D', &data_row(&[Some(&5i32.to_be_bytes())]))
            .await?;
        server.send(b'C', b"SELECT 1\0").await?;
        server.send(b'Z', b"I").await?;
        Ok(())
    })
    .await?;

    let set = conn
        .query("SELECT $1::int + $2::int", &[Value::Int4(2), Value::Int4(3)])
        .await?;
    let row = results::exactly_one(&set, &ValueRow, conn.integer_datetimes()).unwrap();
    assert_eq!(row, vec![Value::Int4(5)]);

    conn.close().await;
    Ok(())
}

#[tokio::test]
async fn pipelined_requests_answer_in_submission_order() -> Result<()> {
    let conn = connect_scripted(|mut server| async move {
        // three queries arrive in submission order; answer them in order
        for expect in ["SELECT 'a'", "SELECT 'b'", "SELECT 'c'"] {
            let (tag, payload) = server.read_message().await?;
            assert_eq!(tag, b'Q');
            assert_eq!(payload, [expect.as_bytes(), b"\0"].concat());
        }
        for value in ["a", "b", "c"] {
            server.send_text_row_result(value).await?;
        }
        Ok(())
    })
    .await?;

    let conn = Arc::new(conn);
    let (a, b, c) = tokio::join!(
        conn.simple_query("SELECT 'a'"),
        conn.simple_query("SELECT 'b'"),
        conn.simple_query("SELECT 'c'"),
    );
    assert_eq!(text_cell(&a?, 0), "a");
    assert_eq!(text_cell(&b?, 0), "b");
    assert_eq!(text_cell(&c?, 0), "c");
    Ok(())
}

#[tokio::test]
async fn backend_error_mid_pipeline_leaves_connection_usable() -> Result<()> {
    let conn = connect_scripted(|mut server| async move {
        for _ in 0..3 {
            server.read_message().await?;
        }
        server.send_text_row_result("1").await?;
        server.send_error("22012", "division by zero").await?;
        server.send_text_row_result("3").await?;
        Ok(())
    })
    .await?;

    let conn = Arc::new(conn);
    let (a, b, c) = tokio::join!(
        conn.simple_query("SELECT 1"),
        conn.simple_query("SELECT 1/0"),
        conn.simple_query("SELECT 3"),
    );

    assert_eq!(text_cell(&a?, 0), "1");
    let err = b.unwrap_err();
    assert_eq!(err.as_server().expect("server error").sqlstate, "22012");
    assert_eq!(text_cell(&c?, 0), "3");
    Ok(())
}

#[tokio::test]
async fn socket_close_mid_response_fails_all_pending() -> Result<()> {
    let conn = connect_scripted(|mut server| async move {
        // two queries in flight; answer with half a response, then vanish
        server.read_message().await?;
        server.read_message().await?;
        server
            .send(b'T', &row_description_text(&["?column?"]))
            .await?;
        drop(server);
        Ok(())
    })
    .await?;

    let conn = Arc::new(conn);
    let (a, b) = tokio::join!(conn.simple_query("SELECT 1"), conn.simple_query("SELECT 2"),);

    let a_err = a.unwrap_err();
    let b_err = b.unwrap_err();
    assert!(a_err.is_transport(), "got {a_err:?}");
    assert_eq!(a_err, b_err);

    // a later request observes the same terminal error, and stop completes
    let late = conn.simple_query("SELECT 3").await.unwrap_err();
    assert_eq!(late, a_err);
    conn.dispatcher().stop().await;
    Ok(())
}

#[tokio::test]
async fn notification_while_idle_reaches_the_sink() -> Result<()> {
    let mut conn = connect_scripted(|mut server| async move {
        server.send(b'A', &notification(42, "ch", "p")).await?;
        server.send(b'A', &notification(42, "ch", "q")).await?;
        Ok(())
    })
    .await?;

    match conn.message().await.expect("first notification") {
        AsyncMessage::Notification(n) => {
            assert_eq!(n.pid, 42);
            assert_eq!(n.channel, "ch");
            assert_eq!(n.payload, "p");
        }
        other => panic!("expected notification, got {other:?}"),
    }
    // arrival order is preserved
    match conn.message().await.expect("second notification") {
        AsyncMessage::Notification(n) => assert_eq!(n.payload, "q"),
        other => panic!("expected notification, got {other:?}"),
    }

    conn.close().await;
    Ok(())
}

#[tokio::test]
async fn stray_error_while_idle_reaches_the_sink() -> Result<()> {
    let mut conn = connect_scripted(|mut server| async move {
        server
            .send(b'E', &error_fields("57P01", "terminating connection"))
            .await?;
        Ok(())
    })
    .await?;

    match conn.message().await.expect("stray error") {
        AsyncMessage::Error(e) => assert_eq!(e.sqlstate, "57P01"),
        other => panic!("expected stray error, got {other:?}"),
    }
    conn.close().await;
    Ok(())
}

#[tokio::test]
async fn fragmented_response_is_reassembled() -> Result<()> {
    let conn = connect_scripted(|mut server| async move {
        server.read_message().await?;
        // build the whole response, then deliver it one byte at a time
        let mut wire = Vec::new();
        let parts: Vec<(u8, Vec<u8>)> = vec![
            (b'T', row_description_text(&["?column?"])),
            (b'D', data_row(&[Some(&vec![b'x'; 1000])])),
            (b'C', b"SELECT 1\0".to_vec()),
            (b'Z', b"I".to_vec()),
        ];
        for (tag, payload) in parts {
            wire.push(tag);
            wire.extend_from_slice(&((payload.len() as i32) + 4).to_be_bytes());
            wire.extend_from_slice(&payload);
        }
        for byte in wire {
            server.stream.write_all(&[byte]).await?;
            server.stream.flush().await?;
        }
        Ok(())
    })
    .await?;

    let set = conn.simple_query("SELECT 1").await?;
    assert_eq!(set.rows.len(), 1);
    assert_eq!(set.value(0, 0).unwrap().len(), 1000);
    conn.close().await;
    Ok(())
}

#[tokio::test]
async fn stop_fails_pending_requests_with_stopped() -> Result<()> {
    let conn = connect_scripted(|mut server| async move {
        // swallow the query and never answer; hold the stream open until
        // the client hangs up
        server.read_message().await?;
        let mut buf = [0u8; 64];
        while server.stream.read(&mut buf).await? > 0 {}
        Ok(())
    })
    .await?;

    let dispatcher = conn.dispatcher().clone();
    let pending = tokio::spawn(async move { conn.simple_query("SELECT pg_sleep(60)").await });

    // give the request time to get onto the wire
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    dispatcher.stop().await;

    let err = pending.await?.unwrap_err();
    assert_eq!(err, PgPipeError::Transport("connection stopped".into()));

    // after stop, submission rejects immediately
    let late = dispatcher
        .perform(pgpipe::request::simple_query("SELECT 1"))
        .await
        .unwrap_err();
    assert_eq!(err, late);
    Ok(())
}

#[tokio::test]
async fn cleartext_password_challenge_is_answered() -> Result<()> {
    let (client, server) = tokio::io::duplex(64 * 1024);
    tokio::spawn(async move {
        let mut server = ScriptServer::new(server);
        let startup = server.read_startup().await.unwrap();
        let startup = String::from_utf8_lossy(&startup).to_string();
        assert!(startup.contains("alice"));
        assert!(startup.contains("app"));

        server.send(b'R', &3i32.to_be_bytes()).await.unwrap(); // cleartext
        let (tag, payload) = server.read_message().await.unwrap();
        assert_eq!(tag, b'p');
        assert_eq!(payload, b"pw\0");

        server.send(b'R', &0i32.to_be_bytes()).await.unwrap();
        server
            .send(b'S', b"integer_datetimes\0on\0")
            .await
            .unwrap();
        server.send(b'Z', b"I").await.unwrap();
    });

    let conn = Connection::connect_stream(client, &test_config()).await?;
    assert_eq!(conn.parameter("integer_datetimes"), Some("on"));
    conn.close().await;
    Ok(())
}

#[tokio::test]
async fn authentication_failure_surfaces_server_error() -> Result<()> {
    let (client, server) = tokio::io::duplex(64 * 1024);
    tokio::spawn(async move {
        let mut server = ScriptServer::new(server);
        server.read_startup().await.unwrap();
        server
            .send(b'E', &error_fields("28P01", "password authentication failed"))
            .await
            .unwrap();
        // server closes without ReadyForQuery, as a real one does
    });

    let err = Connection::connect_stream(client, &test_config())
        .await
        .unwrap_err();
    assert_eq!(err.as_server().expect("server error").sqlstate, "28P01");
    Ok(())
}

#[tokio::test]
async fn prepared_statement_lifecycle() -> Result<()> {
    let conn = connect_scripted(|mut server| async move {
        // prepare: Parse + Describe + Sync
        let tags = server.read_until_sync().await?;
        assert_eq!(tags, vec![b'P', b'D', b'S']);
        server.send(b'1', b"").await?; // ParseComplete
        let mut oids = Vec::new();
        oids.extend_from_slice(&1i16.to_be_bytes());
        oids.extend_from_slice(&23u32.to_be_bytes());
        server.send(b't', &oids).await?; // ParameterDescription
        server.send(b'T', &row_description(&["v"], 23, 0)).await?;
        server.send(b'Z', b"I").await?;

        // execute: Bind + Describe + Execute + Sync
        let tags = server.read_until_sync().await?;
        assert_eq!(tags, vec![b'B', b'D', b'E', b'S']);
        server.send(b'2', b"").await?; // BindComplete
        server.send(b'T', &row_description(&["v"], 23, 1)).await?;
        server
            .send(b'D', &data_row(&[Some(&41i32.to_be_bytes())]))
            .await?;
        server.send(b'C', b"SELECT 1\0").await?;
        server.send(b'Z', b"I").await?;

        // close: Close + Sync
        let tags = server.read_until_sync().await?;
        assert_eq!(tags, vec![b'C', b'S']);
        server.send(b'3', b"").await?; // CloseComplete
        server.send(b'Z', b"I").await?;
        Ok(())
    })
    .await?;

    let stmt = conn.prepare("SELECT $1::int").await?;
    assert_eq!(stmt.description.parameters, vec![23]);
    assert_eq!(stmt.description.columns.len(), 1);

    let set = conn.query_prepared(&stmt, &[Value::Int4(41)], 0).await?;
    let row = results::exactly_one(&set, &ValueRow, conn.integer_datetimes()).unwrap();
    assert_eq!(row, vec![Value::Int4(41)]);

    conn.close_statement(stmt).await?;
    conn.close().await;
    Ok(())
}
