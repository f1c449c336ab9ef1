//! Backend (server -> client) message payload decoders.
//!
//! Each decoder takes the payload of one framed message (tag already
//! stripped by the slicer) and produces a typed value. Strings are
//! NUL-terminated UTF-8; integers are big-endian. `DataRow` column values
//! are sliced out of the payload without copying.

use bytes::{Buf, Bytes};

use crate::error::{BackendError, PgPipeError, Result};

fn get_cstr(b: &mut Bytes) -> Result<String> {
    let Some(pos) = b.iter().position(|&x| x == 0) else {
        return Err(PgPipeError::Protocol("string missing NUL terminator".into()));
    };
    let raw = b.split_to(pos);
    b.advance(1);
    String::from_utf8(raw.to_vec())
        .map_err(|e| PgPipeError::Protocol(format!("non UTF-8 string: {e}")))
}

fn need(b: &Bytes, n: usize, what: &str) -> Result<()> {
    if b.remaining() < n {
        return Err(PgPipeError::Protocol(format!("{what} payload too short")));
    }
    Ok(())
}

/// A decoded AuthenticationRequest ('R') variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthRequest {
    /// AuthenticationOk - the exchange is complete.
    Ok,
    /// AuthenticationCleartextPassword.
    CleartextPassword,
    /// AuthenticationMD5Password with its 4-byte salt.
    Md5Password { salt: [u8; 4] },
    /// AuthenticationSASL with the mechanisms the server offers.
    Sasl { mechanisms: Vec<String> },
    /// AuthenticationSASLContinue carrying server-first/next data.
    SaslContinue { data: Bytes },
    /// AuthenticationSASLFinal carrying the server signature.
    SaslFinal { data: Bytes },
    /// Any other code this client does not speak.
    Unsupported(i32),
}

pub fn parse_auth_request(payload: &Bytes) -> Result<AuthRequest> {
    let mut b = payload.clone();
    need(&b, 4, "auth request")?;
    let code = b.get_i32();
    Ok(match code {
        0 => AuthRequest::Ok,
        3 => AuthRequest::CleartextPassword,
        5 => {
            need(&b, 4, "md5 auth salt")?;
            let mut salt = [0u8; 4];
            salt.copy_from_slice(&b[..4]);
            AuthRequest::Md5Password { salt }
        }
        10 => {
            // cstring list, empty string terminated
            let mut mechanisms = Vec::new();
            while b.remaining() > 1 {
                mechanisms.push(get_cstr(&mut b)?);
            }
            AuthRequest::Sasl { mechanisms }
        }
        11 => AuthRequest::SaslContinue { data: b },
        12 => AuthRequest::SaslFinal { data: b },
        other => AuthRequest::Unsupported(other),
    })
}

/// Parse ErrorResponse/NoticeResponse fields into a [`BackendError`].
///
/// Fields are `(code_byte, cstring)` pairs terminated by a zero byte.
/// Unrecognised codes are skipped; sqlstate (`C`) and message (`M`) must be
/// present.
pub fn parse_error_fields(payload: &Bytes) -> Result<BackendError> {
    let mut b = payload.clone();
    let mut severity = None;
    let mut sqlstate = None;
    let mut message = None;
    let mut detail = None;
    let mut hint = None;

    while b.has_remaining() {
        let code = b.get_u8();
        if code == 0 {
            break;
        }
        let value = get_cstr(&mut b)?;
        match code {
            b'S' => severity = Some(value),
            b'C' => sqlstate = Some(value),
            b'M' => message = Some(value),
            b'D' => detail = Some(value),
            b'H' => hint = Some(value),
            _ => {}
        }
    }

    match (sqlstate, message) {
        (Some(sqlstate), Some(message)) => Ok(BackendError {
            severity,
            sqlstate,
            message,
            detail,
            hint,
        }),
        _ => Err(PgPipeError::Protocol(
            "error response missing sqlstate or message".into(),
        )),
    }
}

/// An asynchronous NOTIFY from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Process ID of the notifying backend.
    pub pid: i32,
    pub channel: String,
    pub payload: String,
}

pub fn parse_notification(payload: &Bytes) -> Result<Notification> {
    let mut b = payload.clone();
    need(&b, 4, "notification")?;
    let pid = b.get_i32();
    let channel = get_cstr(&mut b)?;
    let notify_payload = get_cstr(&mut b)?;
    Ok(Notification {
        pid,
        channel,
        payload: notify_payload,
    })
}

/// One column of a RowDescription ('T').
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescription {
    pub name: String,
    /// Table oid, or zero when the column is not a plain table column.
    pub table_oid: u32,
    /// Attribute number within the table, or zero.
    pub column_attr: i16,
    pub type_oid: u32,
    /// pg_type.typlen; negative for variable-width types.
    pub type_size: i16,
    pub type_modifier: i32,
    /// 0 text, 1 binary.
    pub format: i16,
}

pub fn parse_row_description(payload: &Bytes) -> Result<Vec<ColumnDescription>> {
    let mut b = payload.clone();
    need(&b, 2, "row description")?;
    let count = b.get_i16();
    let mut columns = Vec::with_capacity(count.max(0) as usize);
    for _ in 0..count {
        let name = get_cstr(&mut b)?;
        need(&b, 18, "row description field")?;
        columns.push(ColumnDescription {
            name,
            table_oid: b.get_u32(),
            column_attr: b.get_i16(),
            type_oid: b.get_u32(),
            type_size: b.get_i16(),
            type_modifier: b.get_i32(),
            format: b.get_i16(),
        });
    }
    Ok(columns)
}

/// Column values of one DataRow ('D'); `None` is SQL NULL.
///
/// Values are zero-copy slices of the message payload.
pub fn parse_data_row(payload: &Bytes) -> Result<Vec<Option<Bytes>>> {
    let mut b = payload.clone();
    need(&b, 2, "data row")?;
    let count = b.get_i16();
    let mut values = Vec::with_capacity(count.max(0) as usize);
    for _ in 0..count {
        need(&b, 4, "data row value")?;
        let len = b.get_i32();
        if len < 0 {
            values.push(None);
        } else {
            need(&b, len as usize, "data row value")?;
            values.push(Some(b.split_to(len as usize)));
        }
    }
    Ok(values)
}

/// The command tag of a CommandComplete ('C'), e.g. `SELECT 5`, `INSERT 0 1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTag(pub String);

impl CommandTag {
    /// Rows affected, parsed from the tag's trailing integer. `None` for
    /// commands without a row count (e.g. `BEGIN`).
    pub fn rows_affected(&self) -> Option<u64> {
        self.0.rsplit(' ').next()?.parse().ok()
    }
}

pub fn parse_command_complete(payload: &Bytes) -> Result<CommandTag> {
    let mut b = payload.clone();
    Ok(CommandTag(get_cstr(&mut b)?))
}

/// Transaction status byte of ReadyForQuery ('Z').
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// 'I': not in a transaction block.
    Idle,
    /// 'T': inside a transaction block.
    InTransaction,
    /// 'E': in a failed transaction block.
    Failed,
}

pub fn parse_ready_for_query(payload: &Bytes) -> Result<TransactionStatus> {
    match payload.first() {
        Some(b'I') => Ok(TransactionStatus::Idle),
        Some(b'T') => Ok(TransactionStatus::InTransaction),
        Some(b'E') => Ok(TransactionStatus::Failed),
        other => Err(PgPipeError::Protocol(format!(
            "invalid ReadyForQuery status: {other:?}"
        ))),
    }
}

/// BackendKeyData ('K'): cancellation key for this backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendKeyData {
    pub process_id: i32,
    pub secret_key: i32,
}

pub fn parse_backend_key_data(payload: &Bytes) -> Result<BackendKeyData> {
    let mut b = payload.clone();
    need(&b, 8, "backend key data")?;
    Ok(BackendKeyData {
        process_id: b.get_i32(),
        secret_key: b.get_i32(),
    })
}

/// ParameterStatus ('S'): a run-time parameter report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterStatus {
    pub name: String,
    pub value: String,
}

pub fn parse_parameter_status(payload: &Bytes) -> Result<ParameterStatus> {
    let mut b = payload.clone();
    Ok(ParameterStatus {
        name: get_cstr(&mut b)?,
        value: get_cstr(&mut b)?,
    })
}

/// ParameterDescription ('t'): oids of a prepared statement's parameters.
pub fn parse_parameter_description(payload: &Bytes) -> Result<Vec<u32>> {
    let mut b = payload.clone();
    need(&b, 2, "parameter description")?;
    let count = b.get_i16();
    let mut oids = Vec::with_capacity(count.max(0) as usize);
    for _ in 0..count {
        need(&b, 4, "parameter description oid")?;
        oids.push(b.get_u32());
    }
    Ok(oids)
}
