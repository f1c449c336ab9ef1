//! Primitive value shapes at the client boundary.
//!
//! [`Value`] enumerates the shapes the high-level layer encodes into Bind
//! parameters and decodes out of DataRow columns. Each shape has a binary
//! and (where PostgreSQL defines one) a text wire form; binary temporal
//! forms honour the server's `integer_datetimes` setting (microseconds as
//! int64 when on, seconds as float8 when off - the float form survives only
//! on ancient servers but costs little to keep).
//!
//! Per-type codecs beyond these shapes plug in through [`ValueCodec`].

use bytes::{Buf, Bytes};
use rust_decimal::Decimal;
use time::macros::{date, datetime};
use time::{Date, Duration, OffsetDateTime, PrimitiveDateTime, Time, UtcDateTime};

use crate::protocol::backend::ColumnDescription;
use crate::results::{DecodeRow, ResultSet, RowError};

/// Type oids this crate knows how to decode.
pub mod oid {
    pub const BOOL: u32 = 16;
    pub const BYTEA: u32 = 17;
    pub const CHAR: u32 = 18;
    pub const INT8: u32 = 20;
    pub const INT2: u32 = 21;
    pub const INT4: u32 = 23;
    pub const TEXT: u32 = 25;
    pub const OID: u32 = 26;
    pub const FLOAT4: u32 = 700;
    pub const FLOAT8: u32 = 701;
    pub const BPCHAR: u32 = 1042;
    pub const VARCHAR: u32 = 1043;
    pub const DATE: u32 = 1082;
    pub const TIME: u32 = 1083;
    pub const TIMESTAMP: u32 = 1114;
    pub const TIMESTAMPTZ: u32 = 1184;
    pub const INTERVAL: u32 = 1186;
    pub const NUMERIC: u32 = 1700;
}

const PG_EPOCH_DATE: Date = date!(2000 - 01 - 01);
const PG_EPOCH: PrimitiveDateTime = datetime!(2000-01-01 0:00);
const PG_EPOCH_UTC: OffsetDateTime = datetime!(2000-01-01 0:00 UTC);

/// A primitive value at the client boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// SQL NULL - the nullable-of-value shape collapses to this on the wire
    /// (length -1, no value bytes).
    Null,
    Bool(bool),
    Char(char),
    Int4(i32),
    Int8(i64),
    UInt4(u32),
    UInt8(u64),
    Float8(f64),
    /// Arbitrary-precision numeric.
    Numeric(Decimal),
    /// Exact ratio; travels as text since PostgreSQL has no native type.
    Rational { numerator: i64, denominator: i64 },
    Text(String),
    Bytes(Bytes),
    Date(Date),
    /// Timestamp without time zone.
    Timestamp(PrimitiveDateTime),
    /// Timestamp with time zone, any offset.
    TimestampTz(OffsetDateTime),
    /// Timestamp pinned to UTC.
    TimestampUtc(UtcDateTime),
    Time(Time),
    /// Duration, mapped to `interval` with no day/month component.
    Interval(Duration),
}

impl Value {
    /// The wire format this shape travels in: 0 text, 1 binary.
    pub fn format(&self, _integer_datetimes: bool) -> i16 {
        match self {
            Value::Char(_) | Value::Numeric(_) | Value::Rational { .. } | Value::Text(_) => 0,
            Value::Null => 0,
            _ => 1,
        }
    }

    /// Encode for a Bind parameter. `None` binds SQL NULL.
    pub fn encode(&self, integer_datetimes: bool) -> Option<Vec<u8>> {
        match self {
            Value::Null => None,
            Value::Bool(b) => Some(vec![u8::from(*b)]),
            Value::Char(c) => Some(c.to_string().into_bytes()),
            Value::Int4(v) => Some(v.to_be_bytes().to_vec()),
            Value::Int8(v) => Some(v.to_be_bytes().to_vec()),
            Value::UInt4(v) => Some(v.to_be_bytes().to_vec()),
            Value::UInt8(v) => Some(v.to_be_bytes().to_vec()),
            Value::Float8(v) => Some(v.to_be_bytes().to_vec()),
            Value::Numeric(d) => Some(d.to_string().into_bytes()),
            Value::Rational {
                numerator,
                denominator,
            } => Some(format!("{numerator}/{denominator}").into_bytes()),
            Value::Text(s) => Some(s.clone().into_bytes()),
            Value::Bytes(b) => Some(b.to_vec()),
            Value::Date(d) => {
                let days = (*d - PG_EPOCH_DATE).whole_days() as i32;
                Some(days.to_be_bytes().to_vec())
            }
            Value::Timestamp(dt) => Some(encode_timestamp(*dt - PG_EPOCH, integer_datetimes)),
            Value::TimestampTz(dt) => {
                Some(encode_timestamp(*dt - PG_EPOCH_UTC, integer_datetimes))
            }
            Value::TimestampUtc(dt) => Some(encode_timestamp(
                OffsetDateTime::from(*dt) - PG_EPOCH_UTC,
                integer_datetimes,
            )),
            Value::Time(t) => {
                let micros = (*t - Time::MIDNIGHT).whole_microseconds() as i64;
                Some(micros.to_be_bytes().to_vec())
            }
            Value::Interval(d) => {
                let mut out = Vec::with_capacity(16);
                out.extend_from_slice(&(d.whole_microseconds() as i64).to_be_bytes());
                out.extend_from_slice(&0i32.to_be_bytes()); // days
                out.extend_from_slice(&0i32.to_be_bytes()); // months
                Some(out)
            }
        }
    }

    /// Decode one column value.
    ///
    /// `raw = None` is SQL NULL. Unknown oids fall back to `Text` (text
    /// format) or `Bytes` (binary format) so callers can still get at the
    /// data.
    pub fn decode(
        raw: Option<&Bytes>,
        type_oid: u32,
        format: i16,
        integer_datetimes: bool,
    ) -> Result<Value, String> {
        let Some(raw) = raw else {
            return Ok(Value::Null);
        };
        if format == 1 {
            decode_binary(raw, type_oid, integer_datetimes)
        } else {
            decode_text(raw, type_oid)
        }
    }
}

fn encode_timestamp(since_epoch: Duration, integer_datetimes: bool) -> Vec<u8> {
    if integer_datetimes {
        (since_epoch.whole_microseconds() as i64).to_be_bytes().to_vec()
    } else {
        since_epoch.as_seconds_f64().to_be_bytes().to_vec()
    }
}

fn take_i32(raw: &Bytes, what: &str) -> Result<i32, String> {
    if raw.len() != 4 {
        return Err(format!("{what}: expected 4 bytes, got {}", raw.len()));
    }
    Ok(raw.clone().get_i32())
}

fn take_i64(raw: &Bytes, what: &str) -> Result<i64, String> {
    if raw.len() != 8 {
        return Err(format!("{what}: expected 8 bytes, got {}", raw.len()));
    }
    Ok(raw.clone().get_i64())
}

fn timestamp_offset(raw: &Bytes, integer_datetimes: bool) -> Result<Duration, String> {
    if integer_datetimes {
        Ok(Duration::microseconds(take_i64(raw, "timestamp")?))
    } else {
        if raw.len() != 8 {
            return Err(format!("timestamp: expected 8 bytes, got {}", raw.len()));
        }
        let seconds = f64::from_be_bytes(raw[..8].try_into().expect("length checked"));
        Ok(Duration::seconds_f64(seconds))
    }
}

fn decode_binary(raw: &Bytes, type_oid: u32, integer_datetimes: bool) -> Result<Value, String> {
    match type_oid {
        oid::BOOL => match raw.first() {
            Some(0) => Ok(Value::Bool(false)),
            Some(1) => Ok(Value::Bool(true)),
            _ => Err("bool: expected a single 0/1 byte".into()),
        },
        oid::CHAR => match raw.first() {
            Some(&b) => Ok(Value::Char(b as char)),
            None => Err("char: empty value".into()),
        },
        oid::INT2 => {
            if raw.len() != 2 {
                return Err(format!("int2: expected 2 bytes, got {}", raw.len()));
            }
            Ok(Value::Int4(i32::from(raw.clone().get_i16())))
        }
        oid::INT4 => Ok(Value::Int4(take_i32(raw, "int4")?)),
        oid::INT8 => Ok(Value::Int8(take_i64(raw, "int8")?)),
        oid::OID => {
            if raw.len() != 4 {
                return Err(format!("oid: expected 4 bytes, got {}", raw.len()));
            }
            Ok(Value::UInt4(raw.clone().get_u32()))
        }
        oid::FLOAT4 => {
            if raw.len() != 4 {
                return Err(format!("float4: expected 4 bytes, got {}", raw.len()));
            }
            Ok(Value::Float8(f64::from(f32::from_be_bytes(
                raw[..4].try_into().expect("length checked"),
            ))))
        }
        oid::FLOAT8 => {
            if raw.len() != 8 {
                return Err(format!("float8: expected 8 bytes, got {}", raw.len()));
            }
            Ok(Value::Float8(f64::from_be_bytes(
                raw[..8].try_into().expect("length checked"),
            )))
        }
        oid::NUMERIC => {
            // binary numeric is digit-group encoded; decode via text form is
            // not possible here, so surface the raw bytes
            Err("numeric: binary format not supported, request text results".into())
        }
        oid::TEXT | oid::VARCHAR | oid::BPCHAR => String::from_utf8(raw.to_vec())
            .map(Value::Text)
            .map_err(|e| format!("text: {e}")),
        oid::BYTEA => Ok(Value::Bytes(raw.clone())),
        oid::DATE => {
            let days = take_i32(raw, "date")?;
            PG_EPOCH_DATE
                .checked_add(Duration::days(i64::from(days)))
                .map(Value::Date)
                .ok_or_else(|| format!("date: {days} days out of range"))
        }
        oid::TIME => {
            let micros = take_i64(raw, "time")?;
            if !(0..24 * 60 * 60 * 1_000_000).contains(&micros) {
                return Err(format!("time: {micros} microseconds out of range"));
            }
            Ok(Value::Time(Time::MIDNIGHT + Duration::microseconds(micros)))
        }
        oid::TIMESTAMP => {
            let offset = timestamp_offset(raw, integer_datetimes)?;
            PG_EPOCH
                .checked_add(offset)
                .map(Value::Timestamp)
                .ok_or_else(|| "timestamp out of range".to_string())
        }
        oid::TIMESTAMPTZ => {
            let offset = timestamp_offset(raw, integer_datetimes)?;
            PG_EPOCH_UTC
                .checked_add(offset)
                .map(|dt| Value::TimestampUtc(UtcDateTime::from(dt)))
                .ok_or_else(|| "timestamptz out of range".to_string())
        }
        oid::INTERVAL => {
            if raw.len() != 16 {
                return Err(format!("interval: expected 16 bytes, got {}", raw.len()));
            }
            let mut b = raw.clone();
            let micros = b.get_i64();
            let days = b.get_i32();
            let months = b.get_i32();
            if months != 0 {
                return Err("interval: month component has no fixed duration".into());
            }
            Ok(Value::Interval(
                Duration::microseconds(micros) + Duration::days(i64::from(days)),
            ))
        }
        _ => Ok(Value::Bytes(raw.clone())),
    }
}

fn decode_text(raw: &Bytes, type_oid: u32) -> Result<Value, String> {
    let s = std::str::from_utf8(raw).map_err(|e| format!("text value: {e}"))?;
    match type_oid {
        oid::BOOL => match s {
            "t" => Ok(Value::Bool(true)),
            "f" => Ok(Value::Bool(false)),
            other => Err(format!("bool: unexpected text '{other}'")),
        },
        oid::CHAR => {
            let mut chars = s.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Ok(Value::Char(c)),
                _ => Err(format!("char: expected one character, got '{s}'")),
            }
        }
        oid::INT2 | oid::INT4 => s
            .parse()
            .map(Value::Int4)
            .map_err(|e| format!("int4: {e}")),
        oid::INT8 => s.parse().map(Value::Int8).map_err(|e| format!("int8: {e}")),
        oid::OID => s
            .parse()
            .map(Value::UInt4)
            .map_err(|e| format!("oid: {e}")),
        oid::FLOAT4 | oid::FLOAT8 => s
            .parse()
            .map(Value::Float8)
            .map_err(|e| format!("float8: {e}")),
        oid::NUMERIC => s
            .parse::<Decimal>()
            .map(Value::Numeric)
            .map_err(|e| format!("numeric: {e}")),
        oid::BYTEA => {
            let hex = s
                .strip_prefix("\\x")
                .ok_or_else(|| "bytea: expected \\x hex form".to_string())?;
            decode_hex(hex).map(|v| Value::Bytes(Bytes::from(v)))
        }
        oid::DATE => Date::parse(s, DATE_FORMAT)
            .map(Value::Date)
            .map_err(|e| format!("date: {e}")),
        oid::TIME => Time::parse(s, TIME_FORMAT)
            .map(Value::Time)
            .map_err(|e| format!("time: {e}")),
        oid::TIMESTAMP => PrimitiveDateTime::parse(s, TIMESTAMP_FORMAT)
            .map(Value::Timestamp)
            .map_err(|e| format!("timestamp: {e}")),
        oid::TIMESTAMPTZ => OffsetDateTime::parse(s, TIMESTAMPTZ_FORMAT)
            .map(Value::TimestampTz)
            .map_err(|e| format!("timestamptz: {e}")),
        oid::INTERVAL => Err("interval: text format not supported, request binary results".into()),
        _ => Ok(Value::Text(s.to_string())),
    }
}

type FormatItems<'a> = &'a [time::format_description::BorrowedFormatItem<'a>];

const DATE_FORMAT: FormatItems<'static> =
    time::macros::format_description!("[year]-[month]-[day]");
const TIME_FORMAT: FormatItems<'static> =
    time::macros::format_description!("[hour]:[minute]:[second][optional [.[subsecond]]]");
const TIMESTAMP_FORMAT: FormatItems<'static> = time::macros::format_description!(
    "[year]-[month]-[day] [hour]:[minute]:[second][optional [.[subsecond]]]"
);
const TIMESTAMPTZ_FORMAT: FormatItems<'static> = time::macros::format_description!(
    "[year]-[month]-[day] [hour]:[minute]:[second][optional [.[subsecond]]][offset_hour sign:mandatory][optional [:[offset_minute]]]"
);

fn decode_hex(hex: &str) -> Result<Vec<u8>, String> {
    if hex.len() % 2 != 0 {
        return Err("bytea: odd hex length".into());
    }
    let nibble = |c: u8| -> Result<u8, String> {
        match c {
            b'0'..=b'9' => Ok(c - b'0'),
            b'a'..=b'f' => Ok(c - b'a' + 10),
            b'A'..=b'F' => Ok(c - b'A' + 10),
            _ => Err(format!("bytea: invalid hex digit '{}'", c as char)),
        }
    };
    hex.as_bytes()
        .chunks(2)
        .map(|pair| Ok(nibble(pair[0])? << 4 | nibble(pair[1])?))
        .collect()
}

/// Pluggable codec seam: maps [`Value`]s to and from their wire form.
///
/// The default [`WireCodec`] handles the primitive shapes above; richer
/// type mappings implement this trait and slot into the same call sites.
pub trait ValueCodec: Send + Sync {
    /// Produce (format code, encoded bytes) for a Bind parameter.
    fn encode(&self, value: &Value, integer_datetimes: bool) -> (i16, Option<Vec<u8>>);

    /// Decode one column value.
    fn decode(
        &self,
        raw: Option<&Bytes>,
        column: Option<&ColumnDescription>,
        integer_datetimes: bool,
    ) -> Result<Value, String>;
}

/// The built-in codec for the primitive value shapes.
#[derive(Debug, Clone, Copy, Default)]
pub struct WireCodec;

impl ValueCodec for WireCodec {
    fn encode(&self, value: &Value, integer_datetimes: bool) -> (i16, Option<Vec<u8>>) {
        (
            value.format(integer_datetimes),
            value.encode(integer_datetimes),
        )
    }

    fn decode(
        &self,
        raw: Option<&Bytes>,
        column: Option<&ColumnDescription>,
        integer_datetimes: bool,
    ) -> Result<Value, String> {
        let (type_oid, format) = column.map(|c| (c.type_oid, c.format)).unwrap_or((0, 0));
        Value::decode(raw, type_oid, format, integer_datetimes)
    }
}

/// Row decoder turning every column into a [`Value`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ValueRow;

impl DecodeRow for ValueRow {
    type Output = Vec<Value>;

    fn decode_row(
        &self,
        set: &ResultSet,
        row: usize,
        columns: usize,
        integer_datetimes: bool,
    ) -> Result<Vec<Value>, RowError> {
        let Some(cells) = set.rows.get(row) else {
            return Err(RowError::ColumnOutOfRange(0));
        };
        let width = if columns == 0 { cells.len() } else { columns };
        let mut out = Vec::with_capacity(width);
        for col in 0..width {
            let raw = cells
                .get(col)
                .ok_or(RowError::ColumnOutOfRange(col))?
                .as_ref();
            let value = WireCodec
                .decode(raw, set.columns.get(col), integer_datetimes)
                .map_err(|message| RowError::Decode {
                    index: col,
                    message,
                })?;
            out.push(value);
        }
        Ok(out)
    }
}
