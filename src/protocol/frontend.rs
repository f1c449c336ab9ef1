//! Frontend (client -> server) message encoders.
//!
//! Each encoder appends one complete message to a `BytesMut`: type tag,
//! 4-byte big-endian length including itself, then the payload. The length
//! is back-patched after the payload is written, so encoders fill the buffer
//! in a single pass. The startup message has no type tag.

use bytes::{BufMut, BytesMut};

/// Protocol version 3.0.
pub const PROTOCOL_VERSION: i32 = 196608;

/// Reserve the 4-byte length field, returning its offset for [`patch_len`].
fn reserve_len(buf: &mut BytesMut) -> usize {
    let at = buf.len();
    buf.put_i32(0);
    at
}

/// Back-patch a length field to cover everything from `at` to the end.
fn patch_len(buf: &mut BytesMut, at: usize) {
    let len = (buf.len() - at) as i32;
    buf[at..at + 4].copy_from_slice(&len.to_be_bytes());
}

fn put_cstr(buf: &mut BytesMut, s: &str) {
    buf.extend_from_slice(s.as_bytes());
    buf.put_u8(0);
}

/// StartupMessage: protocol version plus `key\0value\0` pairs, then a
/// terminating NUL. For historical reasons it carries no type tag.
pub fn startup(buf: &mut BytesMut, params: &[(&str, &str)]) {
    let at = reserve_len(buf);
    buf.put_i32(PROTOCOL_VERSION);
    for (k, v) in params {
        put_cstr(buf, k);
        put_cstr(buf, v);
    }
    buf.put_u8(0);
    patch_len(buf, at);
}

/// PasswordMessage ('p'): also carries SASL responses during SCRAM.
///
/// The payload is taken verbatim; cleartext and MD5 responses must include
/// their trailing NUL.
pub fn password(buf: &mut BytesMut, payload: &[u8]) {
    buf.put_u8(b'p');
    let at = reserve_len(buf);
    buf.extend_from_slice(payload);
    patch_len(buf, at);
}

/// Query ('Q'): simple-query protocol.
pub fn query(buf: &mut BytesMut, sql: &str) {
    buf.put_u8(b'Q');
    let at = reserve_len(buf);
    put_cstr(buf, sql);
    patch_len(buf, at);
}

/// Parse ('P'): prepare `sql` under `statement` (empty string selects the
/// unnamed statement). `param_oids` pre-specifies parameter types; zero
/// leaves a type unspecified.
pub fn parse(buf: &mut BytesMut, statement: &str, sql: &str, param_oids: &[u32]) {
    buf.put_u8(b'P');
    let at = reserve_len(buf);
    put_cstr(buf, statement);
    put_cstr(buf, sql);
    buf.put_i16(param_oids.len() as i16);
    for oid in param_oids {
        buf.put_u32(*oid);
    }
    patch_len(buf, at);
}

/// Bind ('B'): bind `params` to `statement`, producing `portal`.
///
/// Each parameter carries its own format code (0 text, 1 binary); `None`
/// binds SQL NULL (length -1, no value bytes). `result_formats` follows the
/// protocol's short-hand: empty means all-text, a single code applies to
/// every result column.
pub fn bind(
    buf: &mut BytesMut,
    portal: &str,
    statement: &str,
    params: &[(i16, Option<&[u8]>)],
    result_formats: &[i16],
) {
    buf.put_u8(b'B');
    let at = reserve_len(buf);
    put_cstr(buf, portal);
    put_cstr(buf, statement);

    buf.put_i16(params.len() as i16);
    for (format, _) in params {
        buf.put_i16(*format);
    }

    buf.put_i16(params.len() as i16);
    for (_, value) in params {
        match value {
            Some(v) => {
                buf.put_i32(v.len() as i32);
                buf.extend_from_slice(v);
            }
            None => buf.put_i32(-1),
        }
    }

    buf.put_i16(result_formats.len() as i16);
    for f in result_formats {
        buf.put_i16(*f);
    }
    patch_len(buf, at);
}

/// Describe ('D') a prepared statement: yields ParameterDescription then
/// RowDescription or NoData.
pub fn describe_statement(buf: &mut BytesMut, statement: &str) {
    buf.put_u8(b'D');
    let at = reserve_len(buf);
    buf.put_u8(b'S');
    put_cstr(buf, statement);
    patch_len(buf, at);
}

/// Describe ('D') a portal: yields RowDescription or NoData.
pub fn describe_portal(buf: &mut BytesMut, portal: &str) {
    buf.put_u8(b'D');
    let at = reserve_len(buf);
    buf.put_u8(b'P');
    put_cstr(buf, portal);
    patch_len(buf, at);
}

/// Execute ('E'): run `portal`, returning at most `max_rows` rows (zero
/// means no limit). A limited execute may end in PortalSuspended.
pub fn execute(buf: &mut BytesMut, portal: &str, max_rows: i32) {
    buf.put_u8(b'E');
    let at = reserve_len(buf);
    put_cstr(buf, portal);
    buf.put_i32(max_rows);
    patch_len(buf, at);
}

/// Close ('C') a prepared statement.
pub fn close_statement(buf: &mut BytesMut, statement: &str) {
    buf.put_u8(b'C');
    let at = reserve_len(buf);
    buf.put_u8(b'S');
    put_cstr(buf, statement);
    patch_len(buf, at);
}

/// Close ('C') a portal.
pub fn close_portal(buf: &mut BytesMut, portal: &str) {
    buf.put_u8(b'C');
    let at = reserve_len(buf);
    buf.put_u8(b'P');
    put_cstr(buf, portal);
    patch_len(buf, at);
}

/// Sync ('S'): ends an extended-protocol batch; the server replies with
/// ReadyForQuery once the batch is processed.
pub fn sync(buf: &mut BytesMut) {
    buf.put_u8(b'S');
    buf.put_i32(4);
}

/// Terminate ('X'): polite disconnect.
pub fn terminate(buf: &mut BytesMut) {
    buf.put_u8(b'X');
    buf.put_i32(4);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn framed_len(buf: &[u8], at: usize) -> usize {
        i32::from_be_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]) as usize
    }

    #[test]
    fn startup_has_no_tag_and_correct_length() {
        let mut buf = BytesMut::new();
        startup(&mut buf, &[("user", "postgres"), ("database", "test")]);

        assert_eq!(framed_len(&buf, 0), buf.len());
        assert_eq!(
            i32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
            PROTOCOL_VERSION
        );
        let s = String::from_utf8_lossy(&buf);
        assert!(s.contains("user"));
        assert!(s.contains("postgres"));
        // terminating NUL after the last pair
        assert_eq!(buf[buf.len() - 1], 0);
    }

    #[test]
    fn query_is_nul_terminated() {
        let mut buf = BytesMut::new();
        query(&mut buf, "SELECT 1");

        assert_eq!(buf[0], b'Q');
        assert_eq!(framed_len(&buf, 1), buf.len() - 1);
        assert!(buf[5..].starts_with(b"SELECT 1"));
        assert_eq!(buf[buf.len() - 1], 0);
    }

    #[test]
    fn parse_carries_statement_sql_and_oids() {
        let mut buf = BytesMut::new();
        parse(&mut buf, "s1", "SELECT $1", &[23]);

        assert_eq!(buf[0], b'P');
        assert_eq!(framed_len(&buf, 1), buf.len() - 1);
        let s = String::from_utf8_lossy(&buf);
        assert!(s.contains("s1"));
        assert!(s.contains("SELECT $1"));
        // oid count then the oid itself at the tail
        let n = buf.len();
        assert_eq!(&buf[n - 6..n - 4], &1i16.to_be_bytes());
        assert_eq!(&buf[n - 4..], &23u32.to_be_bytes());
    }

    #[test]
    fn bind_encodes_null_as_minus_one() {
        let mut buf = BytesMut::new();
        bind(&mut buf, "", "s1", &[(1, None)], &[1]);

        assert_eq!(buf[0], b'B');
        assert_eq!(framed_len(&buf, 1), buf.len() - 1);
        let null_marker = (-1i32).to_be_bytes();
        let bytes: &[u8] = &buf;
        assert!(
            bytes.windows(4).any(|w| w == &null_marker[..]),
            "NULL parameter must be encoded as length -1"
        );
    }

    #[test]
    fn bind_encodes_value_bytes() {
        let mut buf = BytesMut::new();
        bind(&mut buf, "p", "s", &[(1, Some(&5i32.to_be_bytes()))], &[1]);

        let bytes: &[u8] = &buf;
        let needle = {
            let mut v = Vec::new();
            v.extend_from_slice(&4i32.to_be_bytes());
            v.extend_from_slice(&5i32.to_be_bytes());
            v
        };
        assert!(bytes.windows(needle.len()).any(|w| w == needle));
    }

    #[test]
    fn execute_carries_row_limit() {
        let mut buf = BytesMut::new();
        execute(&mut buf, "", 50);

        assert_eq!(buf[0], b'E');
        assert_eq!(&buf[buf.len() - 4..], &50i32.to_be_bytes());
    }

    #[test]
    fn describe_and_close_variants() {
        let mut buf = BytesMut::new();
        describe_statement(&mut buf, "s1");
        assert_eq!(buf[0], b'D');
        assert_eq!(buf[5], b'S');

        let mut buf = BytesMut::new();
        describe_portal(&mut buf, "p1");
        assert_eq!(buf[5], b'P');

        let mut buf = BytesMut::new();
        close_statement(&mut buf, "s1");
        assert_eq!(buf[0], b'C');
        assert_eq!(buf[5], b'S');

        let mut buf = BytesMut::new();
        close_portal(&mut buf, "p1");
        assert_eq!(buf[5], b'P');
    }

    #[test]
    fn sync_and_terminate_are_fixed_size() {
        let mut buf = BytesMut::new();
        sync(&mut buf);
        assert_eq!(&buf[..], &[b'S', 0, 0, 0, 4]);

        let mut buf = BytesMut::new();
        terminate(&mut buf);
        assert_eq!(&buf[..], &[b'X', 0, 0, 0, 4]);
    }
}
