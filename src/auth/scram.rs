//! SCRAM-SHA-256 client (RFC 5802/7677), as used by SASL authentication.
//!
//! The conversation is three messages: client-first (inside a
//! SASLInitialResponse), client-final (answering the server-first
//! challenge), and the server signature check once AuthenticationSASLFinal
//! arrives. [`ScramFlow`] holds the state across those steps; the startup
//! session threads it through its continuations.

use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::{PgPipeError, Result};

type HmacSha256 = Hmac<Sha256>;

pub const MECHANISM: &str = "SCRAM-SHA-256";

/// Channel-binding header for clients that neither support nor require it:
/// `base64("n,,")`.
const GS2_HEADER_B64: &str = "biws";

/// Client state after sending client-first.
#[derive(Debug, Clone)]
pub struct ScramFlow {
    nonce_b64: String,
    client_first_bare: String,
}

/// Everything needed to check the server signature after client-final.
#[derive(Debug, Clone)]
pub struct ServerProof {
    salted_password: Vec<u8>,
    auth_message: String,
}

impl ScramFlow {
    pub fn new(username: &str) -> ScramFlow {
        let mut nonce = [0u8; 18];
        rand::rng().fill_bytes(&mut nonce);
        Self::with_nonce(username, &B64.encode(nonce))
    }

    fn with_nonce(username: &str, nonce_b64: &str) -> ScramFlow {
        let user = escape_username(username);
        ScramFlow {
            nonce_b64: nonce_b64.to_string(),
            client_first_bare: format!("n={user},r={nonce_b64}"),
        }
    }

    /// The SASLInitialResponse payload body: gs2 header plus client-first-bare.
    pub fn client_first(&self) -> String {
        format!("n,,{}", self.client_first_bare)
    }

    /// Answer the server-first challenge, producing the client-final
    /// message and the state needed to verify the server afterwards.
    pub fn answer(&self, password: &str, server_first: &str) -> Result<(String, ServerProof)> {
        let challenge = Challenge::parse(server_first)?;
        if !challenge.nonce.starts_with(&self.nonce_b64) {
            return Err(PgPipeError::Auth("SCRAM nonce mismatch".into()));
        }

        let without_proof = format!("c={GS2_HEADER_B64},r={}", challenge.nonce);
        let auth_message = format!(
            "{},{server_first},{without_proof}",
            self.client_first_bare
        );

        let salted_password = hi(password.as_bytes(), &challenge.salt, challenge.iterations);
        let client_key = hmac(&salted_password, b"Client Key");
        let stored_key = Sha256::digest(&client_key);
        let client_signature = hmac(stored_key.as_slice(), auth_message.as_bytes());

        let proof: Vec<u8> = client_key
            .iter()
            .zip(client_signature.iter())
            .map(|(k, s)| k ^ s)
            .collect();

        let client_final = format!("{without_proof},p={}", B64.encode(proof));
        Ok((
            client_final,
            ServerProof {
                salted_password,
                auth_message,
            },
        ))
    }
}

impl ServerProof {
    /// Check the `v=` signature from AuthenticationSASLFinal.
    pub fn verify(&self, server_final: &str) -> Result<()> {
        let v = server_final
            .split(',')
            .find_map(|part| part.strip_prefix("v="))
            .ok_or_else(|| PgPipeError::Auth("SCRAM final missing v".into()))?;
        let signature = B64
            .decode(v.trim().as_bytes())
            .map_err(|e| PgPipeError::Auth(format!("bad server signature b64: {e}")))?;

        let server_key = hmac(&self.salted_password, b"Server Key");
        let expected = hmac(&server_key, self.auth_message.as_bytes());
        if signature != expected {
            return Err(PgPipeError::Auth("SCRAM server signature mismatch".into()));
        }
        Ok(())
    }
}

struct Challenge {
    nonce: String,
    salt: Vec<u8>,
    iterations: u32,
}

impl Challenge {
    fn parse(server_first: &str) -> Result<Challenge> {
        let mut nonce = None;
        let mut salt_b64 = None;
        let mut iterations = None;
        for part in server_first.split(',') {
            if let Some(v) = part.strip_prefix("r=") {
                nonce = Some(v.to_string());
            } else if let Some(v) = part.strip_prefix("s=") {
                salt_b64 = Some(v.to_string());
            } else if let Some(v) = part.strip_prefix("i=") {
                iterations = v.parse::<u32>().ok();
            }
        }
        let missing = |what| PgPipeError::Auth(format!("SCRAM server-first missing {what}"));
        let salt = B64
            .decode(salt_b64.ok_or_else(|| missing("s"))?.as_bytes())
            .map_err(|e| PgPipeError::Auth(format!("bad SCRAM salt b64: {e}")))?;
        Ok(Challenge {
            nonce: nonce.ok_or_else(|| missing("r"))?,
            salt,
            iterations: iterations.ok_or_else(|| missing("i"))?,
        })
    }
}

fn escape_username(u: &str) -> String {
    u.replace('=', "=3D").replace(',', "=2C")
}

/// RFC 5802 Hi(): iterated, XOR-folded HMAC.
fn hi(password: &[u8], salt: &[u8], iterations: u32) -> Vec<u8> {
    let mut block = Vec::with_capacity(salt.len() + 4);
    block.extend_from_slice(salt);
    block.extend_from_slice(&1u32.to_be_bytes());

    let mut u = hmac(password, &block);
    let mut out = u.clone();
    for _ in 1..iterations {
        u = hmac(password, &u);
        for (o, b) in out.iter_mut().zip(u.iter()) {
            *o ^= *b;
        }
    }
    out
}

fn hmac(key: &[u8], msg: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(msg);
    mac.finalize().into_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_first_carries_gs2_header_and_nonce() {
        let flow = ScramFlow::new("user");
        assert!(flow.client_first().starts_with("n,,n=user,r="));
    }

    #[test]
    fn usernames_are_escaped() {
        let flow = ScramFlow::new("a=b,c");
        assert!(flow.client_first().contains("n=a=3Db=2Cc,"));
    }

    #[test]
    fn challenge_parse_extracts_fields() {
        let c = Challenge::parse("r=abc,s=Zm9v,i=4096").unwrap();
        assert_eq!(c.nonce, "abc");
        assert_eq!(c.salt, b"foo");
        assert_eq!(c.iterations, 4096);
        assert!(Challenge::parse("s=Zm9v,i=4096").is_err());
    }

    #[test]
    fn rfc7677_test_vector() {
        // The SCRAM-SHA-256 example exchange from RFC 7677 §3.
        let flow = ScramFlow::with_nonce("user", "rOprNGfwEbeRWgbNEkqO");
        assert_eq!(
            flow.client_first(),
            "n,,n=user,r=rOprNGfwEbeRWgbNEkqO"
        );

        let server_first = "r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,\
                            s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096";
        let (client_final, proof) = flow.answer("pencil", server_first).unwrap();
        assert_eq!(
            client_final,
            "c=biws,r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,\
             p=dHzbZapWIk4jUhN+Ute9ytag9zjfMHgsqmmiz7AndVQ="
        );

        proof
            .verify("v=6rriTRBi23WpRR/wtup+mMhUZUn/dB5nLTJRsjl95G4=")
            .unwrap();
        assert!(proof.verify("v=aW52YWxpZA==").is_err());
    }

    #[test]
    fn nonce_mismatch_is_rejected() {
        let flow = ScramFlow::with_nonce("user", "clientnonce");
        let err = flow
            .answer("pw", "r=othernonce,s=Zm9v,i=1")
            .unwrap_err();
        assert!(err.to_string().contains("nonce"));
    }
}
