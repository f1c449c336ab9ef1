use std::fmt::Write as _;

/// Connection endpoint, credentials, and dispatcher tuning knobs.
#[derive(Debug, Clone)]
pub struct ConnectConfig {
    pub host: String,
    pub port: u16,

    pub user: String,
    pub password: String,
    pub database: String,

    /// Size of each read buffer handed to the socket (>= 8 KiB recommended).
    pub read_buffer_size: usize,

    /// Depth of the request-submission queue. New requests block here when
    /// the serializer falls behind.
    pub submit_queue_depth: usize,

    /// Bound on outbound bytes queued between serializer and sender. This is
    /// a byte budget, not a message count: a full budget blocks the
    /// serializer, which blocks new submissions.
    pub outgoing_buffer_bytes: usize,

    /// Depth of the inbound chunk queue between receiver and slicer.
    pub inbound_chunk_depth: usize,

    /// Depth of the inbound message queue between slicer and interpreter.
    pub inbound_message_depth: usize,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 5432,
            user: "postgres".into(),
            password: "postgres".into(),
            database: "postgres".into(),

            read_buffer_size: 16 * 1024,
            submit_queue_depth: 32,
            outgoing_buffer_bytes: 256 * 1024,
            inbound_chunk_depth: 64,
            inbound_message_depth: 256,
        }
    }
}

impl ConnectConfig {
    pub fn new(
        host: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            user: user.into(),
            password: password.into(),
            database: database.into(),
            ..Default::default()
        }
    }

    /// The endpoint settings as a [`Settings`] value.
    pub fn settings(&self) -> Settings {
        Settings::Fields {
            host: self.host.clone(),
            port: self.port,
            user: self.user.clone(),
            password: self.password.clone(),
            database: self.database.clone(),
        }
    }
}

/// Endpoint settings: either discrete fields or an opaque pre-formatted
/// connection string passed through unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settings {
    Fields {
        host: String,
        port: u16,
        user: String,
        password: String,
        database: String,
    },
    /// A raw `key=value` connection string, rendered as-is.
    Raw(String),
}

impl Settings {
    /// Render as a space-separated `key=value` string.
    ///
    /// Empty fields and port 0 are omitted; remaining fields are joined by
    /// single spaces in order: host, port, user, password, dbname.
    pub fn render(&self) -> String {
        match self {
            Settings::Raw(s) => s.clone(),
            Settings::Fields {
                host,
                port,
                user,
                password,
                database,
            } => {
                let mut out = String::new();
                let mut push = |key: &str, value: &str| {
                    if value.is_empty() {
                        return;
                    }
                    if !out.is_empty() {
                        out.push(' ');
                    }
                    // write! into String is infallible
                    let _ = write!(out, "{key}={value}");
                };
                push("host", host);
                if *port != 0 {
                    push("port", &port.to_string());
                }
                push("user", user);
                push("password", password);
                push("dbname", database);
                out
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(host: &str, port: u16, user: &str, password: &str, database: &str) -> Settings {
        Settings::Fields {
            host: host.into(),
            port,
            user: user.into(),
            password: password.into(),
            database: database.into(),
        }
    }

    #[test]
    fn render_joins_fields_in_order() {
        let s = fields("localhost", 5432, "alice", "secret", "app");
        assert_eq!(
            s.render(),
            "host=localhost port=5432 user=alice password=secret dbname=app"
        );
    }

    #[test]
    fn render_omits_empty_fields_and_port_zero() {
        let s = fields("localhost", 0, "alice", "", "app");
        assert_eq!(s.render(), "host=localhost user=alice dbname=app");
    }

    #[test]
    fn render_of_all_empty_is_empty() {
        let s = fields("", 0, "", "", "");
        assert_eq!(s.render(), "");
    }

    #[test]
    fn raw_settings_pass_through() {
        let s = Settings::Raw("host=db.internal sslmode=disable".into());
        assert_eq!(s.render(), "host=db.internal sslmode=disable");
    }

    #[test]
    fn config_default_is_local() {
        let cfg = ConnectConfig::default();
        assert_eq!(cfg.port, 5432);
        assert!(cfg.read_buffer_size >= 8 * 1024);
    }
}
