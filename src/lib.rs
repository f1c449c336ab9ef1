//! # pgpipe
//!
//! A pipelined PostgreSQL wire-protocol (v3.0) client core for Tokio.
//!
//! The heart of the crate is the connection dispatcher: five cooperating
//! tasks (serializer, sender, receiver, slicer, interpreter) communicating
//! over channels, preserving strict pipeline order between submitted
//! requests and their parsed replies. On top of it sit the protocol codecs,
//! composable reply parsers, a session abstraction for chained round trips,
//! and a row-oriented result surface.
//!
//! ## Features
//!
//! - **Pipelined by construction** - requests admitted concurrently are
//!   serialised once and answered in order; a multi-message request
//!   (Parse + Bind + Execute + Sync) is a single pipeline entry
//! - **Fail-fast transport errors** - one write-once fuse; every pending
//!   and future request observes the same terminal error
//! - **Async notifications** - NOTIFY and stray server errors are routed
//!   to an unaffiliated sink without blocking the pipeline
//! - **Cleartext, MD5, and SCRAM-SHA-256** authentication
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pgpipe::{ConnectConfig, Connection, results, value::ValueRow};
//!
//! # async fn example() -> pgpipe::Result<()> {
//! let cfg = ConnectConfig::new("localhost", "postgres", "secret", "mydb");
//! let conn = Connection::connect(&cfg).await?;
//!
//! let set = conn.simple_query("SELECT 1").await?;
//! let rows = results::vector(&set, &ValueRow, conn.integer_datetimes())
//!     .expect("one text column per row");
//! println!("{} row(s)", rows.len());
//!
//! conn.close().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `md5` (default) - MD5 password authentication
//! - `scram` (default) - SCRAM-SHA-256 authentication

#![warn(
    clippy::all,
    clippy::cargo,
    clippy::perf,
    clippy::style,
    clippy::correctness,
    clippy::suspicious
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate,
    clippy::multiple_crate_versions
)]

pub mod auth;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod protocol;
pub mod request;
pub mod results;
pub mod value;

pub use config::{ConnectConfig, Settings};
pub use connection::{Connection, Statement};
pub use dispatch::{AsyncMessage, Dispatcher};
pub use error::{BackendError, PgPipeError, Result};
pub use protocol::backend::Notification;
pub use request::{Request, Session};
pub use results::ResultSet;
pub use value::Value;
