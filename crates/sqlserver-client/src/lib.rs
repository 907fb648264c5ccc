//! # sqlserver-client
//!
//! A pooled async client for Microsoft SQL Server over the TDS protocol.
//!
//! Each connection's socket is owned by a dedicated I/O task; requests are
//! submitted over a channel and strictly serialised per connection (no
//! MARS). The public [`Client`] leases connections from a bounded pool and
//! offers ad-hoc batches, parameterised execution via `sp_executesql`,
//! stored procedure calls with OUT parameters, `GO`-separated scripts, and
//! transactions scoped to an exclusive connection lease.
//!
//! ## Example
//!
//! ```rust,ignore
//! use sqlserver_client::{Client, Config};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), sqlserver_client::Error> {
//!     let config = Config::new("localhost")
//!         .sql_auth("sa", "Password123")
//!         .database("app");
//!     let client = Client::connect(config)?;
//!
//!     let rows = client.query("SELECT id, name FROM users").await?;
//!     for row in &rows {
//!         let id: i32 = row.get(0)?;
//!         let name: String = row.get_by_name("name")?;
//!         println!("{id}: {name}");
//!     }
//!
//!     client
//!         .with_connection(async |conn| {
//!             conn.begin_transaction(Default::default()).await?;
//!             conn.execute("UPDATE accounts SET balance = balance - 10 WHERE id = 1").await?;
//!             conn.execute("UPDATE accounts SET balance = balance + 10 WHERE id = 2").await?;
//!             conn.commit().await
//!         })
//!         .await?;
//!
//!     client.shutdown().await;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

mod assembler;
pub mod cancel;
pub mod client;
pub mod config;
pub mod conn;
pub mod error;
pub mod result;
pub mod row;
pub mod script;

pub use cancel::CancelHandle;
pub use client::Client;
pub use config::{Config, Credentials, EncryptionMode, Timeouts};
pub use conn::Connection;
pub use error::{Error, Result, ServerError};
pub use result::{ExecutionResult, OutputValue, ResultSet};
pub use row::{FromValue, Row};
pub use script::{split_batches, Batch};

// The wire-level types callers meet in parameters and results.
pub use sqlserver_pool::{PoolConfig, PoolStatus, RetryPolicy};
pub use tds_wire::{IsolationLevel, Param, ParamDirection, Value};
