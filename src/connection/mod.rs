//! Connection Module
//!
//! The client side of one RESP conversation: serialize commands, push them
//! out, and pull replies back in order.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Connection                           │
//! │                                                             │
//! │  write() ──> ┌──────────────┐  flush() / read()             │
//! │              │ pending buf  │ ──────────────┐               │
//! │              └──────────────┘               ▼               │
//! │                                      ┌─────────────┐        │
//! │                                      │  Transport  │<──┐    │
//! │                                      └──────┬──────┘   │    │
//! │                                             │ bytes    │    │
//! │                                             ▼          │    │
//! │  read() <── ReplyValue <── ┌──────────────┐  wait_*    │    │
//! │                            │ ReplyReader  │ (timeouts)─┘    │
//! │                            └──────────────┘                 │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use respwire::{Connection, ConnectionConfig, Endpoint};
//!
//! # async fn run() -> respwire::Result<()> {
//! let mut conn = Connection::open(Endpoint::tcp("127.0.0.1", 6379), None, ConnectionConfig::default()).await?;
//! let reply = conn.call(&["PING"]).await?;
//! println!("{}", reply);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod driver;

pub use config::ConnectionConfig;
pub use driver::{Connection, ConnectionState};
