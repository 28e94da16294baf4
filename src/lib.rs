//! # muxwire
//!
//! Many independent, flow-controlled byte streams over one ordered,
//! reliable transport (a TCP socket, a pipe, an in-memory duplex).
//!
//! ## Architecture
//!
//! - **Frames**: every unit on the wire starts with a fixed 12-byte
//!   big-endian header (version, type, flags, stream ID, length). Only
//!   Data frames carry a payload.
//! - **Session**: one per transport. A reader task demultiplexes inbound
//!   frames, a writer task serializes outbound ones, an optional keepalive
//!   task pings the remote.
//! - **Streams**: [`Stream`] implements tokio's `AsyncRead`/`AsyncWrite`.
//!   Each direction has a credit window (256 KiB initially); writers park
//!   when it is used up and readers grant more as they drain.
//!
//! ## Example
//!
//! ```
//! use muxwire::{Client, Config, Server};
//! use tokio::io::{AsyncReadExt, AsyncWriteExt};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (a, b) = tokio::io::duplex(64 * 1024);
//!
//!     let _server = Server::new(b, Config::default(), |stream| {
//!         tokio::spawn(async move {
//!             let (mut rd, mut wr) = tokio::io::split(stream);
//!             let _ = tokio::io::copy(&mut rd, &mut wr).await;
//!         });
//!     })?;
//!     let client = Client::new(a, Config::default())?;
//!
//!     let mut stream = client.open()?;
//!     stream.write_all(b"ping").await?;
//!
//!     let mut reply = [0u8; 4];
//!     stream.read_exact(&mut reply).await?;
//!     assert_eq!(&reply, b"ping");
//!
//!     client.close();
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod protocol;

mod client;
mod server;
mod session;
mod stream;
mod writer;

pub use client::Client;
pub use config::Config;
pub use error::{MuxError, Result};
pub use server::Server;
pub use session::{OnStream, Role, Session};
pub use stream::{Stream, StreamState};
