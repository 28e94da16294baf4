//! Client-role session.
//!
//! A [`Client`] is a [`Session`] that opens odd stream IDs. It derefs to
//! the session, so everything a session does is available directly:
//!
//! ```no_run
//! use muxwire::{Client, Config};
//! use tokio::io::AsyncWriteExt;
//! use tokio::net::TcpStream;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let socket = TcpStream::connect("127.0.0.1:4000").await?;
//!     let client = Client::new(socket, Config::default())?;
//!
//!     let mut stream = client.open()?;
//!     stream.write_all(b"hello").await?;
//!     stream.shutdown().await?;
//!
//!     client.close();
//!     Ok(())
//! }
//! ```

use std::ops::Deref;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::config::Config;
use crate::error::Result;
use crate::session::{OnStream, Role, Session};
use crate::stream::Stream;

/// A session in the client role.
#[derive(Debug, Clone)]
pub struct Client {
    session: Session,
}

impl Client {
    /// Start a client session over `transport`.
    ///
    /// Streams the server opens are queued for [`Session::accept`].
    pub fn new<T>(transport: T, config: Config) -> Result<Self>
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        Ok(Self {
            session: Session::new(transport, Role::Client, config, None)?,
        })
    }

    /// Start a client session that hands server-opened streams to `on_stream`.
    pub fn with_handler<T, F>(transport: T, config: Config, on_stream: F) -> Result<Self>
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
        F: Fn(Stream) + Send + Sync + 'static,
    {
        let on_stream: OnStream = std::sync::Arc::new(on_stream);
        Ok(Self {
            session: Session::new(transport, Role::Client, config, Some(on_stream))?,
        })
    }

    /// The underlying session.
    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn into_session(self) -> Session {
        self.session
    }
}

impl Deref for Client {
    type Target = Session;

    fn deref(&self) -> &Session {
        &self.session
    }
}
