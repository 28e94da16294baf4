//! Server-role session.

use std::ops::Deref;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::config::Config;
use crate::error::Result;
use crate::session::{OnStream, Role, Session};
use crate::stream::Stream;

/// A session in the server role: opens even stream IDs and hands every
/// admitted client stream to its callback.
///
/// ```no_run
/// use muxwire::{Config, Server};
/// use tokio::net::TcpListener;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let listener = TcpListener::bind("127.0.0.1:4000").await?;
///     let (socket, _) = listener.accept().await?;
///
///     let server = Server::new(socket, Config::default(), |stream| {
///         tokio::spawn(async move {
///             let (mut rd, mut wr) = tokio::io::split(stream);
///             let _ = tokio::io::copy(&mut rd, &mut wr).await;
///         });
///     })?;
///
///     server.wait_for_shutdown().await?;
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct Server {
    session: Session,
}

impl Server {
    /// Start a server session over `transport`.
    pub fn new<T, F>(transport: T, config: Config, on_stream: F) -> Result<Self>
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
        F: Fn(Stream) + Send + Sync + 'static,
    {
        let on_stream: OnStream = Arc::new(on_stream);
        Ok(Self {
            session: Session::new(transport, Role::Server, config, Some(on_stream))?,
        })
    }

    /// Start a server session whose inbound streams queue for
    /// [`Session::accept`].
    pub fn accepting<T>(transport: T, config: Config) -> Result<Self>
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        Ok(Self {
            session: Session::new(transport, Role::Server, config, None)?,
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

impl Deref for Server {
    type Target = Session;

    fn deref(&self) -> &Session {
        &self.session
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_server_opens_even_ids() {
        let (local, _remote) = duplex(1024);
        let server = Server::new(local, Config::default(), |_stream| {}).unwrap();

        assert_eq!(server.role(), Role::Server);
        assert_eq!(server.open().unwrap().id(), 2);
        assert_eq!(server.open().unwrap().id(), 4);

        server.close();
    }
}
