//! Per-address listeners.
//!
//! A background task accepts TCP connections and, when TLS is configured,
//! runs each handshake in its own task so a slow client never holds up the
//! accept loop. Finished streams are handed to axum through
//! [`RelayListener`], which implements [`axum::serve::Listener`].

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::extract::connect_info::Connected;
use axum::serve::{IncomingStream, Listener};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_rustls::server::TlsStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::tls::TlsAcceptor;

/// Streams waiting for axum to pick them up.
const ACCEPT_BACKLOG: usize = 64;

/// Pause after an accept error that is not tied to a single connection
/// (e.g. out of file descriptors).
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// An accepted connection, plain or TLS.
pub enum RelayStream {
    /// Unencrypted TCP.
    Plain(TcpStream),
    /// TLS over TCP.
    Tls(Box<TlsStream<TcpStream>>),
}

impl RelayStream {
    /// Whether the stream is encrypted.
    pub fn is_tls(&self) -> bool {
        matches!(self, Self::Tls(_))
    }
}

impl AsyncRead for RelayStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for RelayStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_write_vectored(cx, bufs),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_write_vectored(cx, bufs),
        }
    }

    fn is_write_vectored(&self) -> bool {
        match self {
            Self::Plain(s) => s.is_write_vectored(),
            Self::Tls(s) => s.is_write_vectored(),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_flush(cx),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Receiving end of an accept loop.
pub struct RelayListener {
    incoming: mpsc::Receiver<(RelayStream, SocketAddr)>,
    local_addr: SocketAddr,
}

impl Listener for RelayListener {
    type Io = RelayStream;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        match self.incoming.recv().await {
            Some(conn) => conn,
            // The accept loop is gone; stay idle until axum shuts down.
            None => std::future::pending().await,
        }
    }

    fn local_addr(&self) -> io::Result<Self::Addr> {
        Ok(self.local_addr)
    }
}

/// Peer address exposed to handlers through `ConnectInfo`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PeerAddr(pub SocketAddr);

impl Connected<IncomingStream<'_, RelayListener>> for PeerAddr {
    fn connect_info(stream: IncomingStream<'_, RelayListener>) -> Self {
        Self(*stream.remote_addr())
    }
}

/// Bind `addr` and start its accept loop. The loop stops and releases the
/// socket when `cancel` fires.
pub async fn bind(
    addr: SocketAddr,
    tls: Option<TlsAcceptor>,
    handshake_timeout: Duration,
    cancel: CancellationToken,
) -> io::Result<(RelayListener, JoinHandle<()>)> {
    let tcp = TcpListener::bind(addr).await?;
    let local_addr = tcp.local_addr()?;
    let (tx, rx) = mpsc::channel(ACCEPT_BACKLOG);
    let task = tokio::spawn(accept_loop(tcp, tls, handshake_timeout, tx, cancel));
    Ok((
        RelayListener {
            incoming: rx,
            local_addr,
        },
        task,
    ))
}

async fn accept_loop(
    tcp: TcpListener,
    tls: Option<TlsAcceptor>,
    handshake_timeout: Duration,
    tx: mpsc::Sender<(RelayStream, SocketAddr)>,
    cancel: CancellationToken,
) {
    loop {
        let (stream, peer) = tokio::select! {
            () = cancel.cancelled() => break,
            accepted = tcp.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) if is_connection_error(&e) => continue,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    continue;
                }
            },
        };
        let _ = stream.set_nodelay(true);

        let Some(acceptor) = tls.clone() else {
            if tx.send((RelayStream::Plain(stream), peer)).await.is_err() {
                break;
            }
            continue;
        };
        let tx = tx.clone();
        drop(tokio::spawn(async move {
            match time::timeout(handshake_timeout, acceptor.accept(stream)).await {
                Ok(Ok(tls_stream)) => {
                    let _ = tx.send((RelayStream::Tls(Box::new(tls_stream)), peer)).await;
                }
                Ok(Err(e)) => debug!(%peer, error = %e, "dropping connection"),
                Err(_) => debug!(%peer, "TLS handshake timed out"),
            }
        }));
    }
    debug!(addr = ?tcp.local_addr().ok(), "accept loop stopped");
}

fn is_connection_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[tokio::test]
    async fn plain_connections_are_forwarded() {
        let cancel = CancellationToken::new();
        let (mut listener, task) = bind(loopback(), None, Duration::from_secs(1), cancel.clone())
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        assert_ne!(addr.port(), 0);

        let mut client = TcpStream::connect(addr).await.unwrap();
        let (mut stream, peer) = listener.accept().await;
        assert!(!stream.is_tls());
        assert_eq!(peer, client.local_addr().unwrap());

        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        let _ = stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn cancel_releases_the_port() {
        let cancel = CancellationToken::new();
        let (listener, task) = bind(loopback(), None, Duration::from_secs(1), cancel.clone())
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();

        cancel.cancel();
        task.await.unwrap();
        drop(listener);

        let (_again, task) = bind(addr, None, Duration::from_secs(1), CancellationToken::new())
            .await
            .unwrap();
        task.abort();
    }
}
