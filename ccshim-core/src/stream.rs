//! Peer stream abstraction over plain TCP, TLS and in-process pipes.

use pin_project_lite::pin_project;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream as ClientTlsStream;

pin_project! {
    /// The duplex stream carrying chaincode messages to the peer.
    ///
    /// `Memory` wraps an in-process pipe for tests and embedded use.
    #[project = PeerStreamProj]
    pub enum PeerStream {
        Plain { #[pin] stream: TcpStream },
        Tls { #[pin] stream: ClientTlsStream<TcpStream> },
        Memory { #[pin] stream: DuplexStream },
    }
}

impl PeerStream {
    /// Returns whether this stream is TLS-encrypted.
    pub fn is_tls(&self) -> bool {
        matches!(self, PeerStream::Tls { .. })
    }
}

impl AsyncRead for PeerStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.project() {
            PeerStreamProj::Plain { stream } => stream.poll_read(cx, buf),
            PeerStreamProj::Tls { stream } => stream.poll_read(cx, buf),
            PeerStreamProj::Memory { stream } => stream.poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for PeerStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.project() {
            PeerStreamProj::Plain { stream } => stream.poll_write(cx, buf),
            PeerStreamProj::Tls { stream } => stream.poll_write(cx, buf),
            PeerStreamProj::Memory { stream } => stream.poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            PeerStreamProj::Plain { stream } => stream.poll_flush(cx),
            PeerStreamProj::Tls { stream } => stream.poll_flush(cx),
            PeerStreamProj::Memory { stream } => stream.poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            PeerStreamProj::Plain { stream } => stream.poll_shutdown(cx),
            PeerStreamProj::Tls { stream } => stream.poll_shutdown(cx),
            PeerStreamProj::Memory { stream } => stream.poll_shutdown(cx),
        }
    }
}
