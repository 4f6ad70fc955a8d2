//! TCP listener setup.
//!
//! # Example
//!
//! ```no_run
//! # async fn run() -> craftwire::Result<()> {
//! use craftwire::transport::bind;
//!
//! let listener = bind("0.0.0.0:25565".parse().unwrap(), 128)?;
//! let (stream, peer) = listener.accept().await?;
//! # Ok(())
//! # }
//! ```

use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpSocket, TcpStream};

use crate::error::Result;

/// Bind a listener with an explicit accept backlog.
///
/// Must be called from inside a tokio runtime.
pub fn bind(addr: SocketAddr, backlog: u32) -> Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    #[cfg(unix)]
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    let listener = socket.listen(backlog)?;
    tracing::debug!(addr = %listener.local_addr()?, backlog, "listening");
    Ok(listener)
}

/// Per-connection socket options: `TCP_NODELAY` on.
pub fn configure_stream(stream: &TcpStream) -> Result<()> {
    stream.set_nodelay(true)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_bind_and_accept() {
        let listener = bind("127.0.0.1:0".parse().unwrap(), 16).unwrap();
        let addr = listener.local_addr().unwrap();

        let client = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream.write_all(b"ping").await.unwrap();
        });

        let (mut stream, _peer) = listener.accept().await.unwrap();
        configure_stream(&stream).unwrap();
        assert!(stream.nodelay().unwrap());

        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
        client.await.unwrap();
    }
}
