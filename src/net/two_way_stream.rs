use async_trait::async_trait;
use bytes::{Buf, BufMut, BytesMut};
#[cfg(test)] use mockall::automock;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, UdpSocket};
use tracing::trace;

/// One connection's bidirectional byte stream, introduced to keep the negotiation engine
///  independent of the concrete transport and to allow mocking the I/O away in tests.
/// Carriers may swap the stream mid-handshake (e.g. shifting from the negotiation socket
///  to a datagram pair).
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TwoWayStream: Send + 'static {
    /// Fill `buf` completely, or fail. A peer close mid-read is a failure.
    async fn read_exact(&mut self, buf: &mut [u8]) -> anyhow::Result<()>;

    /// Read one `\n`-terminated line, returned without the terminator (and without a
    ///  preceding `\r` if present).
    async fn read_line(&mut self) -> anyhow::Result<String>;

    async fn write_all(&mut self, buf: &[u8]) -> anyhow::Result<()>;

    /// Push buffered writes to the wire. Datagram streams send one datagram per flush.
    async fn flush(&mut self) -> anyhow::Result<()>;

    async fn close(&mut self) -> anyhow::Result<()>;
}

pub struct TcpTwoWay {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl TcpTwoWay {
    pub fn new(stream: TcpStream) -> TcpTwoWay {
        let (read_half, write_half) = stream.into_split();
        TcpTwoWay {
            reader: BufReader::new(read_half),
            writer: write_half,
        }
    }
}

#[async_trait]
impl TwoWayStream for TcpTwoWay {
    async fn read_exact(&mut self, buf: &mut [u8]) -> anyhow::Result<()> {
        tokio::io::AsyncReadExt::read_exact(&mut self.reader, buf).await?;
        Ok(())
    }

    async fn read_line(&mut self) -> anyhow::Result<String> {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).await?;
        if n == 0 {
            anyhow::bail!("connection closed");
        }
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Ok(line)
    }

    async fn write_all(&mut self, buf: &[u8]) -> anyhow::Result<()> {
        self.writer.write_all(buf).await?;
        Ok(())
    }

    async fn flush(&mut self) -> anyhow::Result<()> {
        self.writer.flush().await?;
        Ok(())
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        self.writer.shutdown().await.ok();
        Ok(())
    }
}

const MAX_DATAGRAM: usize = 65536;

/// A datagram socket presented as a two-way stream. Writes are buffered and go out as a
///  single datagram per flush; reads accumulate incoming datagrams so framed content can
///  be consumed piecewise.
pub struct DgramTwoWay {
    socket: Arc<UdpSocket>,
    /// send target; `None` for receive-only ends (a multicast listener)
    peer: Option<SocketAddr>,
    pending_in: BytesMut,
    pending_out: BytesMut,
}

impl DgramTwoWay {
    pub fn new(socket: Arc<UdpSocket>, peer: Option<SocketAddr>) -> DgramTwoWay {
        DgramTwoWay {
            socket,
            peer,
            pending_in: BytesMut::new(),
            pending_out: BytesMut::new(),
        }
    }

    async fn fill(&mut self) -> anyhow::Result<()> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (n, from) = self.socket.recv_from(&mut buf).await?;
        trace!("datagram of {} bytes from {:?}", n, from);
        self.pending_in.put_slice(&buf[..n]);
        Ok(())
    }
}

#[async_trait]
impl TwoWayStream for DgramTwoWay {
    async fn read_exact(&mut self, buf: &mut [u8]) -> anyhow::Result<()> {
        while self.pending_in.len() < buf.len() {
            self.fill().await?;
        }
        self.pending_in.copy_to_slice(buf);
        Ok(())
    }

    async fn read_line(&mut self) -> anyhow::Result<String> {
        loop {
            if let Some(pos) = self.pending_in.iter().position(|&b| b == b'\n') {
                let mut line = self.pending_in.split_to(pos + 1);
                line.truncate(pos);
                let mut s = String::from_utf8_lossy(&line).into_owned();
                while s.ends_with('\r') {
                    s.pop();
                }
                return Ok(s);
            }
            self.fill().await?;
        }
    }

    async fn write_all(&mut self, buf: &[u8]) -> anyhow::Result<()> {
        self.pending_out.put_slice(buf);
        Ok(())
    }

    async fn flush(&mut self) -> anyhow::Result<()> {
        if self.pending_out.is_empty() {
            return Ok(());
        }
        let datagram = self.pending_out.split();
        match self.peer {
            Some(peer) => {
                self.socket.send_to(&datagram, peer).await?;
            }
            None => anyhow::bail!("datagram stream has no send target"),
        }
        Ok(())
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tcp_roundtrip() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = tokio::spawn(async move {
            let stream = TcpStream::connect(addr).await.unwrap();
            let mut s = TcpTwoWay::new(stream);
            s.write_all(b"abc\r\n").await.unwrap();
            s.write_all(&[1, 2, 3, 4]).await.unwrap();
            s.flush().await.unwrap();
        });

        let (stream, _) = listener.accept().await.unwrap();
        let mut s = TcpTwoWay::new(stream);
        assert_eq!(s.read_line().await.unwrap(), "abc");
        let mut buf = [0u8; 4];
        s.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);
        client.await.unwrap();
    }

    #[tokio::test]
    async fn test_dgram_one_datagram_per_flush() {
        let a = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let b = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let b_addr = b.local_addr().unwrap();

        let mut sender = DgramTwoWay::new(a, Some(b_addr));
        sender.write_all(&[9, 9]).await.unwrap();
        sender.write_all(&[7]).await.unwrap();
        sender.flush().await.unwrap();

        let mut receiver = DgramTwoWay::new(b, None);
        let mut buf = [0u8; 3];
        receiver.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [9, 9, 7]);
    }
}
