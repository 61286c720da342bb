use serde::{Deserialize, Serialize};
use std::io;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

/// Longest line a peer may send before the connection is dropped
const MAX_MESSAGE_LEN: usize = 1 << 20;

/// Messages exchanged between two shells, one JSON object per line
///
/// Keys and ids travel as lowercase hex; the funding transaction as its
/// consensus serialization in hex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireMessage {
    Init {
        node_id: String,
        network: String,
    },
    OpenChannel {
        temporary_channel_id: String,
        funding_satoshis: u64,
        push_msat: u64,
        funding_pubkey: String,
    },
    AcceptChannel {
        temporary_channel_id: String,
        funding_pubkey: String,
    },
    FundingCreated {
        temporary_channel_id: String,
        funding_txid: String,
        funding_output_index: u32,
        funding_tx: String,
    },
    FundingSigned {
        temporary_channel_id: String,
        channel_id: String,
    },
    Error {
        temporary_channel_id: Option<String>,
        message: String,
    },
}

impl WireMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            WireMessage::Init { .. } => "init",
            WireMessage::OpenChannel { .. } => "open_channel",
            WireMessage::AcceptChannel { .. } => "accept_channel",
            WireMessage::FundingCreated { .. } => "funding_created",
            WireMessage::FundingSigned { .. } => "funding_signed",
            WireMessage::Error { .. } => "error",
        }
    }

    pub fn error(temporary_channel_id: Option<String>, message: impl Into<String>) -> Self {
        WireMessage::Error {
            temporary_channel_id,
            message: message.into(),
        }
    }
}

/// One framed TCP connection to a peer
pub struct PeerConnection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl PeerConnection {
    pub fn new(stream: TcpStream) -> Self {
        let (read, write) = stream.into_split();
        PeerConnection {
            reader: BufReader::new(read),
            writer: write,
        }
    }

    pub async fn send(&mut self, message: &WireMessage) -> io::Result<()> {
        let mut line = serde_json::to_vec(message)?;
        line.push(b'\n');
        self.writer.write_all(&line).await?;
        self.writer.flush().await
    }

    /// Next message, or `None` once the peer has closed the connection
    ///
    /// At most `MAX_MESSAGE_LEN` bytes are buffered; a longer line is an error
    /// even if its newline never arrives.
    pub async fn recv(&mut self) -> io::Result<Option<WireMessage>> {
        let mut line = Vec::new();
        loop {
            line.clear();
            let read = (&mut self.reader)
                .take(MAX_MESSAGE_LEN as u64 + 1)
                .read_until(b'\n', &mut line)
                .await?;
            if read == 0 {
                return Ok(None);
            }
            if line.len() > MAX_MESSAGE_LEN {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("message exceeds {MAX_MESSAGE_LEN} bytes"),
                ));
            }
            if !line.iter().all(u8::is_ascii_whitespace) {
                break;
            }
        }
        let message = serde_json::from_slice(&line)?;
        Ok(Some(message))
    }

    /// Send a request and wait for the reply, bounded by `timeout`
    pub async fn exchange(
        &mut self,
        message: &WireMessage,
        timeout: Duration,
    ) -> io::Result<WireMessage> {
        let round_trip = async {
            self.send(message).await?;
            self.recv().await
        };
        match tokio::time::timeout(timeout, round_trip).await {
            Ok(Ok(Some(reply))) => Ok(reply),
            Ok(Ok(None)) => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed by peer",
            )),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("no reply within {}ms", timeout.as_millis()),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_message_json_shape() {
        let message = WireMessage::AcceptChannel {
            temporary_channel_id: "00".repeat(32),
            funding_pubkey: "02".to_string(),
        };
        let json = serde_json::to_string(&message).unwrap();
        assert!(json.starts_with(r#"{"type":"accept_channel""#));
        assert_eq!(message.kind(), "accept_channel");
    }

    #[tokio::test]
    async fn test_exchange_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut conn = PeerConnection::new(stream);
            while let Ok(Some(msg)) = conn.recv().await {
                let reply = WireMessage::error(None, format!("got {}", msg.kind()));
                conn.send(&reply).await.unwrap();
            }
        });

        let mut conn = PeerConnection::new(TcpStream::connect(addr).await.unwrap());
        let init = WireMessage::Init {
            node_id: "02ab".to_string(),
            network: "regtest".to_string(),
        };
        let reply = conn
            .exchange(&init, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(reply, WireMessage::error(None, "got init"));
    }

    #[tokio::test]
    async fn test_exchange_times_out_on_silent_peer() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let mut conn = PeerConnection::new(TcpStream::connect(addr).await.unwrap());
        let err = conn
            .exchange(&WireMessage::error(None, "ping"), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[tokio::test]
    async fn test_unterminated_oversized_line_is_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            // no newline ever follows
            let chunk = vec![b'a'; 64 * 1024];
            for _ in 0..64 {
                if stream.write_all(&chunk).await.is_err() {
                    break;
                }
            }
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let mut conn = PeerConnection::new(TcpStream::connect(addr).await.unwrap());
        let err = tokio::time::timeout(Duration::from_secs(2), conn.recv())
            .await
            .expect("recv should fail once the limit is crossed")
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_blank_lines_are_skipped() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream
                .write_all(b"\n  \n{\"type\":\"error\",\"temporary_channel_id\":null,\"message\":\"hi\"}\n")
                .await
                .unwrap();
        });

        let mut conn = PeerConnection::new(TcpStream::connect(addr).await.unwrap());
        assert_eq!(conn.recv().await.unwrap(), Some(WireMessage::error(None, "hi")));
        assert_eq!(conn.recv().await.unwrap(), None);
    }
}
