//! Integration test common infrastructure.
//!
//! Provides a scripted lobby server: it binds a local port, accepts the one
//! client under test and sends or expects protocol lines on demand, so tests
//! control both ends of the conversation.

use std::time::Duration;

use taslink::{ClientConfig, LobbyClient};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::time::timeout;

const IO_BUDGET: Duration = Duration::from_secs(5);

/// A fake lobby server listening on an ephemeral local port.
pub struct FakeLobby {
    listener: TcpListener,
}

/// The server side of one accepted client connection.
pub struct LobbyPeer {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl FakeLobby {
    /// Bind on 127.0.0.1 with an OS-assigned port.
    pub async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind fake lobby");
        Self { listener }
    }

    pub fn port(&self) -> u16 {
        self.listener
            .local_addr()
            .expect("Fake lobby has no local address")
            .port()
    }

    /// Accept the client under test.
    pub async fn accept(&self) -> LobbyPeer {
        let (stream, _) = timeout(IO_BUDGET, self.listener.accept())
            .await
            .expect("Accept timed out")
            .expect("Accept failed");
        let (read_half, write_half) = stream.into_split();
        LobbyPeer {
            reader: BufReader::new(read_half),
            writer: write_half,
        }
    }
}

impl LobbyPeer {
    /// Send one protocol line, newline appended.
    pub async fn send_line(&mut self, line: &str) {
        self.writer
            .write_all(line.as_bytes())
            .await
            .expect("Failed to write line");
        self.writer
            .write_all(b"\n")
            .await
            .expect("Failed to write newline");
        self.writer.flush().await.expect("Failed to flush");
    }

    /// Send raw bytes with no framing, for tests that split lines across
    /// arbitrary write boundaries.
    #[allow(dead_code)]
    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.writer
            .write_all(bytes)
            .await
            .expect("Failed to write raw bytes");
        self.writer.flush().await.expect("Failed to flush");
    }

    /// Read the next line the client sent.
    pub async fn expect_line(&mut self) -> String {
        let mut line = String::new();
        let n = timeout(IO_BUDGET, self.reader.read_line(&mut line))
            .await
            .expect("Read timed out")
            .expect("Read failed");
        assert!(n > 0, "Client closed the connection");
        line.trim_end_matches('\n').to_string()
    }

    /// Close the connection from the server side.
    pub async fn close(mut self) {
        let _ = self.writer.shutdown().await;
    }
}

/// Default test configuration pointed at the given local port. The receive
/// timeout is short so idle cycles do not slow the suite down.
pub fn test_config(port: u16) -> ClientConfig {
    ClientConfig {
        host: "127.0.0.1".to_string(),
        port,
        recv_timeout_ms: 200,
        ..ClientConfig::default()
    }
}

/// A connected client plus the server side of its connection.
#[allow(dead_code)]
pub async fn connected_pair() -> (LobbyClient, LobbyPeer) {
    let lobby = FakeLobby::bind().await;
    let mut client = LobbyClient::new(test_config(lobby.port()));
    client.connect().await.expect("Failed to connect");
    let peer = lobby.accept().await;
    (client, peer)
}
