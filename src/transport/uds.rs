//! Unix-domain-socket binding of the [`Transport`] capability surface.
//!
//! Framing follows the teacher benchmark suite's
//! `ipc::unix_domain_socket` pattern: a 4-byte little-endian length prefix
//! followed by a [`bincode`]-encoded [`WireFrame`](super::frame::WireFrame).

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tracing::debug;

use super::frame::WireFrame;
use super::{Transport, TransportConnection, TransportListener, TransportReader, TransportWriter};
use crate::trust::{peer_credentials, PeerCredentials};
use crate::wire::Value;

const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

async fn read_message(stream: &mut OwnedReadHalf) -> std::io::Result<Option<Value>> {
    let mut len_bytes = [0u8; 4];
    match stream.read_exact(&mut len_bytes).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("message too large: {len} bytes"),
        ));
    }
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await?;
    let frame: WireFrame =
        bincode::deserialize(&buf).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    let value =
        Value::try_from(frame).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    Ok(Some(value))
}

async fn write_message(stream: &mut OwnedWriteHalf, value: &Value) -> std::io::Result<()> {
    let frame = WireFrame::try_from(value)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    let bytes =
        bincode::serialize(&frame).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    let len = bytes.len() as u32;
    stream.write_all(&len.to_le_bytes()).await?;
    stream.write_all(&bytes).await?;
    stream.flush().await?;
    Ok(())
}

/// Factory for the Unix-domain-socket binding.
pub struct UdsTransport;

#[async_trait]
impl Transport for UdsTransport {
    async fn bind_named(&self, path: &Path) -> std::io::Result<Box<dyn TransportListener>> {
        let _ = std::fs::remove_file(path);
        let listener = UnixListener::bind(path)?;
        debug!(path = %path.display(), "bound named listener");
        Ok(Box::new(UdsListener {
            listener,
            socket_path: path.to_path_buf(),
        }))
    }

    async fn bind_anonymous(&self) -> std::io::Result<Box<dyn TransportListener>> {
        // No named-service registry entry for this path; it is reachable
        // only by materializing a minted endpoint, the closest POSIX analog
        // of an anonymous listener available without SCM_RIGHTS fd-passing.
        let path = std::env::temp_dir().join(format!("xpc-rpc-{}.sock", uuid::Uuid::new_v4()));
        let listener = UnixListener::bind(&path)?;
        debug!(path = %path.display(), "bound anonymous listener");
        Ok(Box::new(UdsListener {
            listener,
            socket_path: path,
        }))
    }

    async fn connect(&self, path: &Path) -> std::io::Result<Box<dyn TransportConnection>> {
        let stream = UnixStream::connect(path).await?;
        debug!(path = %path.display(), "connected");
        Ok(Box::new(UdsConnection { stream }))
    }
}

pub struct UdsListener {
    listener: UnixListener,
    socket_path: PathBuf,
}

#[async_trait]
impl TransportListener for UdsListener {
    async fn accept(&mut self) -> std::io::Result<Box<dyn TransportConnection>> {
        let (stream, _addr) = self.listener.accept().await?;
        debug!(path = %self.socket_path.display(), "accepted connection");
        Ok(Box::new(UdsConnection { stream }))
    }

    fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

impl Drop for UdsListener {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.socket_path);
    }
}

pub struct UdsConnection {
    stream: UnixStream,
}

impl TransportConnection for UdsConnection {
    fn peer_credentials(&self) -> std::io::Result<PeerCredentials> {
        peer_credentials(&self.stream)
    }

    fn split(self: Box<Self>) -> (Box<dyn TransportReader>, Box<dyn TransportWriter>) {
        let (read_half, write_half) = self.stream.into_split();
        (
            Box::new(UdsReader { half: read_half }),
            Box::new(UdsWriter { half: write_half }),
        )
    }
}

pub struct UdsReader {
    half: OwnedReadHalf,
}

#[async_trait]
impl TransportReader for UdsReader {
    async fn receive(&mut self) -> std::io::Result<Option<Value>> {
        read_message(&mut self.half).await
    }
}

pub struct UdsWriter {
    half: OwnedWriteHalf,
}

#[async_trait]
impl TransportWriter for UdsWriter {
    async fn send(&mut self, value: &Value) -> std::io::Result<()> {
        write_message(&mut self.half, value).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::Value;

    #[tokio::test]
    async fn round_trips_a_value_over_a_real_socket() {
        let transport = UdsTransport;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("xpc-rpc-test.sock");
        let mut listener = transport.bind_named(&path).await.unwrap();

        let server = tokio::spawn(async move {
            let conn = listener.accept().await.unwrap();
            let (mut reader, mut writer) = conn.split();
            let received = reader.receive().await.unwrap().unwrap();
            assert_eq!(received, Value::Str("hello".to_string()));
            writer.send(&Value::Str("hello".to_string())).await.unwrap();
        });

        let client = transport.connect(&path).await.unwrap();
        let (mut reader, mut writer) = client.split();
        writer.send(&Value::Str("hello".to_string())).await.unwrap();
        let reply = reader.receive().await.unwrap().unwrap();
        assert_eq!(reply, Value::Str("hello".to_string()));

        server.await.unwrap();
    }
}
