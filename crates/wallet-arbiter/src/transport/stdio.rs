//! stdio transport: newline-delimited JSON, as used by native messaging hosts

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Stdin, Stdout};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::Transport;
use crate::error::TransportError;
use crate::protocol::Message;

/// Line-oriented JSON transport
pub struct StdioTransport<R = Stdin, W = Stdout> {
    reader: Mutex<BufReader<R>>,
    writer: Mutex<W>,
}

impl StdioTransport<Stdin, Stdout> {
    /// Transport over the process's stdin and stdout
    pub fn stdio() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout())
    }
}

impl<R, W> StdioTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: Mutex::new(BufReader::new(reader)),
            writer: Mutex::new(writer),
        }
    }
}

#[async_trait]
impl<R, W> Transport for StdioTransport<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn send(&self, message: Message) -> Result<(), TransportError> {
        let line = serde_json::to_string(&message)?;
        debug!("Sending: {}", line);

        let mut writer = self.writer.lock().await;
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok(())
    }

    async fn recv(&self) -> Result<Option<Value>, TransportError> {
        let mut reader = self.reader.lock().await;
        let mut line = String::new();

        loop {
            line.clear();

            let bytes_read = reader.read_line(&mut line).await?;
            if bytes_read == 0 {
                info!("EOF received, closing stdio transport");
                return Ok(None);
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            debug!("Received: {}", trimmed);

            match serde_json::from_str(trimmed) {
                Ok(value) => return Ok(Some(value)),
                // Without an event id there is nobody to answer
                Err(e) => warn!("Dropping unparseable message: {}", e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{MessageType, WireError};
    use serde_json::json;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_reads_lines_and_skips_garbage() {
        let input = b"\n{not json}\n{\"eventId\":\"e1\"}\n".to_vec();
        let transport = StdioTransport::new(std::io::Cursor::new(input), tokio::io::sink());

        assert_eq!(transport.recv().await.unwrap(), Some(json!({ "eventId": "e1" })));
        assert_eq!(transport.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_writes_one_line_per_message() {
        let (writer, mut output) = tokio::io::duplex(4096);
        let transport = StdioTransport::new(tokio::io::empty(), writer);

        transport
            .send(Message::error_response(
                "e1",
                Some(2),
                MessageType::SignTxns,
                WireError::canceled("timed out"),
            ))
            .await
            .unwrap();
        drop(transport);

        let mut written = String::new();
        output.read_to_string(&mut written).await.unwrap();

        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(lines.len(), 1);
        let message: Message = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(message.kind, MessageType::SignTxnsResponse);
        assert!(message.payload.is_none());
    }
}
