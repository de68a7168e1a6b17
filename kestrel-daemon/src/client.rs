/*!
 * KESTREL Daemon Client
 * JSON IPC communication with kestreld
 */

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use crate::protocol::{Request, Response};

pub struct KestrelClient {
    socket_path: String,
}

impl KestrelClient {
    pub fn new(socket_path: String) -> Self {
        Self { socket_path }
    }

    pub async fn send_request(&self, request: Request) -> Result<Response> {
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .with_context(|| format!("is kestreld running? cannot reach {}", self.socket_path))?;
        let (read_half, mut write_half) = stream.into_split();

        let mut request_json = serde_json::to_vec(&request)?;
        request_json.push(b'\n');
        write_half.write_all(&request_json).await?;

        let mut reader = BufReader::new(read_half);
        let mut line = String::new();
        reader.read_line(&mut line).await?;
        if line.trim().is_empty() {
            anyhow::bail!("daemon closed the connection without a response");
        }

        let response: Response = serde_json::from_str(line.trim())?;
        Ok(response)
    }
}
