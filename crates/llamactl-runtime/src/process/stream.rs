//! Async stream line readers (non-UTF8-safe).
//!
//! llama-server (and other C/C++ tooling) can emit non-UTF8 bytes on
//! stdout/stderr. `BufReader::lines()` would end the reader on invalid
//! UTF-8, so lines are read as bytes and decoded lossily.

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Forward every line of `stream` into `tx` until EOF or read error.
pub fn spawn_stream_reader(
    stream: impl AsyncRead + Unpin + Send + 'static,
    port: u16,
    stream_type: &'static str,
    tx: mpsc::UnboundedSender<String>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut buf: Vec<u8> = Vec::with_capacity(1024);

        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break, // EOF
                Ok(_) => {
                    // Trim trailing newline(s)
                    if buf.last() == Some(&b'\n') {
                        buf.pop();
                        if buf.last() == Some(&b'\r') {
                            buf.pop();
                        }
                    }

                    let line = String::from_utf8_lossy(&buf).into_owned();
                    debug!(port = %port, %stream_type, "{}", line);
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    debug!(port = %port, %stream_type, error = %e, "log stream reader exiting due to read error");
                    break;
                }
            }
        }
    })
}
