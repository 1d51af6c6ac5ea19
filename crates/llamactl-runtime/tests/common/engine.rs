//! Fake engine executable and health endpoint.

#![allow(dead_code)]

use std::net::TcpListener as StdListener;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Prints a few lines on both streams, then idles until signalled.
///
/// The pause keeps the stderr line ahead of the final stdout line.
const FAKE_ENGINE: &str = r#"#!/bin/sh
echo "fake engine starting $*"
echo "devices=$CUDA_VISIBLE_DEVICES"
echo "loading model" >&2
sleep 0.2
echo "model loaded"
exec sleep 300
"#;

/// Exits immediately, as an engine that rejects its arguments would.
const FAILING_ENGINE: &str = r#"#!/bin/sh
echo "error: unknown argument" >&2
exit 1
"#;

struct Scripts {
    _dir: TempDir,
    engine: PathBuf,
    failing: PathBuf,
}

// Written once, before any test spawns a child, so no forked process can
// inherit a write handle to a script (ETXTBSY).
static SCRIPTS: LazyLock<Scripts> = LazyLock::new(|| {
    let dir = TempDir::new().unwrap();
    let engine = write_script(dir.path(), "fake-llama-server", FAKE_ENGINE);
    let failing = write_script(dir.path(), "failing-llama-server", FAILING_ENGINE);
    Scripts {
        _dir: dir,
        engine,
        failing,
    }
});

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Path to the well-behaved fake engine.
pub fn fake_engine() -> PathBuf {
    SCRIPTS.engine.clone()
}

/// Path to an engine that exits with status 1 straight away.
pub fn failing_engine() -> PathBuf {
    SCRIPTS.failing.clone()
}

/// Serve `200 {"status":"ok"}` on a fresh local port until the runtime ends.
pub async fn spawn_health_stub() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let body = r#"{"status":"ok"}"#;
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    port
}

/// Reply to every request with its own raw text as `text/plain`.
///
/// Paths under `/json` get `{"echo":true}` as `application/json` instead.
pub async fn spawn_echo_stub() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let request = read_request(&mut socket).await;
                let (content_type, body) = if request.contains(" /json") {
                    ("application/json", r#"{"echo":true}"#.to_string())
                } else {
                    ("text/plain", request)
                };
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    port
}

/// Read one request: the head plus `Content-Length` bytes of body.
async fn read_request(socket: &mut TcpStream) -> String {
    let mut data = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = match socket.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        data.extend_from_slice(&buf[..n]);

        let text = String::from_utf8_lossy(&data);
        if let Some(end) = text.find("\r\n\r\n") {
            let length = text[..end]
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    if name.eq_ignore_ascii_case("content-length") {
                        value.trim().parse::<usize>().ok()
                    } else {
                        None
                    }
                })
                .unwrap_or(0);
            if data.len() >= end + 4 + length {
                break;
            }
        }
    }
    String::from_utf8_lossy(&data).into_owned()
}

/// A local port with nothing listening on it.
pub fn dead_port() -> u16 {
    let listener = StdListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}
