//! Canned HTTP/1.1 endpoints shared by the probe and pipeline tests.

use std::net::SocketAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

pub const TAGS_BODY: &str = r#"{"models":[{"name":"llama3:latest","model":"llama3:latest","modified_at":"2024-05-01T10:00:00Z","size":4661224676,"digest":"sha256:abc123","details":{"parent_model":"","format":"gguf","family":"llama","families":["llama"],"parameter_size":"8B","quantization_level":"Q4_0"}}]}"#;
pub const VERSION_BODY: &str = r#"{"version":"0.1.32"}"#;

/// Serves canned JSON per fingerprint path on a local listener; `None` for
/// a body makes that path answer 500. Keeps accepting until dropped so
/// connection reuse or reconnects both work.
pub async fn mock_endpoint(
    tags_body: Option<&'static str>,
    version_body: Option<&'static str>,
) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let mut buf = vec![0u8; 4096];
                let mut pending: Vec<u8> = Vec::new();
                loop {
                    // GETs have no body, so a blank line ends the request.
                    while !pending.windows(4).any(|w| w == b"\r\n\r\n") {
                        let Ok(n) = socket.read(&mut buf).await else {
                            return;
                        };
                        if n == 0 {
                            return;
                        }
                        pending.extend_from_slice(&buf[..n]);
                    }
                    let request = String::from_utf8_lossy(&pending).into_owned();
                    pending.clear();

                    let body = if request.starts_with("GET /api/tags") {
                        tags_body
                    } else if request.starts_with("GET /api/version") {
                        version_body
                    } else {
                        let _ = socket
                            .write_all(b"HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\n\r\n")
                            .await;
                        continue;
                    };

                    let response = match body {
                        Some(body) => format!(
                            "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\n\r\n{body}",
                            body.len()
                        ),
                        None => {
                            "HTTP/1.1 500 Internal Server Error\r\ncontent-length: 0\r\n\r\n"
                                .to_owned()
                        }
                    };
                    if socket.write_all(response.as_bytes()).await.is_err() {
                        return;
                    }
                }
            });
        }
    });

    addr
}
