//! clamd client (`zINSTREAM` over TCP)

use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

const CHUNK: usize = 64 * 1024;
const SCAN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanVerdict {
    Clean,
    Infected(String),
    /// Scanner unreachable or protocol error; uploads go through
    Unavailable(String),
}

pub struct ClamAvScanner {
    addr: String,
}

impl ClamAvScanner {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            addr: format!("{}:{}", host, port),
        }
    }

    pub async fn scan(&self, bytes: &[u8]) -> ScanVerdict {
        match timeout(SCAN_TIMEOUT, self.instream(bytes)).await {
            Ok(Ok(reply)) => parse_reply(&reply),
            Ok(Err(e)) => {
                warn!("⚠️ ClamAV unavailable at {}: {}", self.addr, e);
                ScanVerdict::Unavailable(e.to_string())
            }
            Err(_) => {
                warn!("⚠️ ClamAV scan timed out at {}", self.addr);
                ScanVerdict::Unavailable("timeout".into())
            }
        }
    }

    async fn instream(&self, bytes: &[u8]) -> std::io::Result<String> {
        let mut stream = TcpStream::connect(&self.addr).await?;
        stream.write_all(b"zINSTREAM\0").await?;
        for chunk in bytes.chunks(CHUNK) {
            stream.write_all(&(chunk.len() as u32).to_be_bytes()).await?;
            stream.write_all(chunk).await?;
        }
        stream.write_all(&0u32.to_be_bytes()).await?;
        stream.flush().await?;

        let mut reply = Vec::new();
        stream.read_to_end(&mut reply).await?;
        let reply = String::from_utf8_lossy(&reply)
            .trim_end_matches('\0')
            .trim()
            .to_string();
        debug!(reply = %reply, "ClamAV reply");
        Ok(reply)
    }
}

/// `stream: OK` or `stream: <signature> FOUND`
fn parse_reply(reply: &str) -> ScanVerdict {
    let body = reply.strip_prefix("stream:").unwrap_or(reply).trim();
    if body == "OK" {
        ScanVerdict::Clean
    } else if let Some(sig) = body.strip_suffix("FOUND") {
        ScanVerdict::Infected(sig.trim().to_string())
    } else {
        ScanVerdict::Unavailable(body.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_parse_reply() {
        assert_eq!(parse_reply("stream: OK"), ScanVerdict::Clean);
        assert_eq!(
            parse_reply("stream: Eicar-Test-Signature FOUND"),
            ScanVerdict::Infected("Eicar-Test-Signature".into())
        );
        assert!(matches!(
            parse_reply("INSTREAM size limit exceeded. ERROR"),
            ScanVerdict::Unavailable(_)
        ));
    }

    async fn fake_clamd(reply: &'static [u8]) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut cmd = [0u8; 10];
            socket.read_exact(&mut cmd).await.unwrap();
            assert_eq!(&cmd, b"zINSTREAM\0");
            loop {
                let mut len = [0u8; 4];
                socket.read_exact(&mut len).await.unwrap();
                let len = u32::from_be_bytes(len) as usize;
                if len == 0 {
                    break;
                }
                let mut buf = vec![0u8; len];
                socket.read_exact(&mut buf).await.unwrap();
            }
            socket.write_all(reply).await.unwrap();
        });
        port
    }

    #[tokio::test]
    async fn test_scan_clean_and_infected() {
        let port = fake_clamd(b"stream: OK\0").await;
        let scanner = ClamAvScanner::new("127.0.0.1", port);
        assert_eq!(scanner.scan(b"a,b\n1,2\n").await, ScanVerdict::Clean);

        let port = fake_clamd(b"stream: Eicar-Test-Signature FOUND\0").await;
        let scanner = ClamAvScanner::new("127.0.0.1", port);
        assert!(matches!(scanner.scan(b"X5O!").await, ScanVerdict::Infected(_)));
    }

    #[tokio::test]
    async fn test_unreachable_scanner() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let scanner = ClamAvScanner::new("127.0.0.1", port);
        assert!(matches!(scanner.scan(b"x").await, ScanVerdict::Unavailable(_)));
    }
}
