//! Shared fixtures: a scripted upstream on a raw socket and a proxy bound to
//! an ephemeral port.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;

use keyrelay::config::Config;
use keyrelay::proxy::ProxyHandler;
use keyrelay::server::Listener;

/// A request as the upstream saw it.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub target: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// What the upstream answers with.
#[derive(Clone)]
pub enum Reply {
    /// A Content-Length framed response.
    Full {
        status: u16,
        headers: Vec<(String, String)>,
        body: Vec<u8>,
    },
    /// A chunked response. When `gate` is set, only the first chunk is sent
    /// until the gate is notified.
    Chunked {
        status: u16,
        headers: Vec<(String, String)>,
        chunks: Vec<Vec<u8>>,
        gate: Option<Arc<Notify>>,
    },
    /// Read the request, then never answer.
    Hang,
}

impl Reply {
    pub fn json(status: u16, body: &str) -> Self {
        Reply::Full {
            status,
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            body: body.as_bytes().to_vec(),
        }
    }
}

pub struct MockUpstream {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockUpstream {
    /// Start an upstream answering every request with `reply`.
    pub async fn start(reply: Reply) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));

        let recorded = Arc::clone(&requests);
        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    return;
                };
                let reply = reply.clone();
                let recorded = Arc::clone(&recorded);
                tokio::spawn(async move {
                    let _ = serve(socket, reply, recorded).await;
                });
            }
        });

        Self { addr, requests }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

async fn serve(
    mut socket: TcpStream,
    reply: Reply,
    recorded: Arc<Mutex<Vec<RecordedRequest>>>,
) -> std::io::Result<()> {
    let Some(request) = read_request(&mut socket).await? else {
        return Ok(());
    };
    recorded.lock().unwrap().push(request);

    match reply {
        Reply::Full { status, headers, body } => {
            let mut head = status_line(status);
            for (k, v) in &headers {
                head.push_str(&format!("{k}: {v}\r\n"));
            }
            head.push_str(&format!("Content-Length: {}\r\nConnection: close\r\n\r\n", body.len()));
            socket.write_all(head.as_bytes()).await?;
            socket.write_all(&body).await?;
        }
        Reply::Chunked {
            status,
            headers,
            chunks,
            gate,
        } => {
            let mut head = status_line(status);
            for (k, v) in &headers {
                head.push_str(&format!("{k}: {v}\r\n"));
            }
            head.push_str("Transfer-Encoding: chunked\r\nConnection: close\r\n\r\n");
            socket.write_all(head.as_bytes()).await?;

            for (i, chunk) in chunks.iter().enumerate() {
                if i == 1 {
                    if let Some(gate) = &gate {
                        gate.notified().await;
                    }
                }
                socket.write_all(format!("{:X}\r\n", chunk.len()).as_bytes()).await?;
                socket.write_all(chunk).await?;
                socket.write_all(b"\r\n").await?;
                socket.flush().await?;
            }
            socket.write_all(b"0\r\n\r\n").await?;
        }
        Reply::Hang => {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
    }

    socket.flush().await?;
    Ok(())
}

fn status_line(status: u16) -> String {
    format!("HTTP/1.1 {status} Mock\r\n")
}

async fn read_request(socket: &mut TcpStream) -> std::io::Result<Option<RecordedRequest>> {
    let mut buf = Vec::new();
    let mut temp = [0u8; 4096];

    let head_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        let n = socket.read(&mut temp).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.extend_from_slice(&temp[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next().unwrap_or_default().split_whitespace();
    let method = request_line.next().unwrap_or_default().to_string();
    let target = request_line.next().unwrap_or_default().to_string();

    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect();

    let content_length = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.parse::<usize>().ok())
        .unwrap_or(0);

    let mut body = buf[head_end + 4..].to_vec();
    while body.len() < content_length {
        let n = socket.read(&mut temp).await?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&temp[..n]);
    }

    Ok(Some(RecordedRequest {
        method,
        target,
        headers,
        body,
    }))
}

pub const TOKEN: &str = "test-token";

/// Start the proxy against `upstream_url` with extra variables layered on
/// top of the token and upstream.
pub async fn start_proxy(upstream_url: &str, extra: &[(&str, &str)]) -> SocketAddr {
    let mut vars: Vec<(String, String)> = vec![
        ("AUTH_TOKEN".to_string(), TOKEN.to_string()),
        ("UPSTREAM_URL".to_string(), upstream_url.to_string()),
    ];
    vars.extend(extra.iter().map(|(k, v)| (k.to_string(), v.to_string())));

    let mut cfg = Config::from_lookup(|key| {
        vars.iter().rev().find(|(k, _)| k == key).map(|(_, v)| v.clone())
    })
    .unwrap();
    cfg.upstream.system_proxy = false;

    let handler = ProxyHandler::from_config(&cfg).unwrap();
    let listener = Listener::bind("127.0.0.1:0", handler).await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(listener.run());
    addr
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

pub fn bearer() -> String {
    format!("Bearer {TOKEN}")
}
