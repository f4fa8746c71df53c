//! Local stand-ins for the KuCoin servers used by the integration tests.
#![allow(dead_code)]

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use wired_exchange::ConnectionConfig;

pub const WELCOME: &str = r#"{"id":"hQvf8jkno","type":"welcome"}"#;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Polls `condition` every 20ms until it holds or `timeout` passes.
pub async fn eventually(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

pub fn candle_message(symbol: &str, resolution: &str, start: i64) -> String {
    format!(
        r#"{{"type":"message","topic":"/market/candles:{symbol}_{resolution}","subject":"trade.candles.update","data":{{"symbol":"{symbol}","candles":["{start}","67000","67010.5","67020","66990","1.25","83762.5"],"time":1718000000000000000}}}}"#
    )
}

pub fn ticker_message(symbol: &str) -> String {
    format!(
        r#"{{"type":"message","topic":"/market/ticker:all","subject":"{symbol}","data":{{"bestAsk":"67010","bestAskSize":"0.5","bestBid":"67000","bestBidSize":"1.2","price":"67005","sequence":"1612886239695","size":"0.01","time":1718000000000}}}}"#
    )
}

#[derive(Debug, Clone, Copy)]
pub struct MockOptions {
    pub welcome: bool,
    pub pong: bool,
    pub ack: bool,
}

impl Default for MockOptions {
    fn default() -> Self {
        Self {
            welcome: true,
            pong: true,
            ack: true,
        }
    }
}

type AcceptHook = Box<dyn Fn(usize) + Send>;

enum Command {
    Push(String),
    Close,
}

/// A KuCoin-like WebSocket server: sends the welcome, answers pings and
/// subscribe requests (echoing the id as a string) and records every frame.
pub struct MockServer {
    pub addr: SocketAddr,
    frames: Arc<Mutex<Vec<Value>>>,
    connections: Arc<AtomicUsize>,
    current: Arc<Mutex<Option<mpsc::UnboundedSender<Command>>>>,
    on_accept: Arc<Mutex<Option<AcceptHook>>>,
}

impl MockServer {
    pub async fn start(options: MockOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let frames = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));
        let current = Arc::new(Mutex::new(None));
        let on_accept: Arc<Mutex<Option<AcceptHook>>> = Arc::new(Mutex::new(None));

        let (frames_c, connections_c, current_c) = (frames.clone(), connections.clone(), current.clone());
        let on_accept_c = on_accept.clone();
        tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                if let Some(hook) = on_accept_c.lock().as_ref() {
                    hook(connections_c.load(Ordering::SeqCst) + 1);
                }
                let Ok(ws) = tokio_tungstenite::accept_async(tcp).await else {
                    continue;
                };
                let (tx, rx) = mpsc::unbounded_channel();
                *current_c.lock() = Some(tx);
                connections_c.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve(ws, rx, options, frames_c.clone()));
            }
        });

        Self {
            addr,
            frames,
            connections,
            current,
            on_accept,
        }
    }

    /// Runs `hook` with the connection number as each TCP connection is accepted,
    /// before the WebSocket handshake.
    pub fn on_accept(&self, hook: impl Fn(usize) + Send + 'static) {
        *self.on_accept.lock() = Some(Box::new(hook));
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub fn config(&self) -> ConnectionConfig {
        ConnectionConfig::new(
            &self.url(),
            "test-token",
            Duration::from_secs(18),
            Duration::from_secs(10),
        )
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Client frames of the given `type`, oldest first.
    pub fn frames_of(&self, kind: &str) -> Vec<Value> {
        self.frames
            .lock()
            .iter()
            .filter(|f| f["type"] == kind)
            .cloned()
            .collect()
    }

    pub fn push(&self, text: impl Into<String>) {
        if let Some(tx) = self.current.lock().as_ref() {
            let _ = tx.send(Command::Push(text.into()));
        }
    }

    /// Closes the current connection from the server side.
    pub fn close_current(&self) {
        if let Some(tx) = self.current.lock().take() {
            let _ = tx.send(Command::Close);
        }
    }
}

async fn serve(
    ws: tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    options: MockOptions,
    frames: Arc<Mutex<Vec<Value>>>,
) {
    let (mut write, mut read) = ws.split();
    if options.welcome && write.send(Message::Text(WELCOME.to_string())).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Push(text)) => {
                    if write.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Some(Command::Close) | None => {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
            },
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let Ok(frame) = serde_json::from_str::<Value>(&text) else {
                        continue;
                    };
                    frames.lock().push(frame.clone());
                    let id = match &frame["id"] {
                        Value::Number(n) => n.to_string(),
                        Value::String(s) => s.clone(),
                        _ => String::new(),
                    };
                    let reply = match frame["type"].as_str() {
                        Some("ping") if options.pong => Some("pong"),
                        Some("subscribe") if options.ack => Some("ack"),
                        _ => None,
                    };
                    if let Some(kind) = reply {
                        let answer = serde_json::json!({"id": id, "type": kind}).to_string();
                        if write.send(Message::Text(answer)).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
}

/// Serves `body` as a JSON 200 to every HTTP request; keeps the request heads.
pub struct MockHttp {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<String>>>,
}

impl MockHttp {
    pub async fn start(body: String) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let requests_c = requests.clone();
        tokio::spawn(async move {
            while let Ok((mut tcp, _)) = listener.accept().await {
                let mut head = Vec::new();
                let mut buf = [0u8; 1024];
                while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                    match tcp.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => head.extend_from_slice(&buf[..n]),
                    }
                }
                requests_c.lock().push(String::from_utf8_lossy(&head).to_string());
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = tcp.write_all(response.as_bytes()).await;
                let _ = tcp.shutdown().await;
            }
        });
        Self { addr, requests }
    }

    pub fn host_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }
}

pub fn bullet_body(endpoint: &str) -> String {
    serde_json::json!({
        "code": "200000",
        "data": {
            "token": "test-token",
            "instanceServers": [{
                "endpoint": endpoint,
                "encrypt": false,
                "protocol": "websocket",
                "pingInterval": 18000,
                "pingTimeout": 10000
            }]
        }
    })
    .to_string()
}
