mod auth;
mod concurrency;
mod end_to_end;
mod lifecycle;
mod probes;

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tempfile::TempDir;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use vigil_debugger::{Debugger, DebuggerOptions};

const RECV_TIMEOUT: Duration = Duration::from_secs(10);

pub(crate) fn options(dir: &TempDir) -> DebuggerOptions {
    DebuggerOptions::new(dir.path()).with_port(0)
}

pub(crate) fn url(debugger: &Debugger, password: Option<&str>) -> String {
    let addr = debugger.local_addr();
    match password {
        Some(password) => format!("ws://{addr}/?password={password}"),
        None => format!("ws://{addr}/"),
    }
}

/// Stops the debugger off the async test thread.
pub(crate) async fn shutdown(debugger: Debugger) {
    tokio::task::spawn_blocking(move || debugger.shutdown())
        .await
        .unwrap();
}

pub(crate) struct Client {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl Client {
    pub(crate) async fn connect(debugger: &Debugger, password: Option<&str>) -> Self {
        let (socket, _) = tokio_tungstenite::connect_async(url(debugger, password))
            .await
            .unwrap();
        Self { socket }
    }

    pub(crate) async fn send_text(&mut self, text: &str) {
        self.socket.send(Message::text(text.to_owned())).await.unwrap();
    }

    pub(crate) async fn recv(&mut self) -> Value {
        loop {
            let message = tokio::time::timeout(RECV_TIMEOUT, self.socket.next())
                .await
                .expect("timed out waiting for the server")
                .expect("server closed the connection")
                .unwrap();
            if let Message::Text(text) = message {
                return serde_json::from_str(text.as_str()).unwrap();
            }
        }
    }

    /// Sends `message` and returns the reply, skipping hit broadcasts.
    pub(crate) async fn request(&mut self, message: Value) -> Value {
        self.send_text(&message.to_string()).await;
        loop {
            let reply = self.recv().await;
            if reply["type"] != "hit" {
                return reply;
            }
        }
    }

    pub(crate) async fn next_hit(&mut self) -> Value {
        loop {
            let message = self.recv().await;
            if message["type"] == "hit" {
                return message;
            }
        }
    }

    pub(crate) async fn close(mut self) {
        let _ = self.socket.close(None).await;
    }
}
