//! Shared test utilities: an in-process aria2 websocket endpoint.

use std::sync::{Arc, Mutex};

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

use crate::aria2::Aria2Client;

pub(crate) const TEST_GID: &str = "2089b05ecca3d829";

/// How the fake daemon answers one call.
pub(crate) enum Reply {
    Result(Value),
    Error { code: i64, message: &'static str },
    /// Read the request and never answer.
    Silent,
}

type Responder = dyn Fn(&str, &Value) -> Reply + Send + Sync;

/// Accepts websocket connections on an ephemeral port and answers JSON-RPC
/// requests with whatever the responder returns for `(method, params)`.
/// Method names are recorded with the `aria2.` prefix stripped.
pub(crate) struct FakeAria2 {
    pub port: u16,
    calls: Arc<Mutex<Vec<(String, Value)>>>,
}

impl FakeAria2 {
    pub async fn start<F>(respond: F) -> Self
    where
        F: Fn(&str, &Value) -> Reply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let respond: Arc<Responder> = Arc::new(respond);

        let seen = calls.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let respond = respond.clone();
                let seen = seen.clone();
                tokio::spawn(async move {
                    let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                        return;
                    };
                    while let Some(Ok(msg)) = ws.next().await {
                        let Ok(text) = msg.to_text() else { continue };
                        let Ok(request) = serde_json::from_str::<Value>(text) else {
                            continue;
                        };
                        let id = request["id"].clone();
                        let method = request["method"].as_str().unwrap_or_default();
                        let method = method.strip_prefix("aria2.").unwrap_or(method).to_string();
                        let params = request["params"].clone();
                        seen.lock().unwrap().push((method.clone(), params.clone()));

                        let body = match respond(&method, &params) {
                            Reply::Result(result) => {
                                json!({"jsonrpc": "2.0", "id": id, "result": result})
                            }
                            Reply::Error { code, message } => json!({
                                "jsonrpc": "2.0",
                                "id": id,
                                "error": {"code": code, "message": message},
                            }),
                            Reply::Silent => continue,
                        };
                        if ws.send(Message::Text(body.to_string())).await.is_err() {
                            return;
                        }
                    }
                });
            }
        });

        Self { port, calls }
    }

    /// Answer every call with the test GID, the way aria2 acknowledges
    /// pause/unpause/remove.
    pub async fn acknowledging() -> Self {
        Self::start(|_, _| Reply::Result(json!(TEST_GID))).await
    }

    pub async fn client(&self) -> Aria2Client {
        Aria2Client::connect(self.port, None).await.unwrap()
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn methods(&self) -> Vec<String> {
        self.calls().into_iter().map(|(method, _)| method).collect()
    }

    /// Params of the first recorded call to `method`.
    pub fn params_of(&self, method: &str) -> Option<Value> {
        self.calls()
            .into_iter()
            .find(|(m, _)| m == method)
            .map(|(_, params)| params)
    }
}

/// True when any positional param is an options object carrying `dir`.
pub(crate) fn has_dir_option(params: &Value, dir: &str) -> bool {
    params
        .as_array()
        .map(|items| items.iter().any(|p| p["dir"] == dir))
        .unwrap_or(false)
}
