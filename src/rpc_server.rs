//! Front-end channel
//!
//! One JSON object per line on stdin is a request `{id, method, params}`.
//! Every request gets exactly one line back on stdout, either
//! `{id, result}` or `{id, error: {code, message}}`. Supervisor events are
//! pushed as `{event, data}` lines in between.

use crate::aria2::SupervisorEvent;
use crate::{commands, AppState, Error};
use serde_json::Value;
use std::io::{self, Write};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

const PARSE_ERROR: i32 = -32700;

/// Serve requests from stdin until it closes
pub async fn run_rpc_server(state: AppState, mut event_rx: mpsc::Receiver<SupervisorEvent>) {
    // A single writer owns stdout so lines never interleave
    let (stdout_tx, mut stdout_rx) = mpsc::unbounded_channel::<String>();

    let writer = tokio::spawn(async move {
        while let Some(line) = stdout_rx.recv().await {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            let _ = writeln!(handle, "{}", line);
            let _ = handle.flush();
        }
    });

    let event_tx = stdout_tx.clone();
    let forwarder = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            let _ = event_tx.send(event_line(&event));
        }
    });

    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();

    let mut handlers = Vec::new();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }

        let request: Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                let _ = stdout_tx.send(error_line(None, PARSE_ERROR, &format!("Parse error: {}", e)));
                continue;
            }
        };

        let id = request.get("id").cloned();
        let method = request
            .get("method")
            .and_then(|m| m.as_str())
            .unwrap_or("")
            .to_string();
        let params = request.get("params").cloned().unwrap_or(Value::Null);

        let req_state = state.clone();
        let req_tx = stdout_tx.clone();
        handlers.push(tokio::spawn(async move {
            let line = match handle_method(&req_state, &method, params).await {
                Ok(value) => success_line(id, value),
                Err(e) => error_line(id, e.code(), &e.user_message()),
            };
            let _ = req_tx.send(line);
        }));
        handlers.retain(|h| !h.is_finished());
    }

    log::info!("stdin closed, draining {} pending request(s)", handlers.len());
    for handler in handlers {
        let _ = handler.await;
    }
    forwarder.abort();
    let _ = forwarder.await;
    drop(stdout_tx);
    let _ = writer.await;
}

fn str_param(params: &Value, camel: &str, snake: &str) -> String {
    params
        .get(camel)
        .or_else(|| params.get(snake))
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}

/// Route one request to its command
pub async fn handle_method(state: &AppState, method: &str, params: Value) -> crate::Result<Value> {
    match method {
        "download" => {
            let url = str_param(&params, "url", "url");
            let gid = commands::download(state, url).await?;
            Ok(serde_json::to_value(gid)?)
        }
        "get_download_progress" => {
            let gid = str_param(&params, "gid", "gid");
            let info = commands::get_download_progress(state, gid).await?;
            Ok(serde_json::to_value(info)?)
        }
        "pause_download" => {
            let gid = str_param(&params, "gid", "gid");
            commands::pause_download(state, gid).await?;
            Ok(Value::Null)
        }
        "resume_download" => {
            let gid = str_param(&params, "gid", "gid");
            commands::resume_download(state, gid).await?;
            Ok(Value::Null)
        }
        "cancel_download" => {
            let gid = str_param(&params, "gid", "gid");
            commands::cancel_download(state, gid).await?;
            Ok(Value::Null)
        }

        "get_download_directory" => {
            let dir = commands::get_download_directory(state).await;
            Ok(Value::String(dir))
        }
        "set_download_directory" => {
            let path = str_param(&params, "path", "path");
            let dir = commands::set_download_directory(state, path).await?;
            Ok(Value::String(dir))
        }

        "get_engine_version" => commands::get_engine_version(state).await,
        "restart_aria2" => {
            commands::restart_aria2(state).await?;
            Ok(Value::Null)
        }
        "get_default_download_path" => Ok(Value::String(commands::get_default_download_path())),
        "get_app_version" => Ok(Value::String(commands::get_app_version())),
        "get_app_info" => Ok(commands::get_app_info()),

        _ => Err(Error::InvalidInput(format!("Unknown method: {}", method))),
    }
}

fn event_line(event: &SupervisorEvent) -> String {
    let msg = serde_json::json!({
        "event": event.event_name(),
        "data": event,
    });
    serde_json::to_string(&msg).unwrap_or_default()
}

fn success_line(id: Option<Value>, result: Value) -> String {
    let response = serde_json::json!({
        "id": id,
        "result": result,
    });
    serde_json::to_string(&response).unwrap_or_default()
}

fn error_line(id: Option<Value>, code: i32, message: &str) -> String {
    let response = serde_json::json!({
        "id": id,
        "error": {
            "code": code,
            "message": message,
        },
    });
    serde_json::to_string(&response).unwrap_or_default()
}
