use crate::config::default_download_dir;
use crate::{AppState, Result};

pub async fn get_engine_version(state: &AppState) -> Result<serde_json::Value> {
    Ok(serde_json::json!({
        "name": "aria2",
        "running": state.is_aria2_running().await,
        "adopted": state.is_aria2_adopted().await,
        "port": state.get_rpc_port().await,
        "restartCount": state.get_restart_count().await,
    }))
}

pub async fn restart_aria2(state: &AppState) -> Result<()> {
    state.restart_aria2().await?;
    log::info!("aria2 restarted on request");
    Ok(())
}

pub fn get_default_download_path() -> String {
    default_download_dir().to_string_lossy().to_string()
}

pub fn get_app_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

pub fn get_app_info() -> serde_json::Value {
    serde_json::json!({
        "name": "Orion",
        "version": env!("CARGO_PKG_VERSION"),
        "description": env!("CARGO_PKG_DESCRIPTION"),
        "license": env!("CARGO_PKG_LICENSE"),
        "engine": {
            "name": "aria2",
            "url": "https://aria2.github.io/",
            "protocol": "JSON-RPC over websocket"
        }
    })
}
