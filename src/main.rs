use orion::config::{self, Settings};
use orion::{rpc_server, AppState};
use tokio::sync::mpsc;

#[tokio::main]
async fn main() {
    // Logs go to stderr; stdout belongs to the front end
    env_logger::init();

    let data_dir = match config::data_dir() {
        Ok(dir) => dir,
        Err(e) => {
            log::error!("{}", e);
            eprintln!("Failed to initialize: {}", e);
            std::process::exit(1);
        }
    };

    let settings = match Settings::load_or_quarantine(&data_dir) {
        Ok(settings) => settings,
        Err(e) => {
            log::error!("Failed to load settings: {}", e);
            eprintln!("Failed to initialize: {}", e);
            std::process::exit(1);
        }
    };

    let (event_tx, event_rx) = mpsc::channel(32);

    let state = AppState::new(settings);
    if let Err(e) = state.initialize(data_dir, event_tx).await {
        log::error!("aria2c couldn't start: {}", e);
        eprintln!("Failed to initialize: {}", e);
        std::process::exit(1);
    }

    log::info!("orion started, waiting for RPC commands on stdin");

    tokio::select! {
        _ = rpc_server::run_rpc_server(state.clone(), event_rx) => {}
        _ = tokio::signal::ctrl_c() => {
            log::info!("Interrupted");
        }
    }

    if let Err(e) = state.shutdown().await {
        log::warn!("Failed to stop aria2c cleanly: {}", e);
    }
}
