use crate::aria2::{
    create_shared_supervisor, spawn_health_check_loop, Aria2Client, LaunchConfig,
    SharedSupervisor, SupervisorEvent,
};
use crate::config::Settings;
use crate::{Error, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

const SESSION_FILE: &str = "aria2.session";

#[derive(Clone)]
pub struct AppState {
    supervisor: Arc<RwLock<Option<SharedSupervisor>>>,
    settings: Arc<RwLock<Settings>>,
    data_dir: Arc<RwLock<Option<PathBuf>>>,
    event_tx: Arc<RwLock<Option<mpsc::Sender<SupervisorEvent>>>>,
    health_check_handle: Arc<RwLock<Option<tokio::task::JoinHandle<()>>>>,
}

fn launch_config(settings: &Settings, data_dir: &Path) -> LaunchConfig {
    LaunchConfig {
        binary: settings.aria2c_path.clone(),
        port: settings.rpc_port,
        secret: settings.rpc_secret.clone(),
        listen_all: settings.rpc_listen_all,
        download_dir: settings.download_dir.clone(),
        session_file: settings
            .enable_session
            .then(|| data_dir.join(SESSION_FILE)),
    }
}

impl AppState {
    pub fn new(settings: Settings) -> Self {
        Self {
            supervisor: Arc::new(RwLock::new(None)),
            settings: Arc::new(RwLock::new(settings)),
            data_dir: Arc::new(RwLock::new(None)),
            event_tx: Arc::new(RwLock::new(None)),
            health_check_handle: Arc::new(RwLock::new(None)),
        }
    }

    /// State wired to an already connected daemon, without spawning one
    #[cfg(test)]
    pub(crate) async fn with_client(settings: Settings, client: Aria2Client) -> Self {
        let launch = launch_config(&settings, Path::new(""));
        let state = Self::new(settings);
        let supervisor = crate::aria2::Aria2Supervisor::with_client(launch, client, true);
        *state.supervisor.write().await = Some(Arc::new(tokio::sync::Mutex::new(supervisor)));
        state
    }

    /// Start (or adopt) aria2 and begin supervising it
    pub async fn initialize(
        &self,
        data_dir: PathBuf,
        event_tx: mpsc::Sender<SupervisorEvent>,
    ) -> Result<()> {
        *self.data_dir.write().await = Some(data_dir.clone());
        *self.event_tx.write().await = Some(event_tx.clone());

        let (launch, adopt_running) = {
            let settings = self.settings.read().await;
            (
                launch_config(&settings, &data_dir),
                settings.adopt_running_daemon,
            )
        };

        let supervisor = create_shared_supervisor(launch, adopt_running);
        let (port, adopted) = {
            let mut sup = supervisor.lock().await;
            sup.start().await?;
            (sup.get_port(), sup.is_adopted())
        };

        *self.supervisor.write().await = Some(supervisor.clone());

        let handle = spawn_health_check_loop(supervisor, Some(event_tx));
        *self.health_check_handle.write().await = Some(handle);

        log::info!(
            "App state initialized with aria2 on port {} ({})",
            port,
            if adopted { "adopted" } else { "spawned" }
        );
        Ok(())
    }

    /// Stop supervising; kills aria2 if this shell started it
    pub async fn shutdown(&self) -> Result<()> {
        if let Some(handle) = self.health_check_handle.write().await.take() {
            handle.abort();
        }

        if let Some(supervisor) = self.supervisor.write().await.take() {
            let mut sup = supervisor.lock().await;
            sup.stop().await?;
        }

        log::info!("aria2 supervision stopped");
        Ok(())
    }

    pub async fn restart_aria2(&self) -> Result<()> {
        log::info!("Restarting aria2...");

        let data_dir = self.get_data_dir().await?;
        let event_tx = self
            .event_tx
            .read()
            .await
            .clone()
            .ok_or(Error::Aria2NotRunning)?;

        self.shutdown().await?;
        self.initialize(data_dir, event_tx).await?;

        log::info!("aria2 restarted successfully");
        Ok(())
    }

    pub async fn get_client(&self) -> Result<Aria2Client> {
        let supervisor_opt = self.supervisor.read().await;
        let supervisor = supervisor_opt.as_ref().ok_or(Error::Aria2NotRunning)?;

        let sup = supervisor.lock().await;
        sup.get_client_clone()
    }

    pub async fn download_dir(&self) -> PathBuf {
        self.settings.read().await.download_dir.clone()
    }

    /// Record a new download directory, persist it, and restart a daemon we own
    pub async fn set_download_dir(&self, dir: PathBuf) -> Result<()> {
        let snapshot = {
            let mut settings = self.settings.write().await;
            settings.download_dir = dir.clone();
            settings.clone()
        };

        if let Some(ref data_dir) = *self.data_dir.read().await {
            if let Err(e) = snapshot.save(data_dir) {
                log::warn!("Failed to persist settings: {}", e);
            }
        }

        if let Some(ref supervisor) = *self.supervisor.read().await {
            let mut sup = supervisor.lock().await;
            sup.restart_with_dir(dir).await?;
        }
        Ok(())
    }

    pub async fn is_aria2_running(&self) -> bool {
        match *self.supervisor.read().await {
            Some(ref supervisor) => supervisor.lock().await.is_running(),
            None => false,
        }
    }

    pub async fn is_aria2_adopted(&self) -> bool {
        match *self.supervisor.read().await {
            Some(ref supervisor) => supervisor.lock().await.is_adopted(),
            None => false,
        }
    }

    pub async fn get_restart_count(&self) -> u32 {
        match *self.supervisor.read().await {
            Some(ref supervisor) => supervisor.lock().await.get_restart_count(),
            None => 0,
        }
    }

    /// Port the daemon actually listens on, which may differ from the setting
    pub async fn get_rpc_port(&self) -> u16 {
        match *self.supervisor.read().await {
            Some(ref supervisor) => supervisor.lock().await.get_port(),
            None => self.settings.read().await.rpc_port,
        }
    }

    pub async fn get_data_dir(&self) -> Result<PathBuf> {
        self.data_dir
            .read()
            .await
            .clone()
            .ok_or(Error::Config("Data dir not set".into()))
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(Settings::default())
    }
}
