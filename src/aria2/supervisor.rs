use crate::aria2::process::{
    find_available_port, is_port_available, is_process_running, process_name, reclaim_port,
    LaunchConfig, PORT_RECLAIM_ATTEMPTS, PORT_RECLAIM_DELAY,
};
use crate::aria2::{Aria2Client, Aria2Process};
use crate::{Error, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};

const MAX_RESTART_ATTEMPTS: u32 = 3;
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(5);
const RESTART_COOLDOWN: Duration = Duration::from_secs(30);
const STARTUP_GRACE: Duration = Duration::from_millis(500);
const CONNECT_ATTEMPTS: u64 = 5;

/// Supervises the aria2 process, providing health checks and auto-restart
pub struct Aria2Supervisor {
    launch: LaunchConfig,
    adopt_running: bool,
    process: Option<Aria2Process>,
    client: Option<Aria2Client>,
    /// Connected to a daemon someone else started; never killed by us
    adopted: bool,
    restart_count: u32,
    last_restart: Option<Instant>,
    is_shutting_down: bool,
}

impl Aria2Supervisor {
    /// Create a new supervisor (does not start aria2 yet)
    pub fn new(launch: LaunchConfig, adopt_running: bool) -> Self {
        Self {
            launch,
            adopt_running,
            process: None,
            client: None,
            adopted: false,
            restart_count: 0,
            last_restart: None,
            is_shutting_down: false,
        }
    }

    /// Supervisor already holding a connection, with no child of its own
    #[cfg(test)]
    pub(crate) fn with_client(launch: LaunchConfig, client: Aria2Client, adopted: bool) -> Self {
        let mut sup = Self::new(launch, false);
        sup.client = Some(client);
        sup.adopted = adopted;
        sup
    }

    /// Start or adopt aria2 and establish the RPC connection
    pub async fn start(&mut self) -> Result<()> {
        if self.is_shutting_down {
            return Err(Error::Aria2("Supervisor is shutting down".into()));
        }

        let name = process_name(&self.launch.binary);

        if self.adopt_running && is_process_running(&name) {
            match Aria2Client::connect(self.launch.port, self.launch.secret.as_deref()).await {
                Ok(client) => {
                    log::info!(
                        "{} is already running, using it on port {}",
                        name,
                        self.launch.port
                    );
                    self.client = Some(client);
                    self.adopted = true;
                    return Ok(());
                }
                Err(e) => {
                    log::warn!("{} is running but not reachable: {}", name, e);
                }
            }
        }
        self.adopted = false;

        if self.launch.secret.as_deref().map_or(true, str::is_empty) {
            self.launch.secret = Some(generate_secret());
        }

        let port = self.claim_port(&name).await?;
        self.launch.port = port;

        let process = Aria2Process::start(&self.launch).await?;
        self.process = Some(process);

        // Wait for aria2 to open its RPC listener
        tokio::time::sleep(STARTUP_GRACE).await;

        let mut last_error = None;
        for attempt in 1..=CONNECT_ATTEMPTS {
            match Aria2Client::connect(port, self.launch.secret.as_deref()).await {
                Ok(client) => {
                    self.client = Some(client);
                    log::info!("aria2 started successfully on port {}", port);
                    return Ok(());
                }
                Err(e) => {
                    log::warn!("Connection attempt {} failed: {}", attempt, e);
                    last_error = Some(e);
                    tokio::time::sleep(Duration::from_millis(200 * attempt)).await;
                }
            }
        }

        if let Some(mut proc) = self.process.take() {
            let _ = proc.stop().await;
        }

        Err(last_error.unwrap_or_else(|| Error::Aria2Connection("Failed to connect".into())))
    }

    /// Make the configured port usable, killing stale daemons on it first
    async fn claim_port(&self, name: &str) -> Result<u16> {
        let preferred = self.launch.port;
        if is_port_available(preferred) {
            return Ok(preferred);
        }

        if reclaim_port(preferred, name, PORT_RECLAIM_ATTEMPTS, PORT_RECLAIM_DELAY).await {
            return Ok(preferred);
        }

        log::warn!(
            "Port {} is still in use, searching for alternative",
            preferred
        );
        find_available_port(preferred)
    }

    /// Save the session and shut our daemon down; adopted daemons are only
    /// disconnected
    async fn terminate(&mut self) -> Result<()> {
        if let (Some(client), false) = (self.client.as_ref(), self.adopted) {
            match client.save_session().await {
                Ok(_) => log::info!("Session saved successfully"),
                Err(e) => log::warn!("Failed to save session: {}", e),
            }

            match client.shutdown().await {
                Ok(_) => {
                    log::info!("aria2 shutdown via RPC");
                    tokio::time::sleep(STARTUP_GRACE).await;
                }
                Err(e) => log::warn!("RPC shutdown failed: {}", e),
            }
        }

        self.client = None;
        self.adopted = false;

        if let Some(mut proc) = self.process.take() {
            proc.stop().await?;
        }
        Ok(())
    }

    /// Graceful shutdown with session save
    pub async fn stop(&mut self) -> Result<()> {
        self.is_shutting_down = true;
        log::info!("Stopping aria2 supervisor");
        self.terminate().await?;
        log::info!("aria2 stopped");
        Ok(())
    }

    /// Point the daemon at a new download directory.
    ///
    /// A daemon we spawned is restarted with the new `--dir`. An adopted one
    /// keeps running; the directory still reaches it through each add call.
    pub async fn restart_with_dir(&mut self, dir: PathBuf) -> Result<()> {
        self.launch.download_dir = dir;

        if self.process.is_none() {
            return Ok(());
        }

        log::info!(
            "Restarting aria2c with new directory {}",
            self.launch.download_dir.display()
        );
        self.terminate().await?;
        self.start()
            .await
            .map_err(|e| Error::Process(format!("failed to restart aria2c: {}", e)))
    }

    /// Check if aria2 is responsive
    pub async fn health_check(&mut self) -> Result<()> {
        if let Some(ref mut proc) = self.process {
            if proc.has_exited() {
                return Err(Error::Aria2NotRunning);
            }
        }

        let client = self.client.as_ref().ok_or(Error::Aria2NotRunning)?;
        client.ping().await
    }

    /// Ensure aria2 is running, restart if dead. Returns whether a restart happened.
    pub async fn ensure_running(&mut self) -> Result<bool> {
        if self.is_shutting_down {
            return Err(Error::Aria2("Supervisor is shutting down".into()));
        }

        if let Some(last) = self.last_restart {
            if last.elapsed() < RESTART_COOLDOWN && self.restart_count >= MAX_RESTART_ATTEMPTS {
                return Err(Error::Aria2(
                    "Too many restart attempts, waiting for cooldown".into(),
                ));
            }
            if last.elapsed() >= RESTART_COOLDOWN {
                self.restart_count = 0;
            }
        }

        if self.health_check().await.is_ok() {
            return Ok(false);
        }

        log::warn!(
            "aria2 health check failed, attempting restart ({}/{})",
            self.restart_count + 1,
            MAX_RESTART_ATTEMPTS
        );

        self.client = None;
        self.adopted = false;
        if let Some(mut proc) = self.process.take() {
            let _ = proc.stop().await;
        }

        self.restart_count += 1;
        self.last_restart = Some(Instant::now());

        self.start().await.map(|_| true)
    }

    /// Get a clone of the client
    pub fn get_client_clone(&self) -> Result<Aria2Client> {
        self.client.clone().ok_or(Error::Aria2NotRunning)
    }

    /// Check if aria2 is currently running
    pub fn is_running(&self) -> bool {
        self.client.is_some()
            && (self.adopted || self.process.as_ref().is_some_and(|p| p.is_running()))
    }

    pub fn is_adopted(&self) -> bool {
        self.adopted
    }

    pub fn is_shutting_down(&self) -> bool {
        self.is_shutting_down
    }

    pub fn download_dir(&self) -> &Path {
        &self.launch.download_dir
    }

    pub fn get_port(&self) -> u16 {
        self.launch.port
    }

    pub fn get_restart_count(&self) -> u32 {
        self.restart_count
    }
}

/// Shared supervisor state for use across the application
pub type SharedSupervisor = Arc<Mutex<Aria2Supervisor>>;

pub fn create_shared_supervisor(launch: LaunchConfig, adopt_running: bool) -> SharedSupervisor {
    Arc::new(Mutex::new(Aria2Supervisor::new(launch, adopt_running)))
}

/// Start the background health check loop
pub fn spawn_health_check_loop(
    supervisor: SharedSupervisor,
    event_tx: Option<mpsc::Sender<SupervisorEvent>>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(HEALTH_CHECK_INTERVAL).await;

            let mut sup = supervisor.lock().await;

            if sup.is_shutting_down {
                break;
            }

            match sup.ensure_running().await {
                Ok(false) => {}
                Ok(true) => {
                    if let Some(ref tx) = event_tx {
                        let _ = tx
                            .send(SupervisorEvent::Restarted {
                                port: sup.get_port(),
                                restart_count: sup.restart_count,
                            })
                            .await;
                    }
                }
                Err(e) => {
                    log::error!("Supervisor ensure_running failed: {}", e);
                    if let Some(ref tx) = event_tx {
                        let _ = tx
                            .send(SupervisorEvent::HealthCheckFailed {
                                error: e.to_string(),
                                restart_count: sup.restart_count,
                            })
                            .await;
                    }

                    if sup.restart_count >= MAX_RESTART_ATTEMPTS {
                        log::error!(
                            "aria2 failed to restart after {} attempts",
                            MAX_RESTART_ATTEMPTS
                        );
                        if let Some(ref tx) = event_tx {
                            let _ = tx.send(SupervisorEvent::MaxRestartsReached).await;
                        }
                    }
                }
            }
        }
    })
}

/// Events emitted by the supervisor for the front end
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SupervisorEvent {
    #[serde(rename_all = "camelCase")]
    Restarted { port: u16, restart_count: u32 },
    #[serde(rename_all = "camelCase")]
    HealthCheckFailed { error: String, restart_count: u32 },
    MaxRestartsReached,
}

impl SupervisorEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            SupervisorEvent::Restarted { .. } => "aria2:restarted",
            SupervisorEvent::HealthCheckFailed { .. } => "aria2:health-check-failed",
            SupervisorEvent::MaxRestartsReached => "aria2:max-restarts-reached",
        }
    }
}

/// Generate a random 32-character hex secret for RPC authentication
fn generate_secret() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let bytes: [u8; 16] = rng.gen();
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{FakeAria2, Reply};
    use serde_json::json;

    fn launch() -> LaunchConfig {
        let port = {
            let listener = std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap();
            listener.local_addr().unwrap().port()
        };
        LaunchConfig {
            binary: PathBuf::from("/nonexistent/orion-test/aria2c-missing"),
            port,
            secret: None,
            listen_all: false,
            download_dir: PathBuf::from("/tmp"),
            session_file: None,
        }
    }

    #[test]
    fn test_generate_secret() {
        let a = generate_secret();
        let b = generate_secret();
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_new_supervisor_is_idle() {
        let sup = Aria2Supervisor::new(launch(), false);
        assert!(!sup.is_running());
        assert!(!sup.is_adopted());
        assert_eq!(sup.get_restart_count(), 0);
        assert!(matches!(sup.get_client_clone(), Err(Error::Aria2NotRunning)));
    }

    #[tokio::test]
    async fn test_restart_with_dir_without_process_only_records_dir() {
        let mut sup = Aria2Supervisor::new(launch(), false);
        sup.restart_with_dir(PathBuf::from("/srv/new")).await.unwrap();
        assert_eq!(sup.download_dir(), Path::new("/srv/new"));
        assert!(!sup.is_running());
    }

    #[tokio::test]
    async fn test_start_after_stop_is_rejected() {
        let mut sup = Aria2Supervisor::new(launch(), false);
        sup.stop().await.unwrap();
        assert!(sup.is_shutting_down());
        assert!(sup.start().await.is_err());
        assert!(sup.ensure_running().await.is_err());
    }

    #[tokio::test]
    async fn test_start_with_missing_binary_fails() {
        let mut sup = Aria2Supervisor::new(launch(), false);
        let err = sup.start().await.unwrap_err();
        assert!(matches!(err, Error::Process(_)));
        assert!(!sup.is_running());
    }

    #[tokio::test]
    async fn test_health_check_without_client() {
        let mut sup = Aria2Supervisor::new(launch(), false);
        assert!(matches!(
            sup.health_check().await,
            Err(Error::Aria2NotRunning)
        ));
    }

    #[tokio::test]
    async fn test_stop_saves_session_of_owned_daemon() {
        let daemon = FakeAria2::start(|_, _| Reply::Result(json!("OK"))).await;
        let mut sup = Aria2Supervisor::with_client(launch(), daemon.client().await, false);

        sup.stop().await.unwrap();

        assert_eq!(daemon.methods(), vec!["saveSession", "shutdown"]);
        assert!(matches!(sup.get_client_clone(), Err(Error::Aria2NotRunning)));
    }

    #[tokio::test]
    async fn test_stop_leaves_adopted_daemon_alone() {
        let daemon = FakeAria2::start(|_, _| Reply::Result(json!("OK"))).await;
        let mut sup = Aria2Supervisor::with_client(launch(), daemon.client().await, true);

        sup.stop().await.unwrap();

        assert!(daemon.methods().is_empty());
    }

    #[tokio::test]
    async fn test_health_check_pings_daemon() {
        let daemon = FakeAria2::start(|_, _| {
            Reply::Result(json!({"version": "1.37.0", "enabledFeatures": []}))
        })
        .await;
        let mut sup = Aria2Supervisor::with_client(launch(), daemon.client().await, true);

        sup.health_check().await.unwrap();
        assert_eq!(daemon.methods(), vec!["getVersion"]);
        assert!(!sup.ensure_running().await.unwrap());
        assert_eq!(sup.get_restart_count(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_restart_with_dir_respawns_with_new_dir() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("argv.log");
        let binary = dir.path().join("fake-aria2c");
        std::fs::write(
            &binary,
            format!("#!/bin/sh\necho \"$@\" >> '{}'\nexec sleep 30\n", log.display()),
        )
        .unwrap();
        std::fs::set_permissions(&binary, std::fs::Permissions::from_mode(0o755)).unwrap();

        let old_dir = dir.path().join("old");
        let new_dir = dir.path().join("new");
        let mut l = launch();
        l.binary = binary;
        l.download_dir = old_dir.clone();

        let mut sup = Aria2Supervisor::new(l.clone(), false);
        sup.process = Some(Aria2Process::start(&l).await.unwrap());

        // the stand-in never opens an RPC listener, so reconnecting fails
        let err = sup.restart_with_dir(new_dir.clone()).await.unwrap_err();
        assert!(matches!(err, Error::Process(_)));
        assert!(sup.process.is_none());
        assert_eq!(sup.download_dir(), new_dir.as_path());

        let argv = std::fs::read_to_string(&log).unwrap();
        let lines: Vec<&str> = argv.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains(&format!("--dir={}", old_dir.display())));
        assert!(lines[1].contains(&format!("--dir={}", new_dir.display())));
    }

    #[test]
    fn test_event_names_and_payload() {
        let event = SupervisorEvent::Restarted {
            port: 6801,
            restart_count: 1,
        };
        assert_eq!(event.event_name(), "aria2:restarted");
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["port"], 6801);
        assert_eq!(value["restartCount"], 1);
    }
}
