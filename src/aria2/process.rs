use crate::{Error, Result};
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use sysinfo::System;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};

/// How many times a busy RPC port is rechecked after killing its occupant
pub const PORT_RECLAIM_ATTEMPTS: u32 = 3;
pub const PORT_RECLAIM_DELAY: Duration = Duration::from_millis(500);

const EARLY_EXIT_WINDOW: Duration = Duration::from_millis(100);

/// Everything needed to launch one aria2c instance
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    pub binary: PathBuf,
    pub port: u16,
    pub secret: Option<String>,
    pub listen_all: bool,
    pub download_dir: PathBuf,
    pub session_file: Option<PathBuf>,
}

pub struct Aria2Process {
    child: Option<Child>,
}

/// Executable name used to find the daemon in the process table
pub fn process_name(binary: &Path) -> String {
    binary
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| binary.to_string_lossy().to_string())
}

fn normalize_name(name: &str) -> String {
    let lower = name.to_ascii_lowercase();
    match lower.strip_suffix(".exe") {
        Some(stem) => stem.to_string(),
        None => lower,
    }
}

fn matches_name(process: &str, wanted: &str) -> bool {
    normalize_name(process) == normalize_name(wanted)
}

/// Check the OS process table for an executable with this name
pub fn is_process_running(name: &str) -> bool {
    let mut sys = System::new();
    sys.refresh_processes();
    let own_pid = std::process::id();
    sys.processes()
        .values()
        .any(|p| p.pid().as_u32() != own_pid && matches_name(p.name(), name))
}

/// Kill every process with this executable name. Returns how many were signalled.
pub fn kill_processes_named(name: &str) -> usize {
    let mut sys = System::new();
    sys.refresh_processes();
    let own_pid = std::process::id();

    let mut killed = 0;
    for process in sys.processes().values() {
        if process.pid().as_u32() == own_pid || !matches_name(process.name(), name) {
            continue;
        }
        if process.kill() {
            log::info!("Killed {} (pid {})", process.name(), process.pid());
            killed += 1;
        } else {
            log::warn!("Failed to kill {} (pid {})", process.name(), process.pid());
        }
    }
    killed
}

/// Check if a port is available for binding
pub fn is_port_available(port: u16) -> bool {
    TcpListener::bind(("127.0.0.1", port)).is_ok()
}

/// Try to free `port` by killing processes named `occupant`.
///
/// The process table does not say who holds a port, so this kills every
/// process with that executable name, including instances listening on
/// other ports. Callers that want to keep a user's own daemon alive should
/// adopt it first (`Settings::adopt_running_daemon`).
///
/// Checks the port at most `attempts` times, sleeping `delay` after each
/// kill. Returns whether the port is free at the end.
pub async fn reclaim_port(port: u16, occupant: &str, attempts: u32, delay: Duration) -> bool {
    for attempt in 1..=attempts {
        if is_port_available(port) {
            return true;
        }
        let killed = kill_processes_named(occupant);
        log::warn!(
            "Port {} is busy (attempt {}/{}), killed {} {} process(es)",
            port,
            attempt,
            attempts,
            killed,
            occupant
        );
        tokio::time::sleep(delay).await;
    }
    is_port_available(port)
}

/// Find an available port starting from the given port
/// Returns the first available port in the range [start, start+100)
pub fn find_available_port(start: u16) -> Result<u16> {
    for port in start..start.saturating_add(100) {
        if is_port_available(port) {
            return Ok(port);
        }
    }
    Err(Error::Process(format!(
        "No available ports in range {}-{}",
        start,
        start.saturating_add(99)
    )))
}

/// Command line for aria2c. Pure so it can be checked without spawning.
pub fn build_args(launch: &LaunchConfig) -> Vec<String> {
    let mut args = vec![
        "--enable-rpc=true".to_string(),
        format!("--rpc-listen-port={}", launch.port),
        format!("--rpc-listen-all={}", launch.listen_all),
    ];

    if let Some(secret) = launch.secret.as_deref().filter(|s| !s.is_empty()) {
        args.push(format!("--rpc-secret={}", secret));
    }

    if !launch.download_dir.as_os_str().is_empty() {
        args.push(format!("--dir={}", launch.download_dir.display()));
    }

    args.push("--continue=true".to_string());

    if let Some(ref session) = launch.session_file {
        args.push(format!("--save-session={}", session.display()));
        args.push(format!("--input-file={}", session.display()));
        args.push("--save-session-interval=60".to_string());
    }

    // aria2c exits on its own if the shell dies without cleaning up
    #[cfg(unix)]
    {
        args.push(format!("--stop-with-process={}", std::process::id()));
    }

    args
}

fn forward_output<R>(reader: R, level: log::Level)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim().is_empty() {
                continue;
            }
            log::log!(target: "aria2c", level, "{}", line);
        }
    });
}

impl Aria2Process {
    /// Spawn aria2c. The caller is responsible for the port being free.
    pub async fn start(launch: &LaunchConfig) -> Result<Self> {
        if let Some(ref session) = launch.session_file {
            if let Some(parent) = session.parent() {
                std::fs::create_dir_all(parent)?;
            }
            // aria2c refuses to start when --input-file does not exist
            if !session.exists() {
                std::fs::File::create(session)?;
            }
        }

        let args = build_args(launch);
        log::info!(
            "Starting {} on port {} (dir: {})",
            launch.binary.display(),
            launch.port,
            launch.download_dir.display()
        );

        // Our stdout is the front-end channel, so daemon output goes to the log
        let mut child = Command::new(&launch.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                log::error!("Failed to start aria2c: {}", e);
                Error::Process(format!("aria2c start failed: {}", e))
            })?;

        if let Some(stdout) = child.stdout.take() {
            forward_output(stdout, log::Level::Debug);
        }
        if let Some(stderr) = child.stderr.take() {
            forward_output(stderr, log::Level::Warn);
        }

        if let Ok(status) = tokio::time::timeout(EARLY_EXIT_WINDOW, child.wait()).await {
            let status = status?;
            return Err(Error::Process(format!("aria2c exited early: {}", status)));
        }

        log::info!("aria2c started (pid {:?})", child.id());
        Ok(Self { child: Some(child) })
    }

    pub async fn stop(&mut self) -> Result<()> {
        if let Some(mut child) = self.child.take() {
            log::info!("Stopping aria2c process");
            // It may already be gone after an RPC shutdown
            if child.try_wait()?.is_none() {
                child.kill().await?;
            }
            child.wait().await?;
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.child.is_some()
    }

    /// Reap the child if it exited on its own
    pub fn has_exited(&mut self) -> bool {
        match self.child.as_mut().map(|c| c.try_wait()) {
            Some(Ok(Some(status))) => {
                log::warn!("aria2c exited: {}", status);
                self.child = None;
                true
            }
            Some(Ok(None)) => false,
            Some(Err(e)) => {
                log::warn!("Failed to poll aria2c: {}", e);
                false
            }
            None => true,
        }
    }
}

impl Drop for Aria2Process {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.start_kill();
        }
    }
}
