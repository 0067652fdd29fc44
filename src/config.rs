//! Shell settings
//!
//! Settings live in a single JSON file inside the platform data directory.
//! Fields missing from an older file fall back to their defaults.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const SETTINGS_FILE: &str = "settings.json";
const QUARANTINE_SUFFIX: &str = "bad";
const APP_DIR_NAME: &str = "com.orion.shell";
const DATA_DIR_ENV: &str = "ORION_DATA_DIR";

pub const DEFAULT_RPC_PORT: u16 = 6800;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
    #[serde(default = "default_rpc_port")]
    pub rpc_port: u16,
    /// Token for the daemon's RPC interface. When unset and the shell spawns
    /// its own daemon, a random one is generated for that session.
    #[serde(default)]
    pub rpc_secret: Option<String>,
    #[serde(default)]
    pub rpc_listen_all: bool,
    #[serde(default = "default_aria2c_path")]
    pub aria2c_path: PathBuf,
    /// Reuse an aria2c that is already running instead of failing to bind.
    #[serde(default = "default_true")]
    pub adopt_running_daemon: bool,
    #[serde(default = "default_true")]
    pub enable_session: bool,
}

fn default_rpc_port() -> u16 {
    DEFAULT_RPC_PORT
}

fn default_true() -> bool {
    true
}

fn default_aria2c_path() -> PathBuf {
    PathBuf::from(aria2c_binary_name())
}

pub fn aria2c_binary_name() -> &'static str {
    if cfg!(target_os = "windows") {
        "aria2c.exe"
    } else {
        "aria2c"
    }
}

/// `~/Downloads` if it exists, otherwise the home directory, otherwise the
/// current working directory.
pub fn default_download_dir() -> PathBuf {
    match dirs::home_dir() {
        Some(home) => {
            let downloads = home.join("Downloads");
            if downloads.is_dir() {
                downloads
            } else {
                home
            }
        }
        None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            rpc_port: DEFAULT_RPC_PORT,
            rpc_secret: None,
            rpc_listen_all: false,
            aria2c_path: default_aria2c_path(),
            adopt_running_daemon: true,
            enable_session: true,
        }
    }
}

impl Settings {
    pub fn path(data_dir: &Path) -> PathBuf {
        data_dir.join(SETTINGS_FILE)
    }

    pub fn load(data_dir: &Path) -> Result<Self> {
        let path = Self::path(data_dir);
        if !path.exists() {
            log::info!("No settings at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(&path)?;
        serde_json::from_str(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// Startup variant of `load`. A file that does not parse is renamed to
    /// `settings.json.bad` before defaults are used, so a later `save`
    /// cannot overwrite what the user wrote.
    pub fn load_or_quarantine(data_dir: &Path) -> Result<Self> {
        match Self::load(data_dir) {
            Err(Error::Config(reason)) => {
                let path = Self::path(data_dir);
                let mut aside = path.clone().into_os_string();
                aside.push(".");
                aside.push(QUARANTINE_SUFFIX);
                let aside = PathBuf::from(aside);

                std::fs::rename(&path, &aside)?;
                log::warn!(
                    "Ignoring unreadable settings ({}), moved to {}",
                    reason,
                    aside.display()
                );
                Ok(Self::default())
            }
            other => other,
        }
    }

    pub fn save(&self, data_dir: &Path) -> Result<()> {
        std::fs::create_dir_all(data_dir)?;
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(Self::path(data_dir), text)?;
        Ok(())
    }
}

/// Resolve the directory holding settings and the aria2 session file.
pub fn data_dir() -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os(DATA_DIR_ENV) {
        return Ok(PathBuf::from(dir));
    }

    dirs::data_dir()
        .or_else(|| {
            dirs::home_dir().map(|h| {
                if cfg!(target_os = "macos") {
                    h.join("Library/Application Support")
                } else if cfg!(target_os = "windows") {
                    h.join("AppData/Roaming")
                } else {
                    h.join(".local/share")
                }
            })
        })
        .map(|d| d.join(APP_DIR_NAME))
        .ok_or_else(|| Error::Config("could not determine platform data directory".into()))
}
