use crate::{AppState, Error, Result};
use std::path::PathBuf;

pub async fn get_download_directory(state: &AppState) -> String {
    state.download_dir().await.to_string_lossy().to_string()
}

/// Switch the download directory. An empty path means the picker was
/// cancelled and the current directory is kept.
pub async fn set_download_directory(state: &AppState, path: String) -> Result<String> {
    if path.trim().is_empty() {
        return Ok(get_download_directory(state).await);
    }

    let dir = PathBuf::from(path.trim());
    let dir = dir.canonicalize().map_err(|_| {
        Error::InvalidInput(format!("Path does not exist or is inaccessible: {}", path))
    })?;
    if !dir.is_dir() {
        return Err(Error::InvalidInput(format!("Not a directory: {}", path)));
    }

    state.set_download_dir(dir.clone()).await?;
    log::info!("Download directory set to {}", dir.display());
    Ok(dir.to_string_lossy().to_string())
}
