use crate::aria2::{DownloadProgressInfo, Gid};
use crate::{AppState, Error, Result};

const MAX_URL_LENGTH: usize = 8192;
const ALLOWED_SCHEMES: [&str; 5] = ["http", "https", "ftp", "sftp", "magnet"];

/// Reject URLs aria2 cannot fetch before bothering the daemon with them
pub fn validate_download_url(url: &str) -> Result<()> {
    let url = url.trim();
    if url.is_empty() {
        return Err(Error::InvalidInput("URL cannot be empty".into()));
    }
    if url.len() > MAX_URL_LENGTH {
        return Err(Error::InvalidInput(format!(
            "URL exceeds maximum length of {} characters",
            MAX_URL_LENGTH
        )));
    }

    let parsed = url::Url::parse(url)
        .map_err(|e| Error::InvalidInput(format!("invalid URL {}: {}", url, e)))?;

    if !ALLOWED_SCHEMES.contains(&parsed.scheme()) {
        return Err(Error::InvalidInput(format!(
            "unsupported URL scheme: {}",
            parsed.scheme()
        )));
    }
    Ok(())
}

/// Queue a URL into the current download directory and hand back its GID
pub async fn download(state: &AppState, url: String) -> Result<Gid> {
    validate_download_url(&url)?;
    log::info!("Starting download for: {}", url);

    let client = state.get_client().await?;
    let dir = state.download_dir().await;
    let gid = client.add_uri(url.trim(), Some(&dir)).await?;

    log::info!("Added download with GID: {}", gid);
    Ok(gid)
}

pub async fn get_download_progress(state: &AppState, gid: String) -> Result<DownloadProgressInfo> {
    let gid = Gid::new(gid)?;
    let client = state.get_client().await?;
    let status = client.tell_status(&gid).await?;
    Ok(DownloadProgressInfo::from(&status))
}

pub async fn pause_download(state: &AppState, gid: String) -> Result<()> {
    let gid = Gid::new(gid)?;
    let client = state.get_client().await?;
    client.pause(&gid).await?;
    log::info!("Paused download: {}", gid);
    Ok(())
}

pub async fn resume_download(state: &AppState, gid: String) -> Result<()> {
    let gid = Gid::new(gid)?;
    let client = state.get_client().await?;
    client.unpause(&gid).await?;
    log::info!("Resumed download: {}", gid);
    Ok(())
}

/// Stop a download and drop it from aria2's queue
pub async fn cancel_download(state: &AppState, gid: String) -> Result<()> {
    let gid = Gid::new(gid)?;
    let client = state.get_client().await?;

    if let Err(e) = client.remove(&gid).await {
        // remove is refused while aria2 is still tearing down connections
        log::debug!("remove {} failed ({}), forcing", gid, e);
        client.force_remove(&gid).await?;
    }

    log::info!("Cancelled download: {}", gid);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{has_dir_option, FakeAria2, Reply, TEST_GID};
    use crate::Settings;
    use serde_json::json;

    #[test]
    fn test_validate_download_url_accepts_supported_schemes() {
        assert!(validate_download_url("https://example.com/file.iso").is_ok());
        assert!(validate_download_url("http://10.0.0.2/share/a.zip").is_ok());
        assert!(validate_download_url("ftp://mirror.example.org/pub/x.tar.gz").is_ok());
        assert!(validate_download_url(
            "magnet:?xt=urn:btih:c12fe1c06bba254a9dc9f519b335aa7c1367a88a"
        )
        .is_ok());
        assert!(validate_download_url("  https://example.com/padded  ").is_ok());
    }

    #[test]
    fn test_validate_download_url_rejects() {
        assert!(validate_download_url("").is_err());
        assert!(validate_download_url("   ").is_err());
        assert!(validate_download_url("file:///etc/passwd").is_err());
        assert!(validate_download_url("not a url").is_err());

        let long = format!("https://example.com/{}", "a".repeat(MAX_URL_LENGTH));
        assert!(validate_download_url(&long).is_err());
    }

    #[tokio::test]
    async fn test_gid_is_checked_before_daemon() {
        let state = AppState::default();
        let err = pause_download(&state, String::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "invalid input: invalid GID");

        let err = get_download_progress(&state, "xyz".into()).await.unwrap_err();
        assert_eq!(err.code(), -7);
    }

    #[tokio::test]
    async fn test_commands_without_daemon() {
        let state = AppState::default();
        let gid = "2089b05ecca3d829".to_string();
        assert!(matches!(
            resume_download(&state, gid.clone()).await,
            Err(Error::Aria2NotRunning)
        ));
        assert!(matches!(
            cancel_download(&state, gid).await,
            Err(Error::Aria2NotRunning)
        ));
        assert!(matches!(
            download(&state, "https://example.com/a".into()).await,
            Err(Error::Aria2NotRunning)
        ));
    }

    async fn state_for(daemon: &FakeAria2, download_dir: &str) -> AppState {
        let settings = Settings {
            download_dir: download_dir.into(),
            ..Settings::default()
        };
        AppState::with_client(settings, daemon.client().await).await
    }

    #[tokio::test]
    async fn test_download_uses_current_directory() {
        let daemon = FakeAria2::acknowledging().await;
        let state = state_for(&daemon, "/srv/orion").await;

        let gid = download(&state, " https://example.com/a.iso ".into())
            .await
            .unwrap();
        assert_eq!(gid.as_str(), TEST_GID);

        let params = daemon.params_of("addUri").unwrap();
        assert_eq!(params[0], json!(["https://example.com/a.iso"]));
        assert!(has_dir_option(&params, "/srv/orion"));
    }

    #[tokio::test]
    async fn test_download_rejection_reports_daemon_message() {
        let daemon = FakeAria2::start(|_, _| Reply::Error {
            code: 1,
            message: "No URI to download.",
        })
        .await;
        let state = state_for(&daemon, "/srv/orion").await;

        let err = download(&state, "https://example.com/a.iso".into())
            .await
            .unwrap_err();
        assert_eq!(err.user_message(), "No URI to download.");
    }

    #[tokio::test]
    async fn test_progress_from_status_reply() {
        let daemon = FakeAria2::start(|_, _| {
            Reply::Result(json!({
                "gid": TEST_GID,
                "status": "active",
                "totalLength": "4000",
                "completedLength": "1000",
                "downloadSpeed": "2048",
            }))
        })
        .await;
        let state = state_for(&daemon, "/srv/orion").await;

        let info = get_download_progress(&state, TEST_GID.into()).await.unwrap();
        assert_eq!(info.progress, 25.0);
        assert_eq!(info.total_size, 4000);
        assert_eq!(info.completed_size, 1000);
        assert_eq!(info.download_speed, 2048.0);
        assert_eq!(info.status, "active");
    }

    #[tokio::test]
    async fn test_pause_and_resume_forward_gid() {
        let daemon = FakeAria2::acknowledging().await;
        let state = state_for(&daemon, "/srv/orion").await;

        pause_download(&state, TEST_GID.into()).await.unwrap();
        resume_download(&state, TEST_GID.into()).await.unwrap();

        assert_eq!(daemon.methods(), vec!["pause", "unpause"]);
    }

    #[tokio::test]
    async fn test_cancel_falls_back_to_force_remove() {
        let daemon = FakeAria2::start(|method, _| match method {
            "remove" => Reply::Error {
                code: 1,
                message: "Active Download not found for GID#2089b05ecca3d829",
            },
            _ => Reply::Result(json!(TEST_GID)),
        })
        .await;
        let state = state_for(&daemon, "/srv/orion").await;

        cancel_download(&state, TEST_GID.into()).await.unwrap();
        assert_eq!(daemon.methods(), vec!["remove", "forceRemove"]);
    }

    #[tokio::test]
    async fn test_cancel_stops_after_plain_remove() {
        let daemon = FakeAria2::acknowledging().await;
        let state = state_for(&daemon, "/srv/orion").await;

        cancel_download(&state, TEST_GID.into()).await.unwrap();
        assert_eq!(daemon.methods(), vec!["remove"]);
    }
}
