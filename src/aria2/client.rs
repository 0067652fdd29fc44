use crate::aria2::types::{DownloadStatus, Gid};
use crate::{Error, Result};
use aria2_ws::TaskOptions;
use serde_json::Value;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Upper bound for one RPC round trip, connecting included
pub const RPC_TIMEOUT: Duration = Duration::from_secs(10);

/// Keys requested from `tellStatus`; everything else aria2 knows is skipped
const STATUS_KEYS: [&str; 6] = [
    "gid",
    "status",
    "totalLength",
    "completedLength",
    "downloadSpeed",
    "errorMessage",
];

/// Websocket endpoint of a local aria2c
pub fn rpc_url(port: u16) -> String {
    format!("ws://127.0.0.1:{}/jsonrpc", port)
}

/// Handle to a running daemon. Cloning shares the underlying websocket.
#[derive(Clone)]
pub struct Aria2Client {
    inner: Arc<aria2_ws::Client>,
    timeout: Duration,
}

impl Aria2Client {
    pub async fn connect(port: u16, secret: Option<&str>) -> Result<Self> {
        Self::connect_with_timeout(port, secret, RPC_TIMEOUT).await
    }

    /// Like `connect`, with every later call bounded by `timeout`
    pub async fn connect_with_timeout(
        port: u16,
        secret: Option<&str>,
        timeout: Duration,
    ) -> Result<Self> {
        let url = rpc_url(port);
        let inner = tokio::time::timeout(timeout, aria2_ws::Client::connect(&url, secret))
            .await
            .map_err(|_| {
                Error::Aria2Connection(format!("Timed out connecting to aria2 at {}", url))
            })?
            .map_err(|e| {
                Error::Aria2Connection(format!("Failed to connect to aria2 at {}: {}", url, e))
            })?;

        Ok(Self {
            inner: Arc::new(inner),
            timeout,
        })
    }

    /// Run one library call, giving up once the daemon stops answering
    async fn timed<T, F>(&self, method: &str, call: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, aria2_ws::Error>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(Error::Aria2Connection(format!(
                "aria2.{} got no reply within {:?}",
                method, self.timeout
            ))),
        }
    }

    /// Queue one URI. `dir` overrides the daemon's default download directory.
    pub async fn add_uri(&self, uri: &str, dir: Option<&Path>) -> Result<Gid> {
        let options = TaskOptions {
            dir: dir.map(|d| d.to_string_lossy().to_string()),
            ..Default::default()
        };
        let gid = self
            .timed(
                "addUri",
                self.inner
                    .add_uri(vec![uri.to_string()], Some(options), None, None),
            )
            .await?;
        Ok(Gid::from_aria2(gid))
    }

    pub async fn tell_status(&self, gid: &Gid) -> Result<DownloadStatus> {
        let keys = STATUS_KEYS.iter().map(|k| k.to_string()).collect();
        let fields = self
            .timed(
                "tellStatus",
                self.inner.custom_tell_status(gid.as_str(), Some(keys)),
            )
            .await?;
        Ok(serde_json::from_value(Value::Object(fields))?)
    }

    pub async fn pause(&self, gid: &Gid) -> Result<()> {
        self.timed("pause", self.inner.pause(gid.as_str())).await?;
        Ok(())
    }

    pub async fn unpause(&self, gid: &Gid) -> Result<()> {
        self.timed("unpause", self.inner.unpause(gid.as_str())).await?;
        Ok(())
    }

    pub async fn remove(&self, gid: &Gid) -> Result<()> {
        self.timed("remove", self.inner.remove(gid.as_str())).await?;
        Ok(())
    }

    pub async fn force_remove(&self, gid: &Gid) -> Result<()> {
        self.timed("forceRemove", self.inner.force_remove(gid.as_str()))
            .await?;
        Ok(())
    }

    /// Cheapest round trip aria2 offers; used as a liveness check
    pub async fn ping(&self) -> Result<()> {
        self.timed("getVersion", self.inner.get_version()).await?;
        Ok(())
    }

    pub async fn save_session(&self) -> Result<()> {
        self.timed("saveSession", self.inner.save_session()).await?;
        Ok(())
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.timed("shutdown", self.inner.shutdown()).await?;
        Ok(())
    }
}
