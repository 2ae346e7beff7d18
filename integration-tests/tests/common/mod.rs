//! Shared test utilities for the HTTP contract tests.
//!
//! Each [`TestServer`] owns a scratch volume root and serves the full router
//! on an ephemeral port.

#![allow(dead_code)]

use anyhow::{Context, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use volumed::api::volumes::VolumeResponse;
use volumed::infrastructure::server;
use volumed::volume::{Filesystem, NaiveDriver, NoopNamespacer, Repository};

/// A running server over a scratch repository.
pub struct TestServer {
    /// Scratch directory holding the volume root and any import trees.
    pub temp_dir: TempDir,
    /// Repository behind the server.
    pub repository: Arc<Repository>,
    /// HTTP client.
    pub client: reqwest::Client,
    base_url: String,
    handle: JoinHandle<()>,
}

impl TestServer {
    /// Starts a server with the naive driver and no namespacing.
    pub async fn start() -> Result<Self> {
        let temp_dir = TempDir::new()?;
        let filesystem = Filesystem::new(Arc::new(NaiveDriver), temp_dir.path().join("volumes"))?;
        let repository = Arc::new(Repository::open(filesystem, Arc::new(NoopNamespacer))?);

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let app = server::app(Arc::clone(&repository));
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Ok(Self {
            temp_dir,
            repository,
            client: reqwest::Client::new(),
            base_url: format!("http://{addr}"),
            handle,
        })
    }

    /// Absolute URL for `path`.
    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Posts a raw JSON body to `/volumes`.
    pub async fn post_volume(&self, body: &Value) -> Result<reqwest::Response> {
        Ok(self
            .client
            .post(self.url("/volumes"))
            .json(body)
            .send()
            .await?)
    }

    /// Creates a volume, failing unless the server answers 201.
    pub async fn create_volume(&self, body: &Value) -> Result<VolumeResponse> {
        let response = self.post_volume(body).await?;
        anyhow::ensure!(
            response.status() == reqwest::StatusCode::CREATED,
            "unexpected status {}",
            response.status()
        );
        Ok(response.json().await?)
    }

    /// Lists volumes, appending `query` verbatim.
    pub async fn list_volumes(&self, query: &str) -> Result<Vec<VolumeResponse>> {
        let response = self
            .client
            .get(self.url(&format!("/volumes{query}")))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    /// Creates a directory tree under the scratch dir for imports.
    pub fn import_tree(&self, name: &str, files: &[(&str, &str)]) -> Result<PathBuf> {
        let root = self.temp_dir.path().join(name);
        for (relative, contents) in files {
            let path = root.join(relative);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, contents)?;
        }
        std::fs::create_dir_all(&root)?;
        Ok(root)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Reads the `properties.json` stored beside a volume's content.
pub fn stored_properties(volume: &VolumeResponse) -> Result<Value> {
    let dir = Path::new(&volume.path)
        .parent()
        .context("volume path has no parent")?;
    let raw = std::fs::read_to_string(dir.join("properties.json"))?;
    Ok(serde_json::from_str(&raw)?)
}

/// The `error` message of a JSON error body.
pub async fn error_message(response: reqwest::Response) -> Result<String> {
    let body: Value = response.json().await?;
    body["error"]
        .as_str()
        .map(str::to_string)
        .context("response has no error field")
}
