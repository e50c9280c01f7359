//! Dynamic reverse-proxy configuration plane (C8).
//!
//! Emits one declarative route document per user: routers, services, and
//! the auth-check middleware binding path prefixes to the user's workload.
//! The host backend materializes the document as a YAML file under a
//! watched directory (`student-<username>.yaml`); the cluster backend
//! would emit the equivalent objects labelled `hydra.owner=<username>` in
//! the student namespace. Both share the same in-memory document shape so
//! route add/remove logic in the container service does not need to know
//! which backend is active.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Errors writing or reading the proxy's dynamic configuration.
#[derive(Debug, thiserror::Error)]
pub enum ProxyConfigError {
    #[error("failed to serialize route document for '{username}': {reason}")]
    Serialize { username: String, reason: String },

    #[error("failed to write route document for '{username}': {reason}")]
    Write { username: String, reason: String },

    #[error("failed to remove route document for '{username}': {reason}")]
    Remove { username: String, reason: String },
}

/// One path-prefix-bound router entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteEntry {
    pub endpoint: String,
    pub path_prefix: String,
    pub service_port: u16,
    /// Non-notebook endpoints have their path prefix stripped before
    /// reaching the workload; the notebook endpoint expects the prefix.
    pub strip_prefix: bool,
}

/// The full declarative route document for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteDocument {
    pub username: String,
    pub service_host: String,
    pub routes: Vec<RouteEntry>,
    pub auth_check_url: String,
}

impl RouteDocument {
    /// Build the default document for a freshly provisioned container:
    /// one router for the editor, one for the notebook.
    #[must_use]
    pub fn defaults(username: &str, service_host: &str, auth_check_url: &str) -> Self {
        Self {
            username: username.to_owned(),
            service_host: service_host.to_owned(),
            auth_check_url: auth_check_url.to_owned(),
            routes: vec![
                RouteEntry {
                    endpoint: "vscode".to_owned(),
                    path_prefix: format!("/students/{username}/vscode"),
                    service_port: crate::catalog::P_EDITOR,
                    strip_prefix: true,
                },
                RouteEntry {
                    endpoint: "jupyter".to_owned(),
                    path_prefix: format!("/students/{username}/jupyter"),
                    service_port: crate::catalog::P_NOTEBOOK,
                    strip_prefix: false,
                },
            ],
        }
    }

    /// Add a user-registered route. The caller is responsible for having
    /// rejected reserved endpoint names and ports before calling this.
    pub fn add_route(&mut self, endpoint: &str, port: u16) {
        self.routes.retain(|r| r.endpoint != endpoint);
        self.routes.push(RouteEntry {
            endpoint: endpoint.to_owned(),
            path_prefix: format!("/students/{}/{endpoint}", self.username),
            service_port: port,
            strip_prefix: true,
        });
    }

    /// Remove a previously registered route by endpoint name. A no-op if
    /// the endpoint was never registered.
    pub fn remove_route(&mut self, endpoint: &str) {
        self.routes.retain(|r| r.endpoint != endpoint);
    }
}

/// Writes `RouteDocument`s as YAML files the external proxy watches.
pub struct HostProxyWriter {
    root: PathBuf,
}

impl HostProxyWriter {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn doc_path(&self, username: &str) -> PathBuf {
        self.root.join(format!("student-{username}.yaml"))
    }

    /// Rewrite the whole document for `username` atomically.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyConfigError`] if serialization or the write fails.
    pub async fn write(&self, doc: &RouteDocument) -> Result<(), ProxyConfigError> {
        fs::create_dir_all(&self.root)
            .await
            .map_err(|e| ProxyConfigError::Write { username: doc.username.clone(), reason: e.to_string() })?;

        let yaml = serde_yaml::to_string(doc)
            .map_err(|e| ProxyConfigError::Serialize { username: doc.username.clone(), reason: e.to_string() })?;

        let path = self.doc_path(&doc.username);
        Self::atomic_write(&path, &yaml)
            .await
            .map_err(|reason| ProxyConfigError::Write { username: doc.username.clone(), reason })
    }

    async fn atomic_write(path: &Path, contents: &str) -> Result<(), String> {
        let tmp_path = path.with_extension("yaml.tmp");
        let mut file = fs::File::create(&tmp_path).await.map_err(|e| e.to_string())?;
        file.write_all(contents.as_bytes()).await.map_err(|e| e.to_string())?;
        fs::rename(&tmp_path, path).await.map_err(|e| e.to_string())
    }

    /// Read back a previously written document (used by tests and by
    /// route add/remove to load-modify-save).
    ///
    /// # Errors
    ///
    /// Returns [`ProxyConfigError`] if the file is missing or malformed.
    pub async fn read(&self, username: &str) -> Result<RouteDocument, ProxyConfigError> {
        let contents = fs::read_to_string(self.doc_path(username))
            .await
            .map_err(|e| ProxyConfigError::Write { username: username.to_owned(), reason: e.to_string() })?;
        serde_yaml::from_str(&contents)
            .map_err(|e| ProxyConfigError::Serialize { username: username.to_owned(), reason: e.to_string() })
    }

    /// Remove a user's route document entirely (on destroy/wipe).
    ///
    /// # Errors
    ///
    /// Returns [`ProxyConfigError`] if removal fails for a reason other
    /// than the file already being absent.
    pub async fn remove(&self, username: &str) -> Result<(), ProxyConfigError> {
        match fs::remove_file(self.doc_path(username)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ProxyConfigError::Remove { username: username.to_owned(), reason: e.to_string() }),
        }
    }
}
