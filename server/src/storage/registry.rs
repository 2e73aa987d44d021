//! Backend registry
//!
//! Registration persists a backend with `unknown` health and probes it once
//! in the background. The result of that probe decides whether the backend
//! takes part in placement.

use super::transport::{ApiParams, ConnectionParams, LocalParams, SshParams, Transport};
use crate::db::{self, Backend, BackendKind, BackendStatus, DbPool};
use crate::error::{Result, StoreError};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

fn default_ssh_port() -> u16 {
    22
}

/// Body of `POST /file_server/add/ssh`. The private key is given inline or
/// read from `key_file` on the gateway host.
#[derive(Debug, Deserialize)]
pub struct AddSshBackend {
    pub name: String,
    #[serde(alias = "address")]
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub base_path: String,
    pub user: String,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub key_file: Option<String>,
    pub total_space: i64,
}

#[derive(Debug, Deserialize)]
pub struct AddApiBackend {
    pub name: String,
    #[serde(flatten)]
    pub params: ApiParams,
    pub total_space: i64,
}

#[derive(Debug, Deserialize)]
pub struct AddLocalBackend {
    pub name: String,
    pub base_path: String,
    pub total_space: i64,
}

/// Validated registration request.
#[derive(Debug, Clone)]
pub struct Registration {
    pub name: String,
    pub params: ConnectionParams,
    pub total_space: i64,
}

impl Registration {
    /// Decode a registration body for the given kind.
    pub async fn parse(kind: BackendKind, body: serde_json::Value) -> Result<Self> {
        let bad = |e: serde_json::Error| StoreError::InvalidArgument(e.to_string());

        let (name, params, total_space) = match kind {
            BackendKind::Ssh => {
                let req: AddSshBackend = serde_json::from_value(body).map_err(bad)?;
                let key = match (req.key, req.key_file) {
                    (Some(key), _) if !key.is_empty() => key,
                    (_, Some(path)) => tokio::fs::read_to_string(&path).await.map_err(|e| {
                        StoreError::InvalidArgument(format!("key_file {}: {}", path, e))
                    })?,
                    _ => {
                        return Err(StoreError::InvalidArgument(
                            "either key or key_file is required".into(),
                        ))
                    }
                };
                let params = ConnectionParams::Ssh(SshParams {
                    host: req.host,
                    port: req.port,
                    base_path: req.base_path,
                    user: req.user,
                    key,
                });
                (req.name, params, req.total_space)
            }
            BackendKind::Api => {
                let req: AddApiBackend = serde_json::from_value(body).map_err(bad)?;
                (req.name, ConnectionParams::Api(req.params), req.total_space)
            }
            BackendKind::Local => {
                let req: AddLocalBackend = serde_json::from_value(body).map_err(bad)?;
                let params = ConnectionParams::Local(LocalParams {
                    base_path: req.base_path,
                });
                (req.name, params, req.total_space)
            }
        };

        if total_space < 0 {
            return Err(StoreError::InvalidArgument(format!(
                "total_space must not be negative, got {}",
                total_space
            )));
        }

        Ok(Registration {
            name,
            params,
            total_space,
        })
    }
}

#[derive(Clone)]
pub struct BackendRegistry {
    db: DbPool,
    probe_timeout: Duration,
    io_timeout: Duration,
}

impl BackendRegistry {
    pub fn new(db: DbPool, probe_timeout: Duration, io_timeout: Duration) -> Self {
        Self {
            db,
            probe_timeout,
            io_timeout,
        }
    }

    /// Persist the backend and schedule its health probe.
    pub async fn register(&self, registration: Registration) -> Result<Backend> {
        let backend = db::backends::create_backend(
            &self.db,
            &registration.name,
            &registration.params,
            registration.total_space,
        )
        .await?;

        tracing::info!(
            backend_id = %backend.id,
            kind = %backend.kind,
            total_space = backend.total_space,
            "registered file server"
        );

        let registry = self.clone();
        let probed = backend.clone();
        tokio::spawn(async move {
            registry.probe(&probed).await;
        });

        Ok(backend)
    }

    /// Probe a backend and record the outcome. Never retried.
    pub async fn probe(&self, backend: &Backend) -> BackendStatus {
        let transport = backend.params.transport(self.probe_timeout);
        let outcome =
            tokio::time::timeout(self.probe_timeout, tokio::task::spawn_blocking(move || {
                transport.probe()
            }))
            .await;

        let status = match outcome {
            Ok(Ok(Ok(()))) => BackendStatus::Ok,
            Ok(Ok(Err(e))) => {
                tracing::warn!(backend_id = %backend.id, "probe failed: {}", e);
                BackendStatus::Fail
            }
            Ok(Err(e)) => {
                tracing::error!(backend_id = %backend.id, "probe task failed: {}", e);
                BackendStatus::Fail
            }
            Err(_) => {
                tracing::warn!(
                    backend_id = %backend.id,
                    timeout = ?self.probe_timeout,
                    "probe timed out"
                );
                BackendStatus::Fail
            }
        };

        if let Err(e) = db::backends::update_status(&self.db, &backend.id, status).await {
            tracing::error!(backend_id = %backend.id, "failed to record probe result: {}", e);
        } else {
            tracing::info!(backend_id = %backend.id, status = ?status, "file server probed");
        }
        status
    }

    pub async fn get(&self, id: &str) -> Result<Backend> {
        db::backends::get_backend(&self.db, id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("file server {}", id)))
    }

    pub async fn list(&self) -> Result<Vec<Backend>> {
        db::backends::list_backends(&self.db).await
    }

    /// Transport for moving chunk data to and from a backend.
    pub fn transport(&self, backend: &Backend) -> Arc<dyn Transport> {
        backend.params.transport(self.io_timeout)
    }
}
