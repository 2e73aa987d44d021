//! Placement of uploaded items onto backends
//!
//! An upload creates a `pending` item and returns immediately. A supervised
//! background task then splits the spooled file into chunk ranges and stores
//! each range on a healthy backend that is not already busy with this item:
//!
//! - one coordinator owns all bookkeeping; placement attempts run as separate
//!   tasks and report back through a channel sized to the number of chunks
//! - a failed attempt is re-queued, preferably on another backend, until the
//!   per-chunk attempt limit is reached
//! - each stored chunk is persisted and charged to its backend's used space
//! - the item ends `ok` with its chunk count, or `fail` on any unrecoverable
//!   error, cancellation, timeout or panic
//!
//! Chunks already placed when an item fails are left on their backends.

use super::registry::BackendRegistry;
use super::splitter::{chunk_ranges, ChunkRange};
use crate::db::{self, DbPool, Item, ItemStatus, NewChunk, NewItem};
use crate::error::{Result, StoreError};
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio_util::sync::CancellationToken;

/// Spooled upload content. Every placement attempt reads through its own
/// file handle, so concurrent attempts never share a cursor.
#[derive(Clone)]
pub struct ItemSource {
    file: Arc<NamedTempFile>,
}

impl ItemSource {
    pub fn new(file: NamedTempFile) -> Self {
        Self {
            file: Arc::new(file),
        }
    }

    pub fn open(&self) -> io::Result<File> {
        self.file.reopen()
    }

    pub fn len(&self) -> io::Result<u64> {
        Ok(self.file.as_file().metadata()?.len())
    }

    #[cfg(test)]
    pub fn from_bytes(data: &[u8]) -> io::Result<Self> {
        use std::io::Write;
        let mut file = NamedTempFile::new()?;
        file.write_all(data)?;
        file.flush()?;
        Ok(Self::new(file))
    }
}

#[derive(Debug, Clone)]
pub struct PlacementSettings {
    /// Upper bound on chunks per item
    pub default_part_count: usize,
    pub max_chunk_attempts: u32,
    pub upload_timeout: Duration,
    pub capacity_retry_attempts: u32,
}

impl From<&crate::config::Config> for PlacementSettings {
    fn from(config: &crate::config::Config) -> Self {
        Self {
            default_part_count: config.default_part_count,
            max_chunk_attempts: config.max_chunk_attempts,
            upload_timeout: config.upload_timeout(),
            capacity_retry_attempts: config.capacity_retry_attempts,
        }
    }
}

/// A chunk range travelling between the coordinator and its attempts.
#[derive(Debug)]
struct Job {
    range: ChunkRange,
    attempts: u32,
    /// Backend of the latest attempt
    backend_id: Option<String>,
    /// Backends this chunk already failed on
    failed_on: HashSet<String>,
    /// Set once the chunk is stored
    path: Option<String>,
}

impl Job {
    fn new(range: ChunkRange) -> Self {
        Self {
            range,
            attempts: 0,
            backend_id: None,
            failed_on: HashSet::new(),
            path: None,
        }
    }
}

struct Inner {
    db: DbPool,
    registry: BackendRegistry,
    settings: PlacementSettings,
    tasks: Mutex<HashMap<String, CancellationToken>>,
}

#[derive(Clone)]
pub struct PlacementService {
    inner: Arc<Inner>,
}

impl PlacementService {
    pub fn new(db: DbPool, registry: BackendRegistry, settings: PlacementSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                db,
                registry,
                settings,
                tasks: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Accept an upload: persist a `pending` item and start placing it in the
    /// background.
    pub async fn store_item(
        &self,
        name: &str,
        container_id: &str,
        source: ItemSource,
    ) -> Result<Item> {
        let size = source.len()?;
        let item = db::items::create_item(
            &self.inner.db,
            &NewItem {
                name: name.to_string(),
                container_id: container_id.to_string(),
                size: size as i64,
            },
        )
        .await?;

        tracing::info!(item_id = %item.id, size, "upload accepted");

        let token = CancellationToken::new();
        self.inner
            .tasks
            .lock()
            .await
            .insert(item.id.clone(), token.clone());

        let service = self.clone();
        let item_id = item.id.clone();
        tokio::spawn(async move {
            let worker = {
                let service = service.clone();
                let item_id = item_id.clone();
                tokio::spawn(async move { service.place(&item_id, source, size, token).await })
            };

            // A panic in the worker surfaces here as a join error
            let outcome = match worker.await {
                Ok(outcome) => outcome,
                Err(e) => Err(StoreError::TransportFailure(format!(
                    "placement task aborted: {}",
                    e
                ))),
            };
            service.finish(&item_id, outcome).await;
            service.inner.tasks.lock().await.remove(&item_id);
        });

        Ok(item)
    }

    /// Request cancellation of an in-progress upload.
    pub async fn cancel(&self, item_id: &str) -> bool {
        match self.inner.tasks.lock().await.get(item_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every in-progress upload, used on shutdown.
    pub async fn cancel_all(&self) {
        let tasks = self.inner.tasks.lock().await;
        for token in tasks.values() {
            token.cancel();
        }
        if !tasks.is_empty() {
            tracing::info!(count = tasks.len(), "cancelled in-progress uploads");
        }
    }

    pub async fn in_progress(&self) -> usize {
        self.inner.tasks.lock().await.len()
    }

    async fn finish(&self, item_id: &str, outcome: Result<i64>) {
        let update = match outcome {
            Ok(chunk_count) => {
                tracing::info!(item_id = %item_id, chunk_count, "item stored");
                db::items::update_status(&self.inner.db, item_id, ItemStatus::Ok, Some(chunk_count))
                    .await
            }
            Err(e) => {
                tracing::warn!(item_id = %item_id, "item placement failed: {}", e);
                db::items::update_status(&self.inner.db, item_id, ItemStatus::Fail, None).await
            }
        };
        if let Err(e) = update {
            tracing::error!(item_id = %item_id, "failed to record item status: {}", e);
        }
    }

    /// Coordinator: dispatch every chunk and collect results until all are
    /// stored. Returns the number of chunks.
    async fn place(
        &self,
        item_id: &str,
        source: ItemSource,
        size: u64,
        cancel: CancellationToken,
    ) -> Result<i64> {
        let pool = &self.inner.db;
        let settings = &self.inner.settings;

        let healthy = db::backends::count_healthy(pool).await?.max(0) as usize;
        let part_count = settings.default_part_count.min(healthy);
        if part_count == 0 {
            return Err(StoreError::NotFound("healthy file server".into()));
        }

        let ranges = chunk_ranges(size, part_count)?;
        let total = ranges.len();
        tracing::debug!(item_id = %item_id, chunks = total, "placing item");

        let (tx, mut rx) = mpsc::channel::<Job>(total);
        for range in ranges {
            tx.try_send(Job::new(range))
                .map_err(|e| StoreError::InvalidArgument(format!("queue chunk: {}", e)))?;
        }

        let permits = Arc::new(Semaphore::new(part_count));
        let mut in_flight: HashSet<String> = HashSet::new();
        let mut stored = 0usize;

        let deadline = tokio::time::sleep(settings.upload_timeout);
        tokio::pin!(deadline);

        while stored < total {
            let mut job = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!(item_id = %item_id, stored, "upload cancelled");
                    return Err(StoreError::Cancelled);
                }
                _ = &mut deadline => {
                    tracing::warn!(item_id = %item_id, stored, "upload timed out");
                    return Err(StoreError::Cancelled);
                }
                job = rx.recv() => match job {
                    Some(job) => job,
                    None => return Err(StoreError::Cancelled),
                },
            };

            if let Some(path) = job.path.take() {
                if let Some(backend_id) = &job.backend_id {
                    in_flight.remove(backend_id);
                }
                self.record_chunk(item_id, &job, path).await?;
                stored += 1;
                continue;
            }

            // Unplaced: the backend of the failed attempt is no longer in flight
            if let Some(previous) = job.backend_id.take() {
                in_flight.remove(&previous);
                job.failed_on.insert(previous);
            }
            if job.attempts >= settings.max_chunk_attempts {
                return Err(StoreError::TransportFailure(format!(
                    "chunk {} not placed after {} attempts",
                    job.range.position, job.attempts
                )));
            }

            let backend = choose_backend(pool, &in_flight, &job.failed_on).await?;
            let needed = job.range.len() as i64;
            let available = backend.free_space();
            if available < needed {
                return Err(StoreError::InsufficientCapacity {
                    backend_id: backend.id,
                    needed,
                    available,
                });
            }

            in_flight.insert(backend.id.clone());
            job.attempts += 1;
            job.backend_id = Some(backend.id.clone());

            tracing::debug!(
                item_id = %item_id,
                position = job.range.position,
                backend_id = %backend.id,
                attempt = job.attempts,
                "dispatching chunk"
            );

            let transport = self.inner.registry.transport(&backend);
            let source = source.clone();
            let tx = tx.clone();
            let permits = permits.clone();
            tokio::spawn(async move {
                let _permit = permits.acquire_owned().await;
                let range = job.range;
                let attempt = tokio::task::spawn_blocking(move || -> Result<String> {
                    let file = source.open()?;
                    transport.store_chunk(Box::new(file), range.start, range.len())
                })
                .await;

                match attempt {
                    Ok(Ok(path)) => job.path = Some(path),
                    Ok(Err(e)) => tracing::warn!(
                        position = range.position,
                        backend_id = ?job.backend_id,
                        "chunk attempt failed: {}",
                        e
                    ),
                    Err(e) => tracing::error!(
                        position = range.position,
                        "chunk attempt aborted: {}",
                        e
                    ),
                }
                // The coordinator may be gone after a cancellation
                let _ = tx.send(job).await;
            });
        }

        Ok(total as i64)
    }

    async fn record_chunk(&self, item_id: &str, job: &Job, path: String) -> Result<()> {
        let backend_id = job
            .backend_id
            .clone()
            .ok_or_else(|| StoreError::InvalidArgument("stored chunk without backend".into()))?;
        let size = job.range.len() as i64;

        db::chunks::create_chunk(
            &self.inner.db,
            &NewChunk {
                item_id: item_id.to_string(),
                position: job.range.position as i64,
                file_server_id: backend_id.clone(),
                file_path: path,
                size,
            },
        )
        .await?;

        if let Err(e) = db::backends::update_used_space(
            &self.inner.db,
            &backend_id,
            size,
            self.inner.settings.capacity_retry_attempts,
        )
        .await
        {
            tracing::warn!(backend_id = %backend_id, size, "used space not updated: {}", e);
        }

        Ok(())
    }
}

/// Healthy backend not in flight for this item, preferring one this chunk has
/// not failed on yet.
async fn choose_backend(
    pool: &DbPool,
    in_flight: &HashSet<String>,
    failed_on: &HashSet<String>,
) -> Result<db::Backend> {
    if failed_on.is_empty() {
        return db::backends::choose_excluding(pool, in_flight).await;
    }
    let exclude: HashSet<String> = in_flight.union(failed_on).cloned().collect();
    match db::backends::choose_excluding(pool, &exclude).await {
        Err(StoreError::NotFound(_)) => db::backends::choose_excluding(pool, in_flight).await,
        other => other,
    }
}
