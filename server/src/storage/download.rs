//! Opening stored items for reading.

use super::reassembler::{Opener, Part, Reassembler};
use super::registry::BackendRegistry;
use crate::db::{self, Backend, DbPool, Item, ItemStatus};
use crate::error::{Result, StoreError};
use std::collections::HashMap;
use std::io::{self, Read, Seek, SeekFrom};
use tokio::sync::mpsc;

/// Bytes handed to the response body per read.
const READ_BUFFER: usize = 64 * 1024;

/// Look up an item and build a reader over its chunks.
///
/// Only `ok` items can be read, and their chunk rows must match the recorded
/// chunk count and tile the item without gaps.
pub async fn open_item(
    pool: &DbPool,
    registry: &BackendRegistry,
    item_id: &str,
) -> Result<(Item, Reassembler)> {
    let item = db::items::get_item(pool, item_id)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("item {}", item_id)))?;

    if item.status != ItemStatus::Ok {
        return Err(StoreError::WrongStatus(item.status.to_string()));
    }

    let chunks = db::chunks::list_item_chunks(pool, &item.id).await?;
    if chunks.len() as i64 != item.chunk_count {
        return Err(StoreError::InconsistentChunkLayout(format!(
            "item {} expects {} chunks, found {}",
            item.id,
            item.chunk_count,
            chunks.len()
        )));
    }

    let mut backends: HashMap<String, Backend> = HashMap::new();
    let mut parts = Vec::with_capacity(chunks.len());
    let mut start = 0u64;

    for (i, chunk) in chunks.into_iter().enumerate() {
        if chunk.position != i as i64 || chunk.size < 0 {
            return Err(StoreError::InconsistentChunkLayout(format!(
                "item {} has chunk at position {} where {} was expected",
                item.id, chunk.position, i
            )));
        }

        if !backends.contains_key(&chunk.file_server_id) {
            let backend = registry.get(&chunk.file_server_id).await?;
            backends.insert(backend.id.clone(), backend);
        }
        let transport = match backends.get(&chunk.file_server_id) {
            Some(backend) => registry.transport(backend),
            None => return Err(StoreError::NotFound(format!("file server {}", chunk.file_server_id))),
        };

        let path = chunk.file_path;
        let open: Opener = Box::new(move || transport.open_for_read(&path).map_err(io::Error::from));
        let len = chunk.size as u64;
        parts.push(Part::new(start, len, open));
        start += len;
    }

    let reader = Reassembler::new(parts, item.size.max(0) as u64)?;
    Ok((item, reader))
}

/// Pump `len` bytes starting at `offset` from `reader` on a blocking thread.
///
/// The stream ends early with an error if a chunk cannot be read, and stops
/// quietly when the receiver is dropped.
pub fn spawn_pump<R>(mut reader: R, offset: u64, len: u64) -> mpsc::Receiver<io::Result<Vec<u8>>>
where
    R: Read + Seek + Send + 'static,
{
    let (tx, rx) = mpsc::channel(4);

    tokio::task::spawn_blocking(move || {
        if let Err(e) = reader.seek(SeekFrom::Start(offset)) {
            let _ = tx.blocking_send(Err(e));
            return;
        }

        let mut remaining = len;
        while remaining > 0 {
            let mut buf = vec![0u8; READ_BUFFER.min(remaining as usize)];
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    buf.truncate(n);
                    remaining -= n as u64;
                    if tx.blocking_send(Ok(buf)).is_err() {
                        return;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::warn!("download aborted: {}", e);
                    let _ = tx.blocking_send(Err(e));
                    return;
                }
            }
        }
    });

    rx
}
