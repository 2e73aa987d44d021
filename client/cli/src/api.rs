use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

pub struct ApiClient {
    base_url: String,
    client: reqwest::Client,
}

// --- Items ---

#[derive(Debug, Clone, Deserialize)]
pub struct Item {
    pub id: String,
    pub name: String,
    pub size: i64,
    pub container_id: String,
    pub chunk_count: i64,
    pub status: String,
    pub created: String,
    pub modified: String,
}

impl Item {
    pub fn is_settled(&self) -> bool {
        self.status != "pending"
    }
}

#[derive(Debug, Deserialize)]
pub struct CancelResponse {
    pub id: String,
    pub cancelled: bool,
}

/// Result of streaming a download to disk.
#[derive(Debug)]
pub struct Downloaded {
    pub bytes: u64,
    pub sha256: String,
}

// --- File servers ---

#[derive(Debug, Clone, Deserialize)]
pub struct Backend {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub params: serde_json::Value,
    pub total_space: i64,
    pub used_space: i64,
    pub status: String,
}

// --- Containers ---

#[derive(Debug, Serialize)]
struct CreateContainerRequest<'a> {
    name: &'a str,
    description: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Container {
    pub id: String,
    pub name: String,
    pub description: String,
    pub created: String,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Check response status; on error, read body for detail message.
    async fn ensure_ok(resp: reqwest::Response) -> anyhow::Result<reqwest::Response> {
        if resp.status().is_success() {
            Ok(resp)
        } else {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            let message = serde_json::from_str::<serde_json::Value>(&body)
                .ok()
                .and_then(|v| v["error"].as_str().map(str::to_string))
                .unwrap_or(body);
            tracing::debug!(%status, "request rejected: {}", message);
            anyhow::bail!("API error ({}): {}", status, message)
        }
    }

    /// Upload a file, streaming it from disk.
    pub async fn store_item(&self, path: &Path, container_id: &str) -> anyhow::Result<Item> {
        let file = tokio::fs::File::open(path).await?;
        let len = file.metadata().await?.len();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "item".to_string());

        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
        let part = reqwest::multipart::Part::stream_with_length(body, len)
            .file_name(name)
            .mime_str("application/octet-stream")?;
        self.store_part(part, container_id).await
    }

    /// Upload an in-memory payload under the given name.
    pub async fn store_bytes(
        &self,
        name: &str,
        data: Vec<u8>,
        container_id: &str,
    ) -> anyhow::Result<Item> {
        let part = reqwest::multipart::Part::bytes(data)
            .file_name(name.to_string())
            .mime_str("application/octet-stream")?;
        self.store_part(part, container_id).await
    }

    async fn store_part(
        &self,
        part: reqwest::multipart::Part,
        container_id: &str,
    ) -> anyhow::Result<Item> {
        tracing::debug!(base_url = %self.base_url, container_id, "uploading item");
        let form = reqwest::multipart::Form::new()
            .text("container_id", container_id.to_string())
            .part("item", part);
        let resp = self
            .client
            .post(format!("{}/item/store", self.base_url))
            .multipart(form)
            .send()
            .await?;
        Ok(Self::ensure_ok(resp).await?.json().await?)
    }

    pub async fn get_item(&self, id: &str) -> anyhow::Result<Item> {
        let resp = self
            .client
            .get(format!("{}/item/{}", self.base_url, id))
            .send()
            .await?;
        Ok(Self::ensure_ok(resp).await?.json().await?)
    }

    pub async fn cancel_item(&self, id: &str) -> anyhow::Result<CancelResponse> {
        let resp = self
            .client
            .post(format!("{}/item/{}/cancel", self.base_url, id))
            .send()
            .await?;
        Ok(Self::ensure_ok(resp).await?.json().await?)
    }

    /// Poll until the item leaves `pending`.
    pub async fn wait_for_item(
        &self,
        id: &str,
        interval: std::time::Duration,
        timeout: std::time::Duration,
    ) -> anyhow::Result<Item> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let item = self.get_item(id).await?;
            if item.is_settled() {
                return Ok(item);
            }
            tracing::trace!(item_id = id, "item still pending");
            if tokio::time::Instant::now() >= deadline {
                anyhow::bail!("item {} still pending after {:?}", id, timeout);
            }
            tokio::time::sleep(interval).await;
        }
    }

    /// Stream an item (or a byte range of it) into `out`, hashing as it goes.
    pub async fn download_item<W>(
        &self,
        id: &str,
        range: Option<&str>,
        out: &mut W,
    ) -> anyhow::Result<Downloaded>
    where
        W: tokio::io::AsyncWrite + Unpin,
    {
        let mut req = self
            .client
            .get(format!("{}/item/{}/download", self.base_url, id));
        if let Some(range) = range {
            req = req.header(reqwest::header::RANGE, format!("bytes={}", range));
        }
        let mut resp = Self::ensure_ok(req.send().await?).await?;
        tracing::debug!(
            item_id = id,
            status = %resp.status(),
            length = ?resp.content_length(),
            "download started"
        );

        let mut hasher = Sha256::new();
        let mut bytes = 0u64;
        while let Some(block) = resp.chunk().await? {
            hasher.update(&block);
            out.write_all(&block).await?;
            bytes += block.len() as u64;
        }
        out.flush().await?;

        Ok(Downloaded {
            bytes,
            sha256: hex::encode(hasher.finalize()),
        })
    }

    pub async fn add_backend(
        &self,
        kind: &str,
        body: &serde_json::Value,
    ) -> anyhow::Result<Backend> {
        let resp = self
            .client
            .post(format!("{}/file_server/add/{}", self.base_url, kind))
            .json(body)
            .send()
            .await?;
        Ok(Self::ensure_ok(resp).await?.json().await?)
    }

    pub async fn get_backend(&self, id: &str) -> anyhow::Result<Backend> {
        let resp = self
            .client
            .get(format!("{}/file_server/{}", self.base_url, id))
            .send()
            .await?;
        Ok(Self::ensure_ok(resp).await?.json().await?)
    }

    pub async fn list_backends(&self) -> anyhow::Result<Vec<Backend>> {
        let resp = self
            .client
            .get(format!("{}/file_server", self.base_url))
            .send()
            .await?;
        Ok(Self::ensure_ok(resp).await?.json().await?)
    }

    pub async fn create_container(
        &self,
        name: &str,
        description: &str,
    ) -> anyhow::Result<Container> {
        let resp = self
            .client
            .post(format!("{}/container/create", self.base_url))
            .json(&CreateContainerRequest { name, description })
            .send()
            .await?;
        Ok(Self::ensure_ok(resp).await?.json().await?)
    }

    pub async fn list_containers(&self) -> anyhow::Result<Vec<Container>> {
        let resp = self
            .client
            .get(format!("{}/container", self.base_url))
            .send()
            .await?;
        Ok(Self::ensure_ok(resp).await?.json().await?)
    }

    pub async fn list_container_items(&self, id: &str) -> anyhow::Result<Vec<Item>> {
        let resp = self
            .client
            .get(format!("{}/container/{}/items", self.base_url, id))
            .send()
            .await?;
        Ok(Self::ensure_ok(resp).await?.json().await?)
    }
}

/// Hex SHA-256 of a byte slice.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_from_server_json() {
        let item: Item = serde_json::from_str(
            r#"{"id":"0190","name":"a.bin","size":5,"container_id":"123","chunk_count":0,
                "status":"pending","created":"2024-06-01T00:00:00Z","modified":"2024-06-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert!(!item.is_settled());
        assert_eq!(item.container_id, "123");
    }

    #[test]
    fn test_sha256_hex() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
