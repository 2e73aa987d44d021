//! Remote storage service reached over HTTP
//!
//! Chunks are written with `PUT {base}/chunks/{path}` and read back with
//! ranged `GET` requests against the same URL, where `base` is
//! `{scheme}://{address}:{port}/{endpoint}/{api_version}`.

use super::{new_chunk_path, ReadSeek, Transport, REDACTED};
use crate::error::{Result, StoreError};
use reqwest::blocking::{Body, Client, RequestBuilder, Response};
use reqwest::header::RANGE;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::io::{self, Read, Seek, SeekFrom};
use std::time::Duration;

fn default_api_port() -> u16 {
    80
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiParams {
    pub address: String,
    #[serde(default = "default_api_port")]
    pub port: u16,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub tls: bool,
}

impl ApiParams {
    pub fn hide_credentials(&self) -> Self {
        let mut masked = self.clone();
        if !masked.password.is_empty() {
            masked.password = REDACTED.to_string();
        }
        masked
    }

    pub fn base_url(&self) -> String {
        let scheme = if self.tls { "https" } else { "http" };
        let mut url = format!("{}://{}:{}", scheme, self.address, self.port);
        for segment in [&self.endpoint, &self.api_version] {
            let segment = segment.trim_matches('/');
            if !segment.is_empty() {
                url.push('/');
                url.push_str(segment);
            }
        }
        url
    }

    fn chunk_url(&self, path: &str) -> String {
        format!("{}/chunks/{}", self.base_url(), path)
    }
}

/// Cloneable request context shared by the transport and its readers.
#[derive(Clone)]
struct ApiClient {
    client: Client,
    params: ApiParams,
}

impl ApiClient {
    fn new(params: ApiParams, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, params })
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        if self.params.user.is_empty() {
            req
        } else {
            req.basic_auth(&self.params.user, Some(&self.params.password))
        }
    }
}

/// Blocking HTTP transport. The `reqwest` client is built per call so the
/// transport can be created from async code and used on blocking threads.
pub struct HttpTransport {
    params: ApiParams,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(params: ApiParams, timeout: Duration) -> Self {
        Self { params, timeout }
    }

    fn client(&self) -> Result<ApiClient> {
        ApiClient::new(self.params.clone(), self.timeout)
    }
}

impl Transport for HttpTransport {
    fn probe(&self) -> Result<()> {
        let api = self.client()?;
        api.authorize(api.client.get(self.params.base_url()))
            .send()?
            .error_for_status()?;
        Ok(())
    }

    fn store_chunk(
        &self,
        mut source: Box<dyn ReadSeek>,
        start: u64,
        length: u64,
    ) -> Result<String> {
        let api = self.client()?;
        let relative = new_chunk_path();

        source.seek(SeekFrom::Start(start))?;
        let body = Body::sized(source.take(length), length);
        api.authorize(api.client.put(self.params.chunk_url(&relative)))
            .body(body)
            .send()?
            .error_for_status()?;

        Ok(relative)
    }

    fn open_for_read(&self, path: &str) -> Result<Box<dyn ReadSeek>> {
        let api = self.client()?;
        let url = self.params.chunk_url(path);
        let mut reader = RangedReader {
            api,
            url,
            pos: 0,
            len: None,
            response: None,
        };
        // Surface connection and missing-chunk errors at open time
        reader.connect().map_err(StoreError::from)?;
        Ok(Box::new(reader))
    }
}

/// Seekable view of a remote chunk. A seek drops the current response and
/// the next read issues `GET` with `Range: bytes={pos}-`.
struct RangedReader {
    api: ApiClient,
    url: String,
    pos: u64,
    len: Option<u64>,
    response: Option<Response>,
}

fn to_io(err: reqwest::Error) -> io::Error {
    io::Error::new(io::ErrorKind::Other, err)
}

impl RangedReader {
    /// Open a response positioned at `self.pos`. `Ok(false)` means the
    /// position is at or past the end.
    fn connect(&mut self) -> io::Result<bool> {
        let mut req = self.api.authorize(self.api.client.get(&self.url));
        if self.pos > 0 {
            req = req.header(RANGE, format!("bytes={}-", self.pos));
        }
        let resp = req.send().map_err(to_io)?;

        match resp.status() {
            StatusCode::RANGE_NOT_SATISFIABLE => Ok(false),
            StatusCode::PARTIAL_CONTENT => {
                self.response = Some(resp);
                Ok(true)
            }
            status if status.is_success() => {
                if self.len.is_none() {
                    self.len = resp.content_length();
                }
                let mut resp = resp;
                // Server ignored the range; skip ahead ourselves
                if self.pos > 0 {
                    let skipped = io::copy(&mut (&mut resp).take(self.pos), &mut io::sink())?;
                    if skipped < self.pos {
                        return Ok(false);
                    }
                }
                self.response = Some(resp);
                Ok(true)
            }
            StatusCode::NOT_FOUND => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} not found", self.url),
            )),
            status => Err(io::Error::new(
                io::ErrorKind::Other,
                format!("GET {} returned {}", self.url, status),
            )),
        }
    }

    fn remote_len(&mut self) -> io::Result<u64> {
        if let Some(len) = self.len {
            return Ok(len);
        }
        let resp = self
            .api
            .authorize(self.api.client.head(&self.url))
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(to_io)?;
        let len = resp
            .content_length()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Unsupported, "length unknown"))?;
        self.len = Some(len);
        Ok(len)
    }
}

impl Read for RangedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.response.is_none() && !self.connect()? {
            return Ok(0);
        }
        let n = match self.response.as_mut() {
            Some(resp) => resp.read(buf)?,
            None => 0,
        };
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for RangedReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(p) => Some(p),
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
            SeekFrom::End(delta) => self.remote_len()?.checked_add_signed(delta),
        }
        .ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek to a negative position")
        })?;

        if target != self.pos {
            self.response = None;
            self.pos = target;
        }
        Ok(self.pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ApiParams {
        ApiParams {
            address: "10.1.2.3".into(),
            port: 9000,
            endpoint: "/storage/".into(),
            api_version: "v2".into(),
            user: "gw".into(),
            password: "pw".into(),
            tls: false,
        }
    }

    #[test]
    fn test_base_url() {
        assert_eq!(params().base_url(), "http://10.1.2.3:9000/storage/v2");

        let bare = ApiParams {
            endpoint: String::new(),
            api_version: String::new(),
            tls: true,
            ..params()
        };
        assert_eq!(bare.base_url(), "https://10.1.2.3:9000");
        assert_eq!(
            bare.chunk_url("2024/01/02/03/abc"),
            "https://10.1.2.3:9000/chunks/2024/01/02/03/abc"
        );
    }

    #[test]
    fn test_defaults() {
        let parsed: ApiParams = serde_json::from_str(r#"{"address":"host"}"#).unwrap();
        assert_eq!(parsed.port, 80);
        assert!(parsed.user.is_empty());
        assert!(!parsed.tls);
    }
}
