//! SSH/SFTP backend
//!
//! Each operation opens its own session. Reads hold the session for the
//! lifetime of the returned reader.

use super::{copy_range, new_chunk_path, ReadSeek, Transport, REDACTED};
use crate::error::{Result, StoreError};
use serde::{Deserialize, Serialize};
use ssh2::{File as RemoteFile, Session, Sftp};
use std::io::{self, BufWriter, Read, Seek, SeekFrom};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

fn default_ssh_port() -> u16 {
    22
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshParams {
    #[serde(alias = "address")]
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub base_path: String,
    pub user: String,
    /// PEM-encoded private key
    pub key: String,
}

impl SshParams {
    pub fn hide_credentials(&self) -> Self {
        let mut masked = self.clone();
        if !masked.key.is_empty() {
            masked.key = REDACTED.to_string();
        }
        masked
    }
}

pub struct SftpTransport {
    params: SshParams,
    timeout: Duration,
}

impl SftpTransport {
    pub fn new(params: SshParams, timeout: Duration) -> Self {
        Self { params, timeout }
    }

    fn connect(&self) -> Result<(Session, Sftp)> {
        let addr = (self.params.host.as_str(), self.params.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                StoreError::TransportFailure(format!("cannot resolve {}", self.params.host))
            })?;

        let tcp = TcpStream::connect_timeout(&addr, self.timeout)?;
        let mut session = Session::new()?;
        session.set_timeout(self.timeout.as_millis().min(u32::MAX as u128) as u32);
        session.set_tcp_stream(tcp);
        session.handshake()?;
        session.userauth_pubkey_memory(&self.params.user, None, &self.params.key, None)?;
        if !session.authenticated() {
            return Err(StoreError::TransportFailure(format!(
                "ssh authentication rejected for {}@{}",
                self.params.user, self.params.host
            )));
        }

        let sftp = session.sftp()?;
        Ok((session, sftp))
    }

    fn remote_path(&self, relative: &str) -> PathBuf {
        Path::new(&self.params.base_path).join(relative)
    }
}

/// Create `dir` and any missing parents on the remote side.
fn mkdir_all(sftp: &Sftp, dir: &Path) -> Result<()> {
    let mut current = PathBuf::new();
    for component in dir.components() {
        current.push(component);
        if sftp.stat(&current).is_err() {
            sftp.mkdir(&current, 0o755)?;
        }
    }
    Ok(())
}

impl Transport for SftpTransport {
    fn probe(&self) -> Result<()> {
        let (_session, sftp) = self.connect()?;
        let stat = sftp.stat(Path::new(&self.params.base_path))?;
        if !stat.is_dir() {
            return Err(StoreError::TransportFailure(format!(
                "{} is not a directory",
                self.params.base_path
            )));
        }
        Ok(())
    }

    fn store_chunk(
        &self,
        mut source: Box<dyn ReadSeek>,
        start: u64,
        length: u64,
    ) -> Result<String> {
        let (_session, sftp) = self.connect()?;
        let relative = new_chunk_path();
        let full = self.remote_path(&relative);
        if let Some(parent) = full.parent() {
            mkdir_all(&sftp, parent)?;
        }

        let remote = sftp.create(&full)?;
        let mut writer = BufWriter::new(remote);
        if let Err(e) = copy_range(&mut *source, start, length, &mut writer) {
            drop(writer);
            let _ = sftp.unlink(&full);
            return Err(e);
        }
        writer.into_inner().map_err(|e| e.into_error())?;

        Ok(relative)
    }

    fn open_for_read(&self, path: &str) -> Result<Box<dyn ReadSeek>> {
        let (session, sftp) = self.connect()?;
        let file = sftp.open(&self.remote_path(path))?;
        Ok(Box::new(SftpReader {
            file,
            _sftp: sftp,
            _session: session,
        }))
    }
}

/// Remote file kept alive together with its channel and session.
/// Field order matters: the file is dropped before the session.
struct SftpReader {
    file: RemoteFile,
    _sftp: Sftp,
    _session: Session,
}

impl Read for SftpReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Seek for SftpReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file.seek(pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_accept_address_alias() {
        let params: SshParams = serde_json::from_str(
            r#"{"address":"10.0.0.9","base_path":"/srv","user":"stow","key":"k"}"#,
        )
        .unwrap();
        assert_eq!(params.host, "10.0.0.9");
        assert_eq!(params.port, 22);
    }

    #[test]
    fn test_unreachable_host_fails_probe() {
        let t = SftpTransport::new(
            SshParams {
                host: "127.0.0.1".into(),
                port: 1,
                base_path: "/".into(),
                user: "nobody".into(),
                key: String::new(),
            },
            Duration::from_millis(500),
        );
        assert!(t.probe().is_err());
    }
}
