//! Seekable reader that stitches an item back together from its chunks.
//!
//! At most one chunk stream is open at any time. A chunk is opened lazily on
//! the first read that touches it, and closed once its last byte is consumed
//! or a seek leaves it.

use super::transport::ReadSeek;
use crate::error::{Result, StoreError};
use std::fmt;
use std::io::{self, Read, Seek, SeekFrom};

pub type Opener = Box<dyn Fn() -> io::Result<Box<dyn ReadSeek>> + Send>;

/// One chunk of the logical stream: bytes `[start, start + len)`.
pub struct Part {
    pub start: u64,
    pub len: u64,
    open: Opener,
}

impl Part {
    pub fn new(start: u64, len: u64, open: Opener) -> Self {
        Self { start, len, open }
    }

    fn end(&self) -> u64 {
        self.start + self.len
    }

    fn contains(&self, offset: u64) -> bool {
        self.len > 0 && self.start <= offset && offset < self.end()
    }
}

impl fmt::Debug for Part {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Part")
            .field("start", &self.start)
            .field("len", &self.len)
            .finish()
    }
}

pub struct Reassembler {
    parts: Vec<Part>,
    size: u64,
    offset: u64,
    current: Option<(usize, Box<dyn ReadSeek>)>,
}

impl Reassembler {
    /// Parts must be in order, contiguous from 0, and cover exactly `size`.
    pub fn new(parts: Vec<Part>, size: u64) -> Result<Self> {
        let mut expected = 0u64;
        for (i, part) in parts.iter().enumerate() {
            if part.start != expected {
                return Err(StoreError::InconsistentChunkLayout(format!(
                    "chunk {} starts at {}, expected {}",
                    i, part.start, expected
                )));
            }
            expected = part.end();
        }
        if expected != size {
            return Err(StoreError::InconsistentChunkLayout(format!(
                "chunks cover {} bytes, item has {}",
                expected, size
            )));
        }

        Ok(Self {
            parts,
            size,
            offset: 0,
            current: None,
        })
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn position(&self) -> u64 {
        self.offset
    }

    fn part_at(&self, offset: u64) -> Option<usize> {
        self.parts.iter().position(|p| p.contains(offset))
    }

    /// Stream for part `idx`, opening it at the current offset if needed.
    fn stream_for(&mut self, idx: usize) -> io::Result<&mut Box<dyn ReadSeek>> {
        let open = matches!(&self.current, Some((cur, _)) if *cur == idx);
        if !open {
            // Close the previous chunk before touching the next one
            self.current = None;
            let part = &self.parts[idx];
            let mut stream = (part.open)()?;
            stream.seek(SeekFrom::Start(self.offset - part.start))?;
            self.current = Some((idx, stream));
        }
        match self.current.as_mut() {
            Some((_, stream)) => Ok(stream),
            None => Err(io::Error::new(io::ErrorKind::Other, "chunk stream missing")),
        }
    }

    /// One read from the chunk covering the current offset.
    fn read_part(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let idx = self.part_at(self.offset).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("no chunk covers offset {}", self.offset),
            )
        })?;
        let part_end = self.parts[idx].end();
        let want = ((part_end - self.offset) as usize).min(buf.len());

        let stream = self.stream_for(idx)?;
        let n = stream.read(&mut buf[..want])?;
        if n == 0 {
            self.current = None;
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("chunk {} ended before offset {}", idx, part_end),
            ));
        }

        self.offset += n as u64;
        if self.offset == part_end {
            self.current = None;
        }
        Ok(n)
    }
}

impl Read for Reassembler {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;

        while filled < buf.len() && self.offset < self.size {
            match self.read_part(&mut buf[filled..]) {
                Ok(n) => filled += n,
                // Bytes already copied are returned; the next call fails again
                Err(_) if filled > 0 => break,
                Err(e) => return Err(e),
            }
        }

        Ok(filled)
    }
}

impl Seek for Reassembler {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(p) => p as i128,
            SeekFrom::Current(delta) => self.offset as i128 + delta as i128,
            SeekFrom::End(delta) => self.size as i128 + delta as i128,
        };
        if target < 0 {
            let clamped = target.max(i64::MIN as i128) as i64;
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                StoreError::InvalidOffset(clamped),
            ));
        }
        let target = target as u64;

        let within = matches!(&self.current, Some((idx, _)) if self.parts[*idx].contains(target));
        if within {
            if let Some((idx, stream)) = self.current.as_mut() {
                stream.seek(SeekFrom::Start(target - self.parts[*idx].start))?;
            }
        } else {
            self.current = None;
        }
        self.offset = target;
        Ok(target)
    }
}
