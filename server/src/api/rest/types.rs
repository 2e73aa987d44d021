//! Shared types for REST API
//!
//! Request/response structs that are not database models.

use serde::{Deserialize, Serialize};

// ============================================================================
// ITEMS
// ============================================================================

#[derive(Serialize)]
pub struct CancelResponse {
    pub id: String,
    /// False when no placement was running for the item
    pub cancelled: bool,
}

/// The requested range lies outside the item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unsatisfiable;

/// Inclusive byte range requested by a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Parse a single-range `Range` header against an item of `size` bytes.
    ///
    /// Supports `bytes=a-b`, `bytes=a-` and `bytes=-n`. `Ok(None)` means the
    /// header should be ignored and the whole item served.
    pub fn parse(header: &str, size: u64) -> Result<Option<Self>, Unsatisfiable> {
        let range_set = match header.trim().strip_prefix("bytes=") {
            Some(range_set) if !range_set.contains(',') => range_set.trim(),
            _ => return Ok(None),
        };
        let (first, last) = match range_set.split_once('-') {
            Some(parts) => parts,
            None => return Ok(None),
        };

        let range = match (first.trim(), last.trim()) {
            ("", "") => return Ok(None),
            ("", suffix) => {
                let n: u64 = match suffix.parse() {
                    Ok(n) => n,
                    Err(_) => return Ok(None),
                };
                if n == 0 || size == 0 {
                    return Err(Unsatisfiable);
                }
                ByteRange {
                    start: size.saturating_sub(n),
                    end: size - 1,
                }
            }
            (start, end) => {
                let start: u64 = match start.parse() {
                    Ok(start) => start,
                    Err(_) => return Ok(None),
                };
                let end: u64 = match end {
                    "" => size.saturating_sub(1),
                    end => match end.parse::<u64>() {
                        Ok(end) => end.min(size.saturating_sub(1)),
                        Err(_) => return Ok(None),
                    },
                };
                if start >= size || end < start {
                    return Err(Unsatisfiable);
                }
                ByteRange { start, end }
            }
        };

        Ok(Some(range))
    }
}

// ============================================================================
// CONTAINERS
// ============================================================================

#[derive(Deserialize)]
pub struct ListItemsQuery {
    #[serde(default)]
    pub status: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_forms() {
        assert_eq!(
            ByteRange::parse("bytes=0-9", 100),
            Ok(Some(ByteRange { start: 0, end: 9 }))
        );
        assert_eq!(
            ByteRange::parse("bytes=90-", 100),
            Ok(Some(ByteRange { start: 90, end: 99 }))
        );
        assert_eq!(
            ByteRange::parse("bytes=-10", 100),
            Ok(Some(ByteRange { start: 90, end: 99 }))
        );
        assert_eq!(
            ByteRange::parse("bytes=50-500", 100),
            Ok(Some(ByteRange { start: 50, end: 99 }))
        );
    }

    #[test]
    fn test_range_unsatisfiable() {
        assert_eq!(ByteRange::parse("bytes=100-", 100), Err(Unsatisfiable));
        assert_eq!(ByteRange::parse("bytes=5-2", 100), Err(Unsatisfiable));
        assert_eq!(ByteRange::parse("bytes=0-0", 0), Err(Unsatisfiable));
    }

    #[test]
    fn test_range_ignored() {
        assert_eq!(ByteRange::parse("items=0-1", 100), Ok(None));
        assert_eq!(ByteRange::parse("bytes=0-1,5-6", 100), Ok(None));
        assert_eq!(ByteRange::parse("bytes=x-1", 100), Ok(None));
    }
}
