//! Even byte-range splitting of items into chunks.

use crate::error::{Result, StoreError};

/// Byte range `[start, end)` of one chunk within an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRange {
    pub position: usize,
    pub start: u64,
    pub end: u64,
}

impl ChunkRange {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Start offsets of `part_count` chunks of roughly equal size.
///
/// An item smaller than `part_count` bytes is not split and yields `[0]`.
/// Otherwise offsets are multiples of `size / part_count`, and the remainder
/// belongs to the last chunk.
pub fn split(size: u64, part_count: usize) -> Result<Vec<u64>> {
    if part_count < 1 {
        return Err(StoreError::InvalidArgument(format!(
            "incorrect parts number: {}",
            part_count
        )));
    }

    let chunk_size = size / part_count as u64;
    if chunk_size == 0 {
        return Ok(vec![0]);
    }

    Ok((0..part_count as u64).map(|i| i * chunk_size).collect())
}

/// Ranges derived from `split`: each ends where the next begins and the last
/// ends at `size`.
pub fn chunk_ranges(size: u64, part_count: usize) -> Result<Vec<ChunkRange>> {
    let offsets = split(size, part_count)?;

    let ranges = offsets
        .iter()
        .enumerate()
        .map(|(position, &start)| ChunkRange {
            position,
            start,
            end: offsets.get(position + 1).copied().unwrap_or(size),
        })
        .collect();

    Ok(ranges)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_tiles(size: u64, ranges: &[ChunkRange]) {
        let mut next = 0;
        for (i, range) in ranges.iter().enumerate() {
            assert_eq!(range.position, i);
            assert_eq!(range.start, next, "gap or overlap before chunk {}", i);
            assert!(range.end >= range.start);
            next = range.end;
        }
        assert_eq!(next, size);
    }

    #[test]
    fn test_even_split() {
        assert_eq!(split(600, 6).unwrap(), vec![0, 100, 200, 300, 400, 500]);
    }

    #[test]
    fn test_remainder_goes_to_last_chunk() {
        let ranges = chunk_ranges(1023, 6).unwrap();
        assert_eq!(ranges.len(), 6);
        assert!(ranges[..5].iter().all(|r| r.len() == 170));
        assert_eq!(ranges[5].len(), 173);
        assert_tiles(1023, &ranges);
    }

    #[test]
    fn test_small_item_not_split() {
        assert_eq!(split(5, 6).unwrap(), vec![0]);
        assert_eq!(split(0, 3).unwrap(), vec![0]);

        let ranges = chunk_ranges(5, 6).unwrap();
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges[0].len(), 5);
    }

    #[test]
    fn test_zero_parts_rejected() {
        assert!(matches!(split(100, 0), Err(StoreError::InvalidArgument(_))));
        assert!(chunk_ranges(100, 0).is_err());
    }

    #[test]
    fn test_offsets_tile_item() {
        for size in [0u64, 1, 2, 5, 6, 7, 99, 1023, 4096, 1_048_576, 1_048_579] {
            for parts in 1..=8 {
                let offsets = split(size, parts).unwrap();
                if size / parts as u64 == 0 {
                    assert_eq!(offsets, vec![0]);
                } else {
                    assert_eq!(offsets.len(), parts);
                }
                assert!(offsets.windows(2).all(|w| w[0] <= w[1]));

                let ranges = chunk_ranges(size, parts).unwrap();
                assert_tiles(size, &ranges);
                if size > 0 {
                    assert!(ranges.iter().all(|r| !r.is_empty()));
                }
            }
        }
    }
}
