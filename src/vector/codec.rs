//! Little-endian helpers shared by the on-disk formats.

use std::path::Path;

use crate::error::{RagError, RagResult};

pub(crate) fn put_u32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

pub(crate) fn put_f32s(buf: &mut Vec<u8>, values: &[f32]) {
    buf.reserve(values.len() * 4);
    for v in values {
        buf.extend_from_slice(&v.to_le_bytes());
    }
}

/// Bounds-checked cursor; every short read is reported as corruption.
pub(crate) struct ByteReader<'a> {
    bytes: &'a [u8],
    offset: usize,
    path: &'a Path,
}

impl<'a> ByteReader<'a> {
    pub(crate) fn new(bytes: &'a [u8], path: &'a Path) -> Self {
        Self {
            bytes,
            offset: 0,
            path,
        }
    }

    pub(crate) fn take(&mut self, len: usize) -> RagResult<&'a [u8]> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| {
                RagError::corrupted(
                    self.path,
                    format!("unexpected end of file at byte {}", self.offset),
                )
            })?;
        let slice = &self.bytes[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    pub(crate) fn u8(&mut self) -> RagResult<u8> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn u32(&mut self) -> RagResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub(crate) fn f32s(&mut self, count: usize) -> RagResult<Vec<f32>> {
        let len = count
            .checked_mul(4)
            .ok_or_else(|| RagError::corrupted(self.path, "length overflow"))?;
        Ok(self
            .take(len)?
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.offset == self.bytes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_read_is_corruption() {
        let mut buf = Vec::new();
        put_u32(&mut buf, 7);
        put_f32s(&mut buf, &[1.5, -2.0]);

        let path = Path::new("test.bin");
        let mut reader = ByteReader::new(&buf, path);
        assert_eq!(reader.u32().unwrap(), 7);
        assert_eq!(reader.f32s(2).unwrap(), vec![1.5, -2.0]);
        assert!(reader.is_empty());
        assert!(matches!(reader.u8(), Err(RagError::Corrupted { .. })));
    }
}
