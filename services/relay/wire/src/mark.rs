//! Relay client marks.

use std::fmt;

/// Size of a mark in bytes
pub const MARK_SIZE: usize = 8;

/// Opaque 8-byte identifier a relay client registers under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Mark(pub [u8; MARK_SIZE]);

impl Mark {
    /// Read a mark from exactly 8 bytes
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let raw: [u8; MARK_SIZE] = bytes.try_into().ok()?;
        Some(Self(raw))
    }

    /// Raw mark bytes
    pub fn as_bytes(&self) -> &[u8; MARK_SIZE] {
        &self.0
    }
}

impl From<[u8; MARK_SIZE]> for Mark {
    fn from(raw: [u8; MARK_SIZE]) -> Self {
        Self(raw)
    }
}

impl fmt::Display for Mark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_hex() {
        let mark = Mark([0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0xab]);
        assert_eq!(mark.to_string(), "01020304050607ab");
    }

    #[test]
    fn test_from_slice_requires_exact_size() {
        assert!(Mark::from_slice(&[0u8; 7]).is_none());
        assert!(Mark::from_slice(&[0u8; 9]).is_none());
        assert_eq!(Mark::from_slice(&[9u8; 8]), Some(Mark([9u8; 8])));
    }
}
