//! Horizontal grid identity.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a horizontal grid: the CRC-32 of its raw grid-definition
/// section bytes.
///
/// The value is stable across processes and builds, so it can be written
/// to an index and compared against later builds or other partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GridHash(pub u32);

impl GridHash {
    /// Hash raw grid-definition bytes.
    pub fn of(gds: &[u8]) -> Self {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(gds);
        Self(hasher.finalize())
    }

    /// Default group id for grids without a configured name.
    pub fn default_group_id(&self) -> String {
        format!("grid-{}", self)
    }
}

impl fmt::Display for GridHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

impl From<u32> for GridHash {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_stable() {
        let a = GridHash::of(&[0, 1, 2, 3, 4]);
        let b = GridHash::of(&[0, 1, 2, 3, 4]);
        assert_eq!(a, b);
        assert_ne!(a, GridHash::of(&[0, 1, 2, 3, 5]));
    }

    #[test]
    fn test_default_group_id() {
        assert_eq!(GridHash(0xbeef).default_group_id(), "grid-0000beef");
    }
}
