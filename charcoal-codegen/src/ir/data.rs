//! Global data items.
//!
//! After `cshmgen` has lowered C types away, a global variable is just a
//! block of bytes with an alignment and a mutability flag. Hoisted string
//! literals use the same representation.

/// A lowered global variable.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataItem {
    /// Total size in bytes.
    pub size: i64,
    /// Required alignment in bytes.
    pub align: i64,
    /// Initial contents; `None` places the item in zero-initialised memory.
    pub init: Option<Vec<u8>>,
    /// Whether the item may be placed in read-only memory.
    pub readonly: bool,
}

impl DataItem {
    /// A zero-initialised item of `size` bytes.
    pub fn zeroed(size: i64, align: i64) -> Self {
        Self {
            size,
            align,
            init: None,
            readonly: false,
        }
    }

    /// An initialised item; its size is the byte length.
    pub fn with_bytes(bytes: Vec<u8>, align: i64, readonly: bool) -> Self {
        Self {
            size: bytes.len() as i64,
            align,
            init: Some(bytes),
            readonly,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes() {
        assert_eq!(DataItem::zeroed(12, 4).size, 12);
        let d = DataItem::with_bytes(b"hi\0".to_vec(), 1, true);
        assert_eq!(d.size, 3);
        assert!(d.readonly);
    }
}
