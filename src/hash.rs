//! Maps human readable item names to the 14-bit ids stored on disk. The name itself never hits
//! the memory, so renaming an item in the schema is only possible by keeping its old name.

use crate::ItemId;
use sha2::{Digest, Sha256};

/// Computes the SHA-256 of the UTF-8 name and keeps the lower 14 bits of the first two digest
/// bytes, read big-endian.
pub fn item_id(name: &str) -> ItemId {
    let digest = Sha256::digest(name.as_bytes());
    ItemId::new_masked(u16::from_be_bytes([digest[0], digest[1]]))
}
