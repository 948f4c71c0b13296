//! blake3 digests for graph-document checksums and for bucketing
//! partitioning values that are not integers.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Digest([u8; 32]);

impl Digest {
    pub fn of(bytes: &[u8]) -> Self {
        Self(*blake3::hash(bytes).as_bytes())
    }

    /// Digest of the JSON encoding of `value`, streamed into the hasher.
    pub fn of_json<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        let mut hasher = blake3::Hasher::new();
        serde_json::to_writer(&mut hasher, value)?;
        Ok(Self(*hasher.finalize().as_bytes()))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        blake3::Hash::from(self.0).to_hex().to_string()
    }

    /// Bucket in `0..n` taken from the leading eight bytes.
    pub fn bucket(&self, n: u32) -> u32 {
        assert!(n > 0, "cannot bucket into zero partitions");
        let mut head = [0u8; 8];
        head.copy_from_slice(&self.0[..8]);
        (u64::from_le_bytes(head) % u64::from(n)) as u32
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}
