//! Order-independent correlation hashing.
//!
//! Each `update` digests its chunk with SHA-256 and adds the digest into a
//! 256-bit accumulator lane by lane with wrapping addition. Addition is
//! commutative and associative, so the same multiset of chunks yields the
//! same accumulator in any order. `finalize` digests the accumulator
//! together with the chunk count.
//!
//! ```
//! use wirebridge::correlation::CorrelationHash;
//!
//! let mut forward = CorrelationHash::with_prefix("items");
//! let mut reverse = CorrelationHash::with_prefix("items");
//! for chunk in [&b"Input 1"[..], b"Input 2", b"Input 3"] {
//!     forward.update(chunk).unwrap();
//! }
//! for chunk in [&b"Input 3"[..], b"Input 2", b"Input 1"] {
//!     reverse.update(chunk).unwrap();
//! }
//! forward.finalize().unwrap();
//! reverse.finalize().unwrap();
//! assert_eq!(forward.token(), reverse.token());
//! ```

use sha2::{Digest as _, Sha256};

use crate::error::{GatewayError, Result};

/// Digest width in bytes.
pub const DIGEST_SIZE: usize = 32;

const LANES: usize = DIGEST_SIZE / 8;

/// Incremental, finalize-once correlation digest.
#[derive(Debug, Clone)]
pub struct CorrelationHash {
    prefix: Option<String>,
    supplied: Option<String>,
    lanes: [u64; LANES],
    updates: u64,
    digest: Option<[u8; DIGEST_SIZE]>,
}

impl CorrelationHash {
    /// Hash producing `prefix-hex(digest)` tokens.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self::new(Some(prefix.into()), None)
    }

    /// Hash whose token is a request-supplied value.
    pub fn with_supplied(value: impl Into<String>) -> Self {
        Self::new(None, Some(value.into()))
    }

    pub fn new(prefix: Option<String>, supplied: Option<String>) -> Self {
        Self {
            prefix,
            supplied,
            lanes: [0; LANES],
            updates: 0,
            digest: None,
        }
    }

    /// Fold a chunk into the accumulator.
    ///
    /// # Errors
    ///
    /// Returns `Correlation` once the hash is finalized.
    pub fn update(&mut self, bytes: &[u8]) -> Result<()> {
        if self.digest.is_some() {
            return Err(GatewayError::Correlation(
                "update after finalize".to_string(),
            ));
        }

        let chunk = Sha256::digest(bytes);
        for (lane, word) in self.lanes.iter_mut().zip(chunk.chunks_exact(8)) {
            let mut be = [0u8; 8];
            be.copy_from_slice(word);
            *lane = lane.wrapping_add(u64::from_be_bytes(be));
        }
        self.updates += 1;
        Ok(())
    }

    /// Produce the digest. May be called only once.
    ///
    /// # Errors
    ///
    /// Returns `Correlation` if already finalized.
    pub fn finalize(&mut self) -> Result<[u8; DIGEST_SIZE]> {
        if self.digest.is_some() {
            return Err(GatewayError::Correlation("already finalized".to_string()));
        }

        let mut hasher = Sha256::new();
        for lane in &self.lanes {
            hasher.update(lane.to_be_bytes());
        }
        hasher.update(self.updates.to_be_bytes());

        let mut digest = [0u8; DIGEST_SIZE];
        digest.copy_from_slice(&hasher.finalize());
        self.digest = Some(digest);
        Ok(digest)
    }

    #[inline]
    pub fn is_finalized(&self) -> bool {
        self.digest.is_some()
    }

    #[inline]
    pub fn digest(&self) -> Option<&[u8; DIGEST_SIZE]> {
        self.digest.as_ref()
    }

    /// Correlation token.
    ///
    /// With a prefix: `prefix-hex(digest)`, available after `finalize`.
    /// Without one: the supplied value unchanged.
    pub fn token(&self) -> Option<String> {
        match &self.prefix {
            Some(prefix) => self
                .digest
                .as_ref()
                .map(|digest| format!("{}-{}", prefix, hex::encode(digest))),
            None => self.supplied.clone(),
        }
    }
}
