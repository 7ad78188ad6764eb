//! Outstanding transaction tracking.
//!
//! Every probe owns one 128-bit transaction id from send until it is matched
//! or gives up. Ids stay fixed-size byte arrays the whole way; they are only
//! hex-formatted for logs.

use rand::RngCore;
use std::collections::HashSet;
use std::fmt;

/// Opaque 16-byte transaction identifier
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionId([u8; TransactionId::LEN]);

impl TransactionId {
    /// Identifier length in bytes
    pub const LEN: usize = 16;

    /// Wrap raw bytes
    #[must_use]
    pub const fn from_bytes(bytes: [u8; Self::LEN]) -> Self {
        Self(bytes)
    }

    /// Draw a fresh identifier from `rng`
    pub fn random_with<R: RngCore + ?Sized>(rng: &mut R) -> Self {
        let mut bytes = [0u8; Self::LEN];
        rng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Raw bytes
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; Self::LEN] {
        &self.0
    }
}

impl fmt::Debug for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransactionId({})", hex::encode(self.0))
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Set of transaction ids awaiting a response
///
/// Lookups are exact equality on all 16 bytes.
#[derive(Debug, Default)]
pub struct TransactionRegistry {
    outstanding: HashSet<TransactionId>,
}

impl TransactionRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate an id that collides with no outstanding entry
    #[must_use]
    pub fn generate(&self) -> TransactionId {
        self.generate_with(&mut rand::thread_rng())
    }

    /// Generate an id from a caller-supplied RNG
    pub fn generate_with<R: RngCore + ?Sized>(&self, rng: &mut R) -> TransactionId {
        loop {
            let id = TransactionId::random_with(rng);
            if !self.outstanding.contains(&id) {
                return id;
            }
            tracing::trace!(%id, "transaction id collision, regenerating");
        }
    }

    /// Mark `id` outstanding. Returns false if it already was.
    pub fn register(&mut self, id: TransactionId) -> bool {
        self.outstanding.insert(id)
    }

    /// Remove `id`, returning whether it was outstanding.
    ///
    /// Exactly one call per registered id returns true.
    pub fn complete(&mut self, id: &TransactionId) -> bool {
        self.outstanding.remove(id)
    }

    /// Whether `id` is awaiting a response
    #[must_use]
    pub fn is_outstanding(&self, id: &TransactionId) -> bool {
        self.outstanding.contains(id)
    }

    /// Number of outstanding ids
    #[must_use]
    pub fn len(&self) -> usize {
        self.outstanding.len()
    }

    /// True when nothing is outstanding
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.outstanding.is_empty()
    }
}
