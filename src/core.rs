use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use sha2::{Digest, Sha256};

/// A 32-byte sha-256 hash used for content-addressing.
///
/// In `fbs` this serves two purposes:
/// 1. The *own-hash* of a task, computed over its configuration and the
///    mtimes of its declared input files.
/// 2. The *closure-hash*, the task's stable identity, which folds in the
///    sorted closure-hashes of all dependencies and names the task's
///    published directory in the cache.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash32([u8; 32]);

impl<T> From<T> for Hash32
where
    T: Into<[u8; 32]>,
{
    fn from(value: T) -> Self {
        Hash32(value.into())
    }
}

impl Hash32 {
    pub fn digest(buffer: impl AsRef<[u8]>) -> Self {
        let bytes: [u8; 32] = Sha256::digest(buffer.as_ref()).into();
        Hash32(bytes)
    }

    pub(crate) fn finalize(hasher: Sha256) -> Self {
        let bytes: [u8; 32] = hasher.finalize().into();
        Hash32(bytes)
    }

    pub fn to_hex(self) -> String {
        const HEX: &[u8; 16] = b"0123456789abcdef";
        let mut acc = vec![0u8; 64];

        for (i, &byte) in self.0.iter().enumerate() {
            acc[i * 2] = HEX[(byte >> 4) as usize];
            acc[i * 2 + 1] = HEX[(byte & 0xF) as usize];
        }

        String::from_utf8(acc).unwrap()
    }
}

impl std::fmt::Debug for Hash32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hash32({})", self.to_hex())
    }
}

impl std::fmt::Display for Hash32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// A cooperative cancellation signal carried by every task execution.
///
/// Workers check it between tasks, subprocess invocations poll it while the
/// child runs, and artifact downloads race it against their in-flight HTTP
/// transfers. The optional deadline is folded into the same signal so tasks
/// only ever have to ask one question.
#[derive(Clone, Default)]
pub struct Cancellation {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    flag: AtomicBool,
    deadline: Option<Instant>,
}

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            inner: Arc::new(Inner {
                flag: AtomicBool::new(false),
                deadline: Some(deadline),
            }),
        }
    }

    /// Request cancellation. Idempotent; observed by all clones.
    pub fn cancel(&self) {
        self.inner.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        if self.inner.flag.load(Ordering::SeqCst) {
            return true;
        }

        match self.inner.deadline {
            Some(deadline) => Instant::now() >= deadline,
            None => false,
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn hex_roundtrip() {
        let hash = Hash32::digest(b"fbs");
        let hex = hash.to_hex();
        assert_eq!(hex.len(), 64);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(hash.to_hex(), hex);
    }

    #[test]
    fn digest_is_stable() {
        assert_eq!(Hash32::digest(b"abc"), Hash32::digest(b"abc"));
        assert_ne!(Hash32::digest(b"abc"), Hash32::digest(b"abd"));
    }

    #[test]
    fn cancellation_flag() {
        let token = Cancellation::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn cancellation_deadline() {
        let token = Cancellation::with_deadline(Instant::now() - Duration::from_secs(1));
        assert!(token.is_cancelled());

        let token = Cancellation::with_deadline(Instant::now() + Duration::from_secs(60));
        assert!(!token.is_cancelled());
    }
}
