use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::info;

use crate::error::ConfigError;

/// Ordered set of API keys with a shared, circular active index.
///
/// The index is an atomic so a rotation made by one in-flight request is
/// immediately visible to every other request sharing the pool.
pub struct KeyPool {
    keys: Vec<String>,
    active: AtomicUsize,
    rotations: AtomicUsize,
}

impl KeyPool {
    /// Create a pool. Fails when `keys` is empty.
    pub fn new(keys: Vec<String>) -> Result<Self, ConfigError> {
        if keys.is_empty() {
            return Err(ConfigError::NoApiKey);
        }
        info!("Loaded {} API key(s)", keys.len());
        Ok(Self {
            keys,
            active: AtomicUsize::new(0),
            rotations: AtomicUsize::new(0),
        })
    }

    /// The currently active key.
    pub fn current(&self) -> &str {
        &self.keys[self.active_index()]
    }

    /// Active index and key, read together.
    pub fn snapshot(&self) -> (usize, &str) {
        let i = self.active_index();
        (i, &self.keys[i])
    }

    /// Zero-based index of the active key.
    pub fn active_index(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Number of effective rotations since the pool was created.
    pub fn rotations(&self) -> usize {
        self.rotations.load(Ordering::Relaxed)
    }

    /// Advance to the next key, wrapping around.
    ///
    /// Returns `false` for a single-key pool, where there is nothing to
    /// switch to.
    pub fn rotate(&self) -> bool {
        let len = self.keys.len();
        if len < 2 {
            return false;
        }
        let prev = self
            .active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |i| Some((i + 1) % len))
            .unwrap_or_else(|i| i);
        self.rotations.fetch_add(1, Ordering::Relaxed);
        info!("Switched to API key #{}", (prev + 1) % len + 1);
        true
    }
}

impl std::fmt::Debug for KeyPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPool")
            .field("len", &self.keys.len())
            .field("active", &self.active_index())
            .finish()
    }
}
