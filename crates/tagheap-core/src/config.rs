//! Heap configuration.
//!
//! Defaults match the hosted harness the allocator was built for: a 20 MB
//! backing reservation and 4 KB growth chunks. `TAGHEAP_MAX_HEAP` overrides
//! the reservation for OOM-path testing without recompiling.

/// Default growth quantum for `extend_heap` when no fit exists.
pub const CHUNKSIZE: usize = 1 << 12;

/// Default backing reservation.
pub const DEFAULT_MAX_HEAP: usize = 20 * (1 << 20);

/// Construction-time knobs for a [`crate::heap::Heap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
    /// Backing reservation in bytes; growth past this reports out-of-memory.
    pub max_heap: usize,
    /// Minimum extension size when the free list has no fit.
    pub chunk_size: usize,
    /// Extend by one chunk during initialization rather than lazily on the
    /// first allocation.
    pub pre_extend: bool,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            max_heap: DEFAULT_MAX_HEAP,
            chunk_size: CHUNKSIZE,
            pre_extend: true,
        }
    }
}

impl HeapConfig {
    /// Default configuration with the `TAGHEAP_MAX_HEAP` environment
    /// override applied (value in bytes; unparsable values are ignored).
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(raw) = std::env::var("TAGHEAP_MAX_HEAP")
            && let Ok(max) = raw.trim().parse::<usize>()
        {
            config.max_heap = max;
        }
        config
    }

    /// Replaces the backing reservation.
    #[must_use]
    pub fn with_max_heap(mut self, max_heap: usize) -> Self {
        self.max_heap = max_heap;
        self
    }

    /// Replaces the growth quantum.
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Enables or disables the initial chunk extension.
    #[must_use]
    pub fn with_pre_extend(mut self, pre_extend: bool) -> Self {
        self.pre_extend = pre_extend;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HeapConfig::default();
        assert_eq!(config.max_heap, DEFAULT_MAX_HEAP);
        assert_eq!(config.chunk_size, CHUNKSIZE);
        assert!(config.pre_extend);
    }

    #[test]
    fn test_builders() {
        let config = HeapConfig::default()
            .with_max_heap(1 << 16)
            .with_chunk_size(256)
            .with_pre_extend(false);
        assert_eq!(config.max_heap, 1 << 16);
        assert_eq!(config.chunk_size, 256);
        assert!(!config.pre_extend);
    }
}
