//! Pooled arena for transient communication buffers.
//!
//! The arena is an explicit capability: a [`PooledArena`] handle is created by
//! whoever owns the process-wide resources (normally a
//! [`HaloContext`](crate::context::HaloContext)) and cloned into anything
//! that needs scratch space. Buffers are recycled by power-of-two size class.
//!
//! An [`ArenaBuffer`] is owned by exactly one session. Dropping it returns its
//! memory to the pool, so buffers are released on every exit path.

use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::Mutex;

use crate::data::element::{Element, MAX_ELEMENT_ALIGN};
use crate::halo_error::BlockHaloError;

const WORD: usize = std::mem::size_of::<u64>();

static_assertions::const_assert!(MAX_ELEMENT_ALIGN <= std::mem::align_of::<u64>());

#[derive(Debug, Default)]
struct PoolState {
    free: HashMap<usize, Vec<Vec<u64>>>,
    in_use: usize,
    outstanding: usize,
    fresh: u64,
    reused: u64,
}

#[derive(Debug)]
struct PoolInner {
    capacity: Option<usize>,
    state: Mutex<PoolState>,
}

/// Source of session scratch buffers.
pub trait Arena: Send + Sync {
    /// Allocate a zeroed, 8-byte aligned buffer of `bytes` bytes.
    fn alloc(&self, bytes: usize) -> Result<ArenaBuffer, BlockHaloError>;
}

/// Usage counters of a [`PooledArena`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ArenaStats {
    /// Bytes currently handed out (size-class rounded).
    pub in_use_bytes: usize,
    /// Buffers currently handed out.
    pub outstanding: usize,
    /// Allocations served by fresh memory.
    pub fresh: u64,
    /// Allocations served from the free lists.
    pub reused: u64,
}

/// Shared, thread-safe buffer pool. Clones refer to the same pool.
#[derive(Clone, Debug)]
pub struct PooledArena {
    inner: Arc<PoolInner>,
}

impl Default for PooledArena {
    fn default() -> Self {
        Self::new()
    }
}

impl PooledArena {
    /// Unbounded arena.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Arena refusing to hand out more than `bytes` at once.
    pub fn with_capacity(bytes: usize) -> Self {
        Self::build(Some(bytes))
    }

    fn build(capacity: Option<usize>) -> Self {
        PooledArena {
            inner: Arc::new(PoolInner {
                capacity,
                state: Mutex::new(PoolState::default()),
            }),
        }
    }

    pub fn stats(&self) -> ArenaStats {
        let st = self.inner.state.lock();
        ArenaStats {
            in_use_bytes: st.in_use,
            outstanding: st.outstanding,
            fresh: st.fresh,
            reused: st.reused,
        }
    }
}

impl Arena for PooledArena {
    fn alloc(&self, bytes: usize) -> Result<ArenaBuffer, BlockHaloError> {
        if bytes == 0 {
            return Ok(ArenaBuffer {
                words: Vec::new(),
                len: 0,
                class_words: 0,
                home: None,
            });
        }
        let class_words = bytes.div_ceil(WORD).next_power_of_two();
        let class_bytes = class_words * WORD;
        let mut st = self.inner.state.lock();
        if let Some(cap) = self.inner.capacity {
            let available = cap.saturating_sub(st.in_use);
            if class_bytes > available {
                return Err(BlockHaloError::ArenaExhausted {
                    requested: bytes,
                    available,
                });
            }
        }
        let words = match st.free.get_mut(&class_words).and_then(|v| v.pop()) {
            Some(mut w) => {
                st.reused += 1;
                w.fill(0);
                w
            }
            None => {
                st.fresh += 1;
                vec![0u64; class_words]
            }
        };
        st.in_use += class_bytes;
        st.outstanding += 1;
        Ok(ArenaBuffer {
            words,
            len: bytes,
            class_words,
            home: Some(Arc::clone(&self.inner)),
        })
    }
}

/// Scratch buffer owned by one session; returns to its arena on drop.
#[derive(Debug)]
pub struct ArenaBuffer {
    words: Vec<u64>,
    len: usize,
    class_words: usize,
    home: Option<Arc<PoolInner>>,
}

impl ArenaBuffer {
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &bytemuck::cast_slice::<u64, u8>(&self.words)[..self.len]
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut bytemuck::cast_slice_mut::<u64, u8>(&mut self.words)[..self.len]
    }

    /// View `[offset, offset+bytes)` as elements of `V`.
    pub fn typed<V: Element>(&self, offset: usize, bytes: usize) -> Result<&[V], BlockHaloError> {
        let raw = self
            .as_bytes()
            .get(offset..offset + bytes)
            .ok_or(BlockHaloError::BufferAlignment { offset, len: bytes })?;
        bytemuck::try_cast_slice(raw)
            .map_err(|_| BlockHaloError::BufferAlignment { offset, len: bytes })
    }

    /// Mutable view of `[offset, offset+bytes)` as elements of `V`.
    pub fn typed_mut<V: Element>(
        &mut self,
        offset: usize,
        bytes: usize,
    ) -> Result<&mut [V], BlockHaloError> {
        let raw = self
            .as_bytes_mut()
            .get_mut(offset..offset + bytes)
            .ok_or(BlockHaloError::BufferAlignment { offset, len: bytes })?;
        bytemuck::try_cast_slice_mut(raw)
            .map_err(|_| BlockHaloError::BufferAlignment { offset, len: bytes })
    }
}

impl Drop for ArenaBuffer {
    fn drop(&mut self) {
        if let Some(home) = self.home.take() {
            let words = std::mem::take(&mut self.words);
            let mut st = home.state.lock();
            st.in_use -= self.class_words * WORD;
            st.outstanding -= 1;
            st.free.entry(self.class_words).or_default().push(words);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_release_reuse() {
        let arena = PooledArena::new();
        {
            let mut b = arena.alloc(100).unwrap();
            assert_eq!(b.len(), 100);
            b.as_bytes_mut()[99] = 7;
            let s = arena.stats();
            assert_eq!(s.outstanding, 1);
            assert_eq!(s.in_use_bytes, 128);
        }
        assert_eq!(arena.stats().outstanding, 0);
        assert_eq!(arena.stats().in_use_bytes, 0);
        let b = arena.alloc(120).unwrap();
        assert_eq!(b.as_bytes()[99], 0, "recycled buffers are zeroed");
        assert_eq!(arena.stats().reused, 1);
    }

    #[test]
    fn capacity_is_enforced() {
        let arena = PooledArena::with_capacity(64);
        let a = arena.alloc(64).unwrap();
        let err = arena.alloc(8).unwrap_err();
        assert_eq!(err, BlockHaloError::ArenaExhausted { requested: 8, available: 0 });
        drop(a);
        assert!(arena.alloc(8).is_ok());
    }

    #[test]
    fn typed_views() {
        let arena = PooledArena::new();
        let mut b = arena.alloc(32).unwrap();
        b.typed_mut::<f64>(8, 16).unwrap().copy_from_slice(&[1.5, 2.5]);
        assert_eq!(b.typed::<f64>(8, 16).unwrap(), &[1.5, 2.5]);
        assert!(b.typed::<f64>(4, 8).is_err());
        assert!(b.typed::<f64>(24, 16).is_err());
    }

    #[test]
    fn zero_sized_buffers_are_not_tracked() {
        let arena = PooledArena::with_capacity(0);
        let b = arena.alloc(0).unwrap();
        assert!(b.is_empty());
        assert_eq!(arena.stats().outstanding, 0);
    }
}
