//! Runtime configuration of halo operations.

use crate::algs::exec::ExecBackend;
use crate::geometry::IntVect;

/// Default component chunk of a parallel copy.
pub const DEFAULT_MAX_COMP: usize = 25;

/// Default tile of the direct-copy path.
pub const DEFAULT_TILE_SIZE: IntVect = IntVect::new(1_024_000, 8, 8);

/// Tunables shared by every operation run through one
/// [`HaloContext`](crate::context::HaloContext).
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct HaloConfig {
    /// Largest number of components moved by one parallel-copy pass.
    pub max_comp: usize,
    /// How pack, unpack and local copies are executed.
    pub backend: ExecBackend,
    /// Tile size of the direct elementwise copy.
    pub tile_size: IntVect,
    /// Upper bound on outstanding scratch bytes; `None` is unlimited.
    pub arena_capacity: Option<usize>,
}

impl Default for HaloConfig {
    fn default() -> Self {
        HaloConfig {
            max_comp: DEFAULT_MAX_COMP,
            backend: ExecBackend::default(),
            tile_size: DEFAULT_TILE_SIZE,
            arena_capacity: None,
        }
    }
}

impl HaloConfig {
    /// Chunk size for parallel copy; zero is treated as one.
    pub fn with_max_comp(mut self, max_comp: usize) -> Self {
        self.max_comp = max_comp.max(1);
        self
    }

    pub fn with_backend(mut self, backend: ExecBackend) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_tile_size(mut self, tile_size: IntVect) -> Self {
        self.tile_size = tile_size;
        self
    }

    pub fn with_arena_capacity(mut self, bytes: usize) -> Self {
        self.arena_capacity = Some(bytes);
        self
    }
}
