//! Per-process halo context.
//!
//! A [`HaloContext`] owns everything the exchange operations share across
//! calls: the communicator, the configuration, the scratch arena, the tag
//! catalog and the executor (with its captured kernel plans). Create one per
//! process (per rank thread in tests) and pass it to every operation.

use crate::algs::communicator::Communicator;
use crate::algs::exec::Executor;
use crate::config::HaloConfig;
use crate::data::PooledArena;
use crate::overlap::catalog::TagCatalog;

pub struct HaloContext<C: Communicator> {
    comm: C,
    config: HaloConfig,
    arena: PooledArena,
    catalog: TagCatalog,
    executor: Executor,
}

impl<C: Communicator> HaloContext<C> {
    pub fn new(comm: C, config: HaloConfig) -> Self {
        let arena = match config.arena_capacity {
            Some(cap) => PooledArena::with_capacity(cap),
            None => PooledArena::new(),
        };
        let catalog = TagCatalog::new(comm.rank());
        let executor = Executor::new(config.backend);
        HaloContext {
            comm,
            config,
            arena,
            catalog,
            executor,
        }
    }

    /// Context with default configuration.
    pub fn with_defaults(comm: C) -> Self {
        Self::new(comm, HaloConfig::default())
    }

    #[inline]
    pub fn comm(&self) -> &C {
        &self.comm
    }

    #[inline]
    pub fn config(&self) -> &HaloConfig {
        &self.config
    }

    #[inline]
    pub fn arena(&self) -> &PooledArena {
        &self.arena
    }

    #[inline]
    pub fn catalog(&self) -> &TagCatalog {
        &self.catalog
    }

    #[inline]
    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    #[inline]
    pub fn rank(&self) -> usize {
        self.comm.rank()
    }

    #[inline]
    pub fn nprocs(&self) -> usize {
        self.comm.size()
    }
}

impl<C: Communicator + std::fmt::Debug> std::fmt::Debug for HaloContext<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HaloContext")
            .field("comm", &self.comm)
            .field("config", &self.config)
            .field("catalog_entries", &self.catalog.len())
            .field("arena", &self.arena.stats())
            .finish()
    }
}
