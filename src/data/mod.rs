//! Data containers: blocks, collections, element types and the scratch arena.

pub mod arena;
pub mod block;
pub mod collection;
pub mod element;

pub use arena::{Arena, ArenaBuffer, ArenaStats, PooledArena};
pub use block::Block;
pub use collection::Collection;
pub use element::Element;
