//! Delta trait: rules for fusing transferred values into a destination.
//!
//! Fill-boundary always overwrites; parallel copy may overwrite or
//! accumulate. The runtime choice is [`CopyOp`]; the inner loops are
//! monomorphized over a [`ValueDelta`] so the choice is made once per region,
//! not once per element.

use std::ops::AddAssign;

/// *Delta* encapsulates how an incoming value is fused into a local one.
pub trait ValueDelta<V>: Copy + Send + Sync + 'static {
    /// Merge one incoming value into the local value.
    fn fuse(local: &mut V, incoming: V);

    /// Merge a contiguous run of values.
    #[inline]
    fn fuse_slice(local: &mut [V], incoming: &[V])
    where
        V: Copy,
    {
        debug_assert_eq!(local.len(), incoming.len());
        for (l, &r) in local.iter_mut().zip(incoming) {
            Self::fuse(l, r);
        }
    }
}

/// Identity delta (copy-overwrites-local).
#[derive(Copy, Clone, Debug, Default)]
pub struct CopyDelta;

impl<V: Copy + Send + Sync + 'static> ValueDelta<V> for CopyDelta {
    #[inline]
    fn fuse(local: &mut V, incoming: V) {
        *local = incoming;
    }

    #[inline]
    fn fuse_slice(local: &mut [V], incoming: &[V]) {
        local.copy_from_slice(incoming);
    }
}

/// Additive delta (accumulate into local).
#[derive(Copy, Clone, Debug, Default)]
pub struct AddDelta;

impl<V> ValueDelta<V> for AddDelta
where
    V: AddAssign + Copy + Send + Sync + 'static,
{
    #[inline]
    fn fuse(local: &mut V, incoming: V) {
        *local += incoming;
    }
}

/// Operator applied when transferred data lands in the destination.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum CopyOp {
    /// Destination value is replaced.
    #[default]
    Overwrite,
    /// Transferred value is added to the destination value.
    Accumulate,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_and_add_fuse() {
        let mut v = [1.0f64, 2.0];
        CopyDelta::fuse_slice(&mut v, &[5.0, 6.0]);
        assert_eq!(v, [5.0, 6.0]);
        AddDelta::fuse_slice(&mut v, &[1.0, 1.0]);
        assert_eq!(v, [6.0, 7.0]);
        let mut x = 3i32;
        <AddDelta as ValueDelta<i32>>::fuse(&mut x, 4);
        assert_eq!(x, 7);
    }
}
