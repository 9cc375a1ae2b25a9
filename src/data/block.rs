//! Block: a dense, multi-component array over one box.
//!
//! Data are stored component-major, each component in column-major order over
//! the block's stored box (the valid box grown by the collection's ghost
//! width). All region operations walk whole x-rows, so every transfer path in
//! the crate (inline loops, batched kernels, replayed graphs) touches the same
//! elements in the same order.

use crate::data::element::Element;
use crate::geometry::{IndexBox, IntVect};
use crate::halo_error::{BlockHaloError, check_component_window};
use crate::overlap::delta::{AddDelta, CopyDelta, CopyOp, ValueDelta};

/// Dense array over `stored_box` with `ncomp` components.
#[derive(Clone, Debug, PartialEq)]
pub struct Block<V> {
    bx: IndexBox,
    ncomp: usize,
    data: Vec<V>,
}

impl<V: Element> Block<V> {
    /// Zero-initialized block.
    pub fn new(bx: IndexBox, ncomp: usize) -> Self {
        Block {
            bx,
            ncomp,
            data: vec![V::zero(); bx.num_pts() * ncomp],
        }
    }

    /// Extent of the stored data (valid region plus ghost layers).
    #[inline]
    pub fn stored_box(&self) -> IndexBox {
        self.bx
    }

    #[inline]
    pub fn ncomp(&self) -> usize {
        self.ncomp
    }

    #[inline]
    pub fn as_slice(&self) -> &[V] {
        &self.data
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [V] {
        &mut self.data
    }

    /// Linear offset of `(p, comp)` in [`as_slice`](Self::as_slice).
    #[inline]
    pub fn offset(&self, p: IntVect, comp: usize) -> usize {
        debug_assert!(self.bx.contains(p), "{p:?} outside {:?}", self.bx);
        self.bx.offset_of(p) + comp * self.bx.num_pts()
    }

    #[inline]
    pub fn get(&self, p: IntVect, comp: usize) -> V {
        self.data[self.offset(p, comp)]
    }

    #[inline]
    pub fn set(&mut self, p: IntVect, comp: usize, v: V) {
        let o = self.offset(p, comp);
        self.data[o] = v;
    }

    pub fn fill(&mut self, v: V) {
        self.data.fill(v);
    }

    /// Set every point of `region` in components `[comp, comp+ncomp)` to `v`.
    pub fn fill_region(
        &mut self,
        region: &IndexBox,
        comp: usize,
        ncomp: usize,
        v: V,
    ) -> Result<(), BlockHaloError> {
        self.check_region(region, comp, ncomp)?;
        let nx = region.length(0);
        for n in 0..ncomp {
            for (j, k) in region.rows() {
                let o = self.offset(IntVect::new(region.lo()[0], j, k), comp + n);
                self.data[o..o + nx].fill(v);
            }
        }
        Ok(())
    }

    fn check_region(
        &self,
        region: &IndexBox,
        comp: usize,
        ncomp: usize,
    ) -> Result<(), BlockHaloError> {
        if !self.bx.contains_box(region) {
            return Err(BlockHaloError::InvalidTag(format!(
                "region {region:?} outside block {:?}",
                self.bx
            )));
        }
        check_component_window(comp, ncomp, self.ncomp)
    }

    /// Copy `region` of components `[scomp, scomp+ncomp)` into `out`, component-major.
    pub fn pack_region(
        &self,
        region: &IndexBox,
        scomp: usize,
        ncomp: usize,
        out: &mut [V],
    ) -> Result<(), BlockHaloError> {
        self.check_region(region, scomp, ncomp)?;
        if out.len() != region.num_pts() * ncomp {
            return Err(BlockHaloError::ProtocolViolation {
                peer: usize::MAX,
                expected: region.num_pts() * ncomp,
                got: out.len(),
            });
        }
        self.pack_rows(region, scomp, ncomp, out);
        Ok(())
    }

    pub(crate) fn pack_rows(&self, region: &IndexBox, scomp: usize, ncomp: usize, out: &mut [V]) {
        let nx = region.length(0);
        let mut cur = 0;
        for n in 0..ncomp {
            for (j, k) in region.rows() {
                let o = self.offset(IntVect::new(region.lo()[0], j, k), scomp + n);
                out[cur..cur + nx].copy_from_slice(&self.data[o..o + nx]);
                cur += nx;
            }
        }
    }

    /// Fuse `input` (component-major over `region`) into components `[dcomp, dcomp+ncomp)`.
    pub fn unpack_region(
        &mut self,
        region: &IndexBox,
        dcomp: usize,
        ncomp: usize,
        input: &[V],
        op: CopyOp,
    ) -> Result<(), BlockHaloError> {
        self.check_region(region, dcomp, ncomp)?;
        if input.len() != region.num_pts() * ncomp {
            return Err(BlockHaloError::ProtocolViolation {
                peer: usize::MAX,
                expected: region.num_pts() * ncomp,
                got: input.len(),
            });
        }
        self.unpack_rows(region, dcomp, ncomp, input, op);
        Ok(())
    }

    pub(crate) fn unpack_rows(
        &mut self,
        region: &IndexBox,
        dcomp: usize,
        ncomp: usize,
        input: &[V],
        op: CopyOp,
    ) {
        match op {
            CopyOp::Overwrite => self.unpack_with::<CopyDelta>(region, dcomp, ncomp, input),
            CopyOp::Accumulate => self.unpack_with::<AddDelta>(region, dcomp, ncomp, input),
        }
    }

    fn unpack_with<D: ValueDelta<V>>(
        &mut self,
        region: &IndexBox,
        dcomp: usize,
        ncomp: usize,
        input: &[V],
    ) {
        let nx = region.length(0);
        let mut cur = 0;
        for n in 0..ncomp {
            for (j, k) in region.rows() {
                let o = self.offset(IntVect::new(region.lo()[0], j, k), dcomp + n);
                D::fuse_slice(&mut self.data[o..o + nx], &input[cur..cur + nx]);
                cur += nx;
            }
        }
    }

    /// Fuse `src[sbox, scomp..]` into `self[dbox, dcomp..]`; boxes must have the same shape.
    #[allow(clippy::too_many_arguments)]
    pub fn copy_from(
        &mut self,
        src: &Block<V>,
        sbox: &IndexBox,
        scomp: usize,
        dbox: &IndexBox,
        dcomp: usize,
        ncomp: usize,
        op: CopyOp,
    ) -> Result<(), BlockHaloError> {
        if !sbox.same_shape(dbox) {
            return Err(BlockHaloError::InvalidTag(format!(
                "source {sbox:?} and destination {dbox:?} differ in shape"
            )));
        }
        src.check_region(sbox, scomp, ncomp)?;
        self.check_region(dbox, dcomp, ncomp)?;
        self.copy_rows(src, sbox, scomp, dbox, dcomp, ncomp, op);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn copy_rows(
        &mut self,
        src: &Block<V>,
        sbox: &IndexBox,
        scomp: usize,
        dbox: &IndexBox,
        dcomp: usize,
        ncomp: usize,
        op: CopyOp,
    ) {
        match op {
            CopyOp::Overwrite => {
                self.copy_with::<CopyDelta>(src, sbox, scomp, dbox, dcomp, ncomp)
            }
            CopyOp::Accumulate => {
                self.copy_with::<AddDelta>(src, sbox, scomp, dbox, dcomp, ncomp)
            }
        }
    }

    fn copy_with<D: ValueDelta<V>>(
        &mut self,
        src: &Block<V>,
        sbox: &IndexBox,
        scomp: usize,
        dbox: &IndexBox,
        dcomp: usize,
        ncomp: usize,
    ) {
        let nx = dbox.length(0);
        for n in 0..ncomp {
            for ((dj, dk), (sj, sk)) in dbox.rows().zip(sbox.rows()) {
                let so = src.offset(IntVect::new(sbox.lo()[0], sj, sk), scomp + n);
                let d_o = self.offset(IntVect::new(dbox.lo()[0], dj, dk), dcomp + n);
                D::fuse_slice(&mut self.data[d_o..d_o + nx], &src.data[so..so + nx]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(bx: IndexBox, ncomp: usize) -> Block<f64> {
        let mut b = Block::new(bx, ncomp);
        for n in 0..ncomp {
            for p in bx.points() {
                b.set(p, n, (p[0] * 100 + p[1] * 10 + n as i32) as f64);
            }
        }
        b
    }

    #[test]
    fn pack_unpack_region() {
        let src = ramp(IndexBox::new_2d(0, 0, 3, 3), 2);
        let region = IndexBox::new_2d(1, 1, 2, 3);
        let mut buf = vec![0.0; region.num_pts() * 2];
        src.pack_region(&region, 0, 2, &mut buf).unwrap();
        assert_eq!(buf[0], 110.0);
        assert_eq!(buf[region.num_pts()], 111.0);

        let mut dst = Block::<f64>::new(IndexBox::new_2d(0, 0, 3, 3), 3);
        dst.unpack_region(&region, 1, 2, &buf, CopyOp::Overwrite).unwrap();
        assert_eq!(dst.get(IntVect::new_2d(2, 3), 1), 230.0);
        assert_eq!(dst.get(IntVect::new_2d(2, 3), 2), 231.0);
        assert_eq!(dst.get(IntVect::new_2d(0, 0), 1), 0.0);

        dst.unpack_region(&region, 1, 2, &buf, CopyOp::Accumulate).unwrap();
        assert_eq!(dst.get(IntVect::new_2d(2, 3), 1), 460.0);
    }

    #[test]
    fn copy_from_shifted_region() {
        let src = ramp(IndexBox::new_2d(8, 0, 15, 7), 1);
        let mut dst = Block::<f64>::new(IndexBox::new_2d(-1, -1, 8, 8), 1);
        let sbox = IndexBox::new_2d(8, 0, 8, 7);
        let dbox = IndexBox::new_2d(8, 0, 8, 7);
        dst.copy_from(&src, &sbox, 0, &dbox, 0, 1, CopyOp::Overwrite).unwrap();
        for j in 0..8 {
            assert_eq!(dst.get(IntVect::new_2d(8, j), 0), src.get(IntVect::new_2d(8, j), 0));
        }
        let bad = IndexBox::new_2d(8, 0, 9, 7);
        assert!(dst.copy_from(&src, &bad, 0, &dbox, 0, 1, CopyOp::Overwrite).is_err());
    }

    #[test]
    fn region_checks() {
        let mut b = Block::<i32>::new(IndexBox::new_2d(0, 0, 3, 3), 1);
        assert!(b.fill_region(&IndexBox::new_2d(0, 0, 4, 0), 0, 1, 1).is_err());
        assert!(b.fill_region(&IndexBox::new_2d(0, 0, 3, 0), 1, 1, 1).is_err());
        b.fill_region(&IndexBox::new_2d(0, 0, 3, 0), 0, 1, 7).unwrap();
        assert_eq!(b.as_slice().iter().filter(|&&v| v == 7).count(), 4);
    }
}
