//! Periodic domain description and the periodic image shifts it induces.

use itertools::iproduct;

use super::index_box::IndexBox;
use super::int_vect::{IntVect, SPACEDIM};

/// Periods per direction; a zero period means "not periodic".
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Periodicity {
    period: IntVect,
}

impl Periodicity {
    /// No periodic direction.
    pub const fn non_periodic() -> Self {
        Periodicity {
            period: IntVect::ZERO,
        }
    }

    /// Periodic in the directions flagged in `periodic`, with the domain's length as period.
    pub fn new(domain: &IndexBox, periodic: [bool; SPACEDIM]) -> Self {
        let period =
            IntVect(std::array::from_fn(|d| if periodic[d] { domain.length(d) as i32 } else { 0 }));
        Periodicity { period }
    }

    /// Explicit periods (zero = not periodic).
    pub fn from_periods(period: IntVect) -> Self {
        Periodicity {
            period: period.component_max(&IntVect::ZERO),
        }
    }

    #[inline]
    pub fn is_periodic(&self, dir: usize) -> bool {
        self.period[dir] > 0
    }

    #[inline]
    pub fn is_any_periodic(&self) -> bool {
        (0..SPACEDIM).any(|d| self.is_periodic(d))
    }

    #[inline]
    pub fn period(&self) -> IntVect {
        self.period
    }

    /// Every periodic image shift, the zero shift first.
    ///
    /// Each periodic direction contributes `{0, -L, +L}`; the list is the
    /// Cartesian product in z-major order, so it is identical on every process.
    pub fn shifts(&self) -> Vec<IntVect> {
        let opts = |d: usize| -> Vec<i32> {
            if self.is_periodic(d) {
                vec![0, -self.period[d], self.period[d]]
            } else {
                vec![0]
            }
        };
        iproduct!(opts(2), opts(1), opts(0))
            .map(|(z, y, x)| IntVect::new(x, y, z))
            .collect()
    }
}
