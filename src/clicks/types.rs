use crate::error::{ClickLoopError, Result};
use ndarray::Array3;

/// Value stored in every unused point slot: `(row, col, order) = (-1, -1, -1)`.
pub const SENTINEL: [f32; 3] = [-1.0, -1.0, -1.0];

/// A single positive or negative click.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Click {
    /// (row, col) in the frame the click belongs to
    pub coords: (f32, f32),
    pub is_positive: bool,
    /// 1-based position of the click in the interaction sequence
    pub order_index: i32,
}

impl Click {
    pub fn new(coords: (f32, f32), is_positive: bool, order_index: i32) -> Self {
        Self {
            coords,
            is_positive,
            order_index,
        }
    }

    pub fn with_coords(self, coords: (f32, f32)) -> Self {
        Self { coords, ..self }
    }

    fn as_slot(&self) -> [f32; 3] {
        [self.coords.0, self.coords.1, self.order_index as f32]
    }
}

/// Fixed-capacity click storage for one sample.
///
/// The first `num_max_points` slots hold positive clicks, the second half
/// negative ones. Simulated clicks fill each half from the end backwards.
#[derive(Clone, Debug, PartialEq)]
pub struct PointSet {
    num_max_points: usize,
    slots: Vec<[f32; 3]>,
}

impl PointSet {
    /// All-sentinel point set with room for `num_max_points` clicks per polarity.
    pub fn new(num_max_points: usize) -> Self {
        Self {
            num_max_points,
            slots: vec![SENTINEL; 2 * num_max_points],
        }
    }

    pub fn from_slots(slots: Vec<[f32; 3]>) -> Result<Self> {
        if slots.len() % 2 != 0 {
            return Err(ClickLoopError::InvalidArgument(format!(
                "point set needs an even number of slots, got {}",
                slots.len()
            )));
        }
        Ok(Self {
            num_max_points: slots.len() / 2,
            slots,
        })
    }

    /// Pack clicks front-to-back into their polarity halves. Clicks beyond
    /// capacity are dropped.
    pub fn from_clicks(clicks: &[Click], num_max_points: usize) -> Self {
        let mut set = Self::new(num_max_points);
        let mut pos = 0;
        let mut neg = 0;
        for click in clicks {
            if click.is_positive {
                if pos < num_max_points {
                    set.slots[pos] = click.as_slot();
                    pos += 1;
                }
            } else if neg < num_max_points {
                set.slots[num_max_points + neg] = click.as_slot();
                neg += 1;
            }
        }
        set
    }

    pub fn num_max_points(&self) -> usize {
        self.num_max_points
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slots(&self) -> &[[f32; 3]] {
        &self.slots
    }

    pub fn slot(&self, index: usize) -> Option<[f32; 3]> {
        self.slots.get(index).copied()
    }

    pub fn is_sentinel(slot: &[f32; 3]) -> bool {
        slot[0] < 0.0 || slot[1] < 0.0
    }

    /// Number of non-sentinel slots.
    pub fn count_set(&self) -> usize {
        self.slots.iter().filter(|s| !Self::is_sentinel(s)).count()
    }

    /// Occupied slots as clicks; polarity comes from the half a slot lives in.
    pub fn clicks(&self) -> Vec<Click> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| !Self::is_sentinel(slot))
            .map(|(i, slot)| Click {
                coords: (slot[0], slot[1]),
                is_positive: i < self.num_max_points,
                order_index: slot[2] as i32,
            })
            .collect()
    }

    /// Slot written by the click generated at `click_round` (1-based).
    ///
    /// Rounds past capacity all land on the first slot of their half.
    pub fn round_slot(&self, click_round: usize, is_positive: bool) -> usize {
        let back = click_round.clamp(1, self.num_max_points.max(1));
        let bucket_end = if is_positive {
            self.num_max_points
        } else {
            2 * self.num_max_points
        };
        bucket_end - back
    }

    /// Record the click synthesized at `click_round`; returns the slot index.
    pub fn set_round_click(
        &mut self,
        click_round: usize,
        coords: (usize, usize),
        is_positive: bool,
    ) -> Option<usize> {
        if self.num_max_points == 0 {
            return None;
        }
        let index = self.round_slot(click_round, is_positive);
        self.slots[index] = [coords.0 as f32, coords.1 as f32, click_round as f32];
        Some(index)
    }
}

/// Stack per-sample point sets into the `[B, 2N, 3]` tensor networks consume.
pub fn points_to_array(points: &[PointSet]) -> Result<Array3<f32>> {
    let len = points.first().map(PointSet::len).unwrap_or(0);
    let mut out = Array3::<f32>::zeros((points.len(), len, 3));
    for (b, set) in points.iter().enumerate() {
        if set.len() != len {
            return Err(ClickLoopError::shape(
                format!("point set {b}"),
                &[len, 3],
                &[set.len(), 3],
            ));
        }
        for (i, slot) in set.slots.iter().enumerate() {
            for (k, v) in slot.iter().enumerate() {
                out[[b, i, k]] = *v;
            }
        }
    }
    Ok(out)
}

pub fn points_from_array(points: &Array3<f32>) -> Result<Vec<PointSet>> {
    let (batch, len, width) = points.dim();
    if width != 3 {
        return Err(ClickLoopError::shape("points", &[batch, len, 3], &[batch, len, width]));
    }
    (0..batch)
        .map(|b| {
            let slots = (0..len)
                .map(|i| [points[[b, i, 0]], points[[b, i, 1]], points[[b, i, 2]]])
                .collect();
            PointSet::from_slots(slots)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_point_set_is_all_sentinel() {
        let set = PointSet::new(4);
        assert_eq!(set.len(), 8);
        assert!(set.slots().iter().all(|s| *s == SENTINEL));
        assert_eq!(set.count_set(), 0);
        assert!(set.clicks().is_empty());
    }

    #[test]
    fn round_clicks_fill_each_half_from_the_end() {
        let mut set = PointSet::new(3);
        assert_eq!(set.set_round_click(1, (5, 6), true), Some(2));
        assert_eq!(set.set_round_click(2, (7, 8), false), Some(4));
        assert_eq!(set.set_round_click(3, (1, 1), true), Some(0));
        assert_eq!(set.slot(2), Some([5.0, 6.0, 1.0]));
        assert_eq!(set.slot(4), Some([7.0, 8.0, 2.0]));
        assert_eq!(set.count_set(), 3);

        let clicks = set.clicks();
        assert_eq!(clicks.len(), 3);
        assert!(clicks[0].is_positive && clicks[1].is_positive);
        assert!(!clicks[2].is_positive);
        assert_eq!(clicks[2].order_index, 2);
    }

    #[test]
    fn rounds_past_capacity_reuse_the_first_slot_of_the_half() {
        let mut set = PointSet::new(2);
        set.set_round_click(1, (1, 1), false);
        set.set_round_click(2, (2, 2), false);
        assert_eq!(set.set_round_click(5, (9, 9), false), Some(2));
        assert_eq!(set.slot(3), Some([1.0, 1.0, 1.0]));
        assert_eq!(set.len(), 4);
    }

    #[test]
    fn from_clicks_packs_by_polarity() {
        let clicks = [
            Click::new((1.0, 2.0), true, 1),
            Click::new((3.0, 4.0), false, 2),
            Click::new((5.0, 6.0), true, 3),
            Click::new((7.0, 8.0), true, 4),
        ];
        let set = PointSet::from_clicks(&clicks, 2);
        assert_eq!(set.slot(0), Some([1.0, 2.0, 1.0]));
        assert_eq!(set.slot(1), Some([5.0, 6.0, 3.0]));
        assert_eq!(set.slot(2), Some([3.0, 4.0, 2.0]));
        assert_eq!(set.slot(3), Some(SENTINEL));
    }

    #[test]
    fn array_conversion_keeps_layout() {
        let mut a = PointSet::new(2);
        a.set_round_click(1, (3, 4), true);
        let b = PointSet::new(2);
        let arr = points_to_array(&[a.clone(), b.clone()]).unwrap();
        assert_eq!(arr.dim(), (2, 4, 3));
        assert_eq!(arr[[0, 1, 0]], 3.0);
        assert_eq!(arr[[1, 1, 0]], -1.0);
        assert_eq!(points_from_array(&arr).unwrap(), vec![a, b]);
    }

    #[test]
    fn mismatched_point_sets_are_rejected() {
        let err = points_to_array(&[PointSet::new(2), PointSet::new(3)]).unwrap_err();
        assert!(matches!(err, ClickLoopError::ShapeMismatch { .. }));
    }
}
