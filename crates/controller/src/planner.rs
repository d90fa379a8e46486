//! Scaling planner: the pure diff between a desired count and the live set.

use std::cmp::Reverse;
use std::collections::BTreeSet;
use std::ops::RangeInclusive;

use stratum_core::ManagedPod;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScalingAction {
    NoOp,
    /// Create indices `from_index..=to_index`.
    ScaleUp { from_index: u32, to_index: u32 },
    /// Delete exactly these pods, highest index first.
    ScaleDown { targets: Vec<ManagedPod> },
}

impl ScalingAction {
    pub fn is_noop(&self) -> bool {
        matches!(self, ScalingAction::NoOp)
    }

    /// Indices to create; empty unless scaling up.
    pub fn new_indices(&self) -> RangeInclusive<u32> {
        match self {
            ScalingAction::ScaleUp { from_index, to_index } => *from_index..=*to_index,
            #[allow(clippy::reversed_empty_ranges)]
            _ => 1..=0,
        }
    }
}

/// Compute the action converging `live` onto `desired` pods.
///
/// Scale-down removes the newest identities first so that lower indices stay
/// stable. Pods without an index are foreign to the indexing scheme and go
/// before any indexed pod, by name.
pub fn plan(desired: u32, live: &[ManagedPod]) -> ScalingAction {
    let current = live.len() as u32;
    if current > desired {
        let mut ordered: Vec<&ManagedPod> = live.iter().collect();
        ordered.sort_by_key(|p| (p.index.is_some(), Reverse(p.index), p.name.clone()));
        let targets = ordered.into_iter().take((current - desired) as usize).cloned().collect();
        ScalingAction::ScaleDown { targets }
    } else if current < desired {
        ScalingAction::ScaleUp { from_index: current, to_index: desired - 1 }
    } else {
        ScalingAction::NoOp
    }
}

/// The `count` lowest indices not held by any pod in `live`.
///
/// A pod that exits below the highest index leaves a hole; refilling holes
/// first keeps the index set dense.
pub fn free_indices(live: &[ManagedPod], count: usize) -> Vec<u32> {
    let taken: BTreeSet<u32> = live.iter().filter_map(|p| p.index).collect();
    (0..).filter(|i| !taken.contains(i)).take(count).collect()
}
