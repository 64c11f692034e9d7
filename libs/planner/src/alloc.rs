//! Worker fleet allocator: greedy placement of operations onto nodes.
//!
//! Exact bin-packing is NP-hard and batches must land as atomic 4-operation
//! units, so placement is deliberately greedy: nodes sorted by free memory
//! descending, operations walked in order, first fit wins, and the first
//! operation that fits nowhere stops the walk. The result is `O(n·m)`,
//! deterministic, and biased toward under-promising rather than launching a
//! partial, unbalanced batch.

use reap_model::WorkerNode;

/// One placement decision: operation index into the input slice, node name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub op_index: usize,
    pub node: String,
}

/// Raw placement result: assignments for the leading run of operations that
/// fit. `assignments.len()` is the placed count.
#[derive(Debug, Clone, Default)]
pub struct Placement {
    pub assignments: Vec<Assignment>,
}

impl Placement {
    pub fn placed(&self) -> usize {
        self.assignments.len()
    }

    pub fn all_placed(&self, requested: usize) -> bool {
        self.assignments.len() == requested
    }
}

/// Batch-granular allocation: assignments truncated to complete batches.
#[derive(Debug, Clone, Default)]
pub struct BatchAllocation {
    pub assignments: Vec<Assignment>,
    pub complete_batches: u32,
}

/// Place operations (given as per-operation memory costs) onto nodes.
///
/// Stops at the first operation that fits on no node; later operations are
/// not considered even if they would fit, because skipping ahead would
/// dispatch a batch with a hole in it.
pub fn place(costs: &[f64], nodes: &[WorkerNode]) -> Placement {
    let mut capacity: Vec<(&str, f64)> = nodes
        .iter()
        .map(|n| (n.name.as_str(), n.available_memory()))
        .collect();
    // Most free memory first; name breaks ties so placement is deterministic.
    capacity.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(b.0))
    });

    let mut assignments = Vec::with_capacity(costs.len());
    'ops: for (op_index, &cost) in costs.iter().enumerate() {
        for slot in capacity.iter_mut() {
            if slot.1 >= cost {
                slot.1 -= cost;
                assignments.push(Assignment {
                    op_index,
                    node: slot.0.to_string(),
                });
                continue 'ops;
            }
        }
        break;
    }

    Placement { assignments }
}

/// Place a flat list of batch operations (four per batch, in batch order)
/// and keep only complete batches. Trailing partially-placed batches are
/// discarded rather than dispatched.
pub fn allocate_batches(costs: &[f64], nodes: &[WorkerNode]) -> BatchAllocation {
    let mut placement = place(costs, nodes);
    let complete = placement.placed() / 4;
    placement.assignments.truncate(complete * 4);
    BatchAllocation {
        assignments: placement.assignments,
        complete_batches: complete as u32,
    }
}

/// Total free memory across the fleet, scaled by the planning head-room.
pub fn fleet_capacity(nodes: &[WorkerNode], headroom: f64) -> f64 {
    nodes.iter().map(WorkerNode::available_memory).sum::<f64>() * headroom
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashMap;

    fn nodes(avail: &[f64]) -> Vec<WorkerNode> {
        avail
            .iter()
            .enumerate()
            .map(|(i, &a)| WorkerNode::new(format!("w{i:02}"), a, 0.0))
            .collect()
    }

    #[test]
    fn test_oversized_operation_places_nothing() {
        let allocation = allocate_batches(&[100.0], &nodes(&[50.0, 40.0]));
        assert!(allocation.assignments.is_empty());
        assert_eq!(allocation.complete_batches, 0);
    }

    #[test]
    fn test_zero_nodes_is_zero_batches_not_an_error() {
        let allocation = allocate_batches(&[10.0, 10.0, 10.0, 10.0], &[]);
        assert_eq!(allocation.complete_batches, 0);
        assert!(allocation.assignments.is_empty());
    }

    #[test]
    fn test_placement_stops_rather_than_skipping_ahead() {
        // The 60 GB operation fails on the 50 GB node; the 10 GB operation
        // after it must not be placed either.
        let placement = place(&[60.0, 10.0], &nodes(&[50.0]));
        assert_eq!(placement.placed(), 0);
    }

    #[test]
    fn test_prefers_node_with_most_free_memory() {
        let fleet = nodes(&[10.0, 80.0, 40.0]);
        let placement = place(&[30.0], &fleet);
        assert_eq!(placement.assignments[0].node, "w01");
    }

    #[test]
    fn test_partial_trailing_batch_is_discarded() {
        // Two full batches fit; the third batch's second operation does not.
        let costs: Vec<f64> = std::iter::repeat(10.0).take(9).collect();
        let allocation = allocate_batches(&costs, &nodes(&[85.0]));
        assert_eq!(allocation.complete_batches, 2);
        assert_eq!(allocation.assignments.len(), 8);
    }

    #[test]
    fn test_deterministic_tie_break_by_name() {
        let fleet = nodes(&[40.0, 40.0]);
        let placement = place(&[10.0], &fleet);
        assert_eq!(placement.assignments[0].node, "w00");
    }

    proptest! {
        #[test]
        fn prop_allocator_never_over_commits_a_node(
            costs in proptest::collection::vec(0.5f64..64.0, 0..40),
            avail in proptest::collection::vec(0.0f64..256.0, 0..12),
        ) {
            let fleet = nodes(&avail);
            let placement = place(&costs, &fleet);

            let mut spent: HashMap<&str, f64> = HashMap::new();
            for a in &placement.assignments {
                *spent.entry(a.node.as_str()).or_default() += costs[a.op_index];
            }
            for node in &fleet {
                let used = spent.get(node.name.as_str()).copied().unwrap_or(0.0);
                prop_assert!(used <= node.available_memory() + 1e-9);
            }
        }

        #[test]
        fn prop_batch_allocation_is_a_multiple_of_four(
            costs in proptest::collection::vec(0.5f64..64.0, 0..40),
            avail in proptest::collection::vec(0.0f64..256.0, 0..12),
        ) {
            let allocation = allocate_batches(&costs, &nodes(&avail));
            prop_assert_eq!(allocation.assignments.len() % 4, 0);
            prop_assert!(allocation.complete_batches as usize * 4 <= place(&costs, &nodes(&avail)).placed());
        }

        #[test]
        fn prop_placed_prefix_is_contiguous(
            costs in proptest::collection::vec(0.5f64..64.0, 0..40),
            avail in proptest::collection::vec(0.0f64..256.0, 0..12),
        ) {
            // Operations are placed in input order with no holes.
            let placement = place(&costs, &nodes(&avail));
            for (i, a) in placement.assignments.iter().enumerate() {
                prop_assert_eq!(a.op_index, i);
            }
        }
    }
}
