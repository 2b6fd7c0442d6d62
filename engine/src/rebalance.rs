//! Sibling-order post-processing applied after undo/redo replay.

use crate::{Project, TaskId};
use std::collections::BTreeMap;

/// Structural fix-up run on a project after history replay.
pub trait Rebalancer: Send + Sync {
    fn rebalance(&self, project: &mut Project);
}

/// Leave the project as replayed.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRebalance;

impl Rebalancer for NoRebalance {
    fn rebalance(&self, _project: &mut Project) {}
}

/// Renumber `order` to `0..n` within each `(parent, stage)` sibling group.
///
/// Siblings are sorted by their current `(order, rank, id)`, so relative
/// placement is preserved while gaps and duplicates left by a replay are
/// removed. Tombstoned tasks keep their order.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompactSiblingOrder;

impl Rebalancer for CompactSiblingOrder {
    fn rebalance(&self, project: &mut Project) {
        let mut groups: BTreeMap<(Option<TaskId>, Option<u32>), Vec<usize>> = BTreeMap::new();
        for (idx, task) in project.tasks.iter().enumerate() {
            if task.is_active() {
                groups
                    .entry((task.parent_id.clone(), task.stage))
                    .or_default()
                    .push(idx);
            }
        }

        for indices in groups.values_mut() {
            indices.sort_by(|&a, &b| {
                let (ta, tb) = (&project.tasks[a], &project.tasks[b]);
                ta.order
                    .cmp(&tb.order)
                    .then(ta.rank.total_cmp(&tb.rank))
                    .then_with(|| ta.id.cmp(&tb.id))
            });
            for (position, &idx) in indices.iter().enumerate() {
                project.tasks[idx].order = position as i64;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Task;

    #[test]
    fn compacts_each_sibling_group() {
        let mut project = Project::new("p1", "P")
            .with_task(Task {
                order: 10,
                ..Task::new("a", "A")
            })
            .with_task(Task {
                order: 3,
                ..Task::new("b", "B")
            })
            .with_task(Task {
                order: 3,
                rank: -1.0,
                ..Task::new("c", "C")
            })
            .with_task(Task {
                order: 7,
                parent_id: Some("a".into()),
                ..Task::new("d", "D")
            })
            .with_task(Task {
                order: 42,
                deleted_at: Some(1),
                ..Task::new("e", "E")
            });

        CompactSiblingOrder.rebalance(&mut project);

        let order = |id: &str| project.task(id).unwrap().order;
        assert_eq!(order("c"), 0);
        assert_eq!(order("b"), 1);
        assert_eq!(order("a"), 2);
        assert_eq!(order("d"), 0);
        assert_eq!(order("e"), 42);
    }
}
