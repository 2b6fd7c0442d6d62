//! Version-gated undo/redo history.
//!
//! Each action stores the project's tasks and connections before and after a
//! recorded mutation, stamped with the project version at record time. The
//! version only moves when the remote store commits a write, so an action is
//! replayed only while nobody else has written the project since.

use crate::{
    changes::{stamp_changed, ProjectState},
    config::UndoConfig, ChangeKind, Notice, Notifier, Project, ProjectId,
    Rebalancer, Timestamp, Version,
};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// One recorded mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UndoAction {
    pub kind: ChangeKind,
    pub project_id: ProjectId,
    /// Project version when the mutation was recorded
    pub project_version: Version,
    pub before: ProjectState,
    pub after: ProjectState,
}

/// Replay direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Undo,
    Redo,
}

impl Direction {
    fn verb(&self) -> &'static str {
        match self {
            Direction::Undo => "undo",
            Direction::Redo => "redo",
        }
    }
}

/// Result of an undo or redo request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum UndoOutcome {
    /// The action was replayed.
    Applied,
    /// Nothing to replay.
    Empty,
    /// The project moved on; the action stays on its stack.
    #[serde(rename_all = "camelCase")]
    Refused { version_gap: Version },
    /// Refused, but within the force window.
    #[serde(rename_all = "camelCase")]
    Forceable { version_gap: Version },
}

/// Bounded undo and redo stacks.
pub struct UndoTracker {
    config: UndoConfig,
    undo_stack: VecDeque<UndoAction>,
    redo_stack: VecDeque<UndoAction>,
    force_warned: bool,
}

impl UndoTracker {
    pub fn new(config: UndoConfig) -> Self {
        Self {
            config,
            undo_stack: VecDeque::new(),
            redo_stack: VecDeque::new(),
            force_warned: false,
        }
    }

    /// Push a freshly recorded action. Clears the redo stack.
    pub fn push(&mut self, action: UndoAction) {
        self.undo_stack.push_back(action);
        if self.undo_stack.len() > self.config.max_history {
            self.undo_stack.pop_front();
        }
        self.redo_stack.clear();
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_depth(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_depth(&self) -> usize {
        self.redo_stack.len()
    }

    /// The action the next replay in `direction` would use.
    pub fn peek(&self, direction: Direction) -> Option<&UndoAction> {
        match direction {
            Direction::Undo => self.undo_stack.back(),
            Direction::Redo => self.redo_stack.back(),
        }
    }

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
    }

    /// Re-stamp actions recorded at `from` to `to`.
    ///
    /// Called after this replica's own flush is acknowledged, so its own
    /// writes do not make its history look stale.
    pub fn rebase_versions(&mut self, project_id: &str, from: Version, to: Version) -> usize {
        let mut rebased = 0;
        for action in self.undo_stack.iter_mut().chain(self.redo_stack.iter_mut()) {
            if action.project_id == project_id && action.project_version == from {
                action.project_version = to;
                rebased += 1;
            }
        }
        if rebased > 0 {
            tracing::debug!(project_id, from, to, rebased, "undo history rebased");
        }
        rebased
    }

    /// Replay the top action of `direction` onto `project`.
    ///
    /// `project` must be the project the top action belongs to. Entities the
    /// replay changes are stamped with `now` so a later merge treats the
    /// replay as the newest write.
    pub fn replay(
        &mut self,
        direction: Direction,
        project: &mut Project,
        force: bool,
        now: Timestamp,
        rebalancer: &dyn Rebalancer,
        notifier: &dyn Notifier,
    ) -> UndoOutcome {
        let Some(action) = self.peek(direction) else {
            return UndoOutcome::Empty;
        };
        debug_assert_eq!(action.project_id, project.id);

        let version_gap = project.version.abs_diff(action.project_version);
        if version_gap != 0 {
            if !force {
                return self.refuse(direction, version_gap, notifier);
            }
            if !self.force_warned {
                self.force_warned = true;
                notifier.notify(Notice::ForceReplayWarning {
                    title: "Forced replay".to_string(),
                    message: format!(
                        "This {} may overwrite changes made on another device.",
                        direction.verb()
                    ),
                });
            }
        }

        let max_history = self.config.max_history;
        let (source, target) = self.stacks(direction);
        let Some(mut action) = source.pop_back() else {
            return UndoOutcome::Empty;
        };

        let state = match direction {
            Direction::Undo => &action.before,
            Direction::Redo => &action.after,
        };
        let current = ProjectState::capture(project);
        state.restore_into(project);
        rebalancer.rebalance(project);
        stamp_changed(&current, project, now);

        tracing::info!(
            project_id = %project.id,
            direction = direction.verb(),
            version = project.version,
            version_gap,
            forced = force && version_gap != 0,
            "history replayed"
        );

        // A forced replay happened at the current version
        action.project_version = project.version;
        target.push_back(action);
        if target.len() > max_history {
            target.pop_front();
        }
        UndoOutcome::Applied
    }

    fn stacks(
        &mut self,
        direction: Direction,
    ) -> (&mut VecDeque<UndoAction>, &mut VecDeque<UndoAction>) {
        match direction {
            Direction::Undo => (&mut self.undo_stack, &mut self.redo_stack),
            Direction::Redo => (&mut self.redo_stack, &mut self.undo_stack),
        }
    }

    fn refuse(&self, direction: Direction, version_gap: Version, notifier: &dyn Notifier) -> UndoOutcome {
        let verb = direction.verb();
        tracing::warn!(direction = verb, version_gap, "history replay refused");

        let title = format!("Cannot {verb}");
        if version_gap <= self.config.force_window {
            notifier.notify(Notice::UndoForceable {
                title,
                message: format!(
                    "The project changed on another device ({version_gap} newer versions). \
                     You can force the {verb}, which may overwrite those changes."
                ),
                version_gap,
            });
            UndoOutcome::Forceable { version_gap }
        } else {
            notifier.notify(Notice::UndoRefused {
                title,
                message: format!(
                    "The project changed on another device ({version_gap} newer versions)."
                ),
            });
            UndoOutcome::Refused { version_gap }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CompactSiblingOrder, NoRebalance, RecordingNotifier, Task};

    fn project_with(title: &str, version: Version) -> Project {
        let mut project = Project::new("p1", "P").with_task(Task::new("t1", title));
        project.version = version;
        project
    }

    fn rename_action(version: Version) -> UndoAction {
        UndoAction {
            kind: ChangeKind::Content,
            project_id: "p1".into(),
            project_version: version,
            before: ProjectState::capture(&project_with("old", version)),
            after: ProjectState::capture(&project_with("new", version)),
        }
    }

    #[test]
    fn undo_and_redo_at_same_version() {
        let notifier = RecordingNotifier::new();
        let mut tracker = UndoTracker::new(UndoConfig::default());
        let mut project = project_with("new", 3);
        tracker.push(rename_action(3));

        let outcome = tracker.replay(Direction::Undo, &mut project, false, 10, &NoRebalance, &notifier);
        assert_eq!(outcome, UndoOutcome::Applied);
        assert_eq!(project.tasks[0].title, "old");
        assert_eq!(project.tasks[0].updated_at, Some(10));
        assert_eq!((tracker.undo_depth(), tracker.redo_depth()), (0, 1));

        let outcome = tracker.replay(Direction::Redo, &mut project, false, 20, &NoRebalance, &notifier);
        assert_eq!(outcome, UndoOutcome::Applied);
        assert_eq!(project.tasks[0].title, "new");
        assert_eq!((tracker.undo_depth(), tracker.redo_depth()), (1, 0));
        assert!(notifier.notices().is_empty());
    }

    #[test]
    fn stale_version_is_refused_and_kept() {
        let notifier = RecordingNotifier::new();
        let mut tracker = UndoTracker::new(UndoConfig::default());
        let mut project = project_with("remote edit", 9);
        tracker.push(rename_action(3));

        let outcome = tracker.replay(Direction::Undo, &mut project, false, 10, &NoRebalance, &notifier);
        assert_eq!(outcome, UndoOutcome::Refused { version_gap: 6 });
        assert_eq!(project.tasks[0].title, "remote edit");
        assert_eq!(tracker.undo_depth(), 1);
        assert!(matches!(notifier.notices()[0], Notice::UndoRefused { .. }));
    }

    #[test]
    fn small_gap_is_forceable() {
        let notifier = RecordingNotifier::new();
        let mut tracker = UndoTracker::new(UndoConfig::default());
        let mut project = project_with("remote edit", 5);
        tracker.push(rename_action(3));

        let outcome = tracker.replay(Direction::Undo, &mut project, false, 10, &NoRebalance, &notifier);
        assert_eq!(outcome, UndoOutcome::Forceable { version_gap: 2 });
        assert!(matches!(
            notifier.take()[0],
            Notice::UndoForceable { version_gap: 2, .. }
        ));

        let outcome = tracker.replay(Direction::Undo, &mut project, true, 10, &NoRebalance, &notifier);
        assert_eq!(outcome, UndoOutcome::Applied);
        assert_eq!(project.tasks[0].title, "old");
        assert_eq!(tracker.peek(Direction::Redo).unwrap().project_version, 5);
        assert!(matches!(notifier.take()[0], Notice::ForceReplayWarning { .. }));
    }

    #[test]
    fn force_window_is_inclusive() {
        let notifier = RecordingNotifier::new();
        let mut tracker = UndoTracker::new(UndoConfig::default());
        tracker.push(rename_action(0));

        let mut at_window = project_with("remote edit", 5);
        let outcome = tracker.replay(Direction::Undo, &mut at_window, false, 10, &NoRebalance, &notifier);
        assert_eq!(outcome, UndoOutcome::Forceable { version_gap: 5 });

        let mut past_window = project_with("remote edit", 6);
        let outcome = tracker.replay(Direction::Undo, &mut past_window, false, 10, &NoRebalance, &notifier);
        assert_eq!(outcome, UndoOutcome::Refused { version_gap: 6 });

        let notices = notifier.take();
        assert!(matches!(notices[0], Notice::UndoForceable { version_gap: 5, .. }));
        assert!(matches!(notices[1], Notice::UndoRefused { .. }));
        assert_eq!(tracker.undo_depth(), 1);
    }

    #[test]
    fn siblings_renumbered_by_rebalance_are_stamped() {
        let notifier = RecordingNotifier::new();
        let mut tracker = UndoTracker::new(UndoConfig::default());
        let mut project = Project::new("p1", "P")
            .with_task(Task {
                order: 0,
                ..Task::new("a", "A")
            })
            .with_task(Task {
                order: 1,
                ..Task::new("b", "B")
            });

        // Before the recorded move, "a" sat behind "b"
        let mut moved = project.clone();
        moved.task_mut("a").unwrap().order = 5;
        tracker.push(UndoAction {
            kind: ChangeKind::Structural,
            project_id: "p1".into(),
            project_version: 0,
            before: ProjectState::capture(&moved),
            after: ProjectState::capture(&project),
        });

        let outcome = tracker.replay(Direction::Undo, &mut project, false, 42, &CompactSiblingOrder, &notifier);
        assert_eq!(outcome, UndoOutcome::Applied);

        let b = project.task("b").unwrap();
        assert_eq!((b.order, b.updated_at), (0, Some(42)));
        let a = project.task("a").unwrap();
        assert_eq!((a.order, a.updated_at), (1, Some(42)));
    }

    #[test]
    fn force_warning_is_shown_once() {
        let notifier = RecordingNotifier::new();
        let mut tracker = UndoTracker::new(UndoConfig::default());
        let mut project = project_with("x", 8);
        tracker.push(rename_action(1));
        tracker.push(rename_action(2));

        tracker.replay(Direction::Undo, &mut project, true, 1, &NoRebalance, &notifier);
        tracker.replay(Direction::Undo, &mut project, true, 2, &NoRebalance, &notifier);

        let warnings = notifier
            .notices()
            .into_iter()
            .filter(|n| matches!(n, Notice::ForceReplayWarning { .. }))
            .count();
        assert_eq!(warnings, 1);
    }

    #[test]
    fn push_clears_redo_and_caps_history() {
        let config = UndoConfig {
            max_history: 2,
            ..UndoConfig::default()
        };
        let notifier = RecordingNotifier::new();
        let mut tracker = UndoTracker::new(config);
        let mut project = project_with("new", 0);

        tracker.push(rename_action(0));
        tracker.replay(Direction::Undo, &mut project, false, 1, &NoRebalance, &notifier);
        assert!(tracker.can_redo());

        tracker.push(rename_action(0));
        tracker.push(rename_action(0));
        tracker.push(rename_action(0));
        assert!(!tracker.can_redo());
        assert_eq!(tracker.undo_depth(), 2);
    }

    #[test]
    fn empty_stack() {
        let notifier = RecordingNotifier::new();
        let mut tracker = UndoTracker::new(UndoConfig::default());
        let mut project = project_with("a", 0);
        assert_eq!(
            tracker.replay(Direction::Redo, &mut project, false, 0, &NoRebalance, &notifier),
            UndoOutcome::Empty
        );
    }

    #[test]
    fn rebase_only_touches_matching_actions() {
        let mut tracker = UndoTracker::new(UndoConfig::default());
        tracker.push(rename_action(2));
        tracker.push(rename_action(3));
        tracker.push(UndoAction {
            project_id: "other".into(),
            ..rename_action(3)
        });

        assert_eq!(tracker.rebase_versions("p1", 3, 4), 1);
        let versions: Vec<Version> = tracker.undo_stack.iter().map(|a| a.project_version).collect();
        assert_eq!(versions, vec![2, 4, 3]);
    }
}
