//! Field-level merge of a local entity with its remote variant.
//!
//! The remote store delivers whole rows, not operations, so reconciliation
//! happens field by field on two versions of the same entity.
//!
//! # Algorithm
//!
//! 1. The newer side (by `updatedAt`, ties to local) is the base
//! 2. Locked fields keep the local value
//! 3. Independent fields resolve by LWW
//! 4. Content either merges textually or, for a real conflict, spawns a
//!    sibling copy that keeps the local text
//! 5. Position stays local; structural fields move as one group
//! 6. Tombstones are sticky; tags and attachments use intent-aware set merges
//! 7. The merged entity is stamped with the current time

use crate::{
    config::MergeConfig, Attachment, Connection, FieldLocks, Notice, Project, Task, TaskField,
    TaskId, Timestamp,
};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Result of merging one task.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityMerge {
    /// The reconciled task
    pub merged: Task,
    /// Whether any merged field differed between the two sides
    pub has_conflict: bool,
    /// Sibling holding the local content when the edit could not be merged
    pub conflict_copy: Option<Task>,
}

/// Result of merging a whole project.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectMerge {
    /// The reconciled project, conflict copies included
    pub project: Project,
    /// Tasks that had at least one conflicting field
    pub conflicted: Vec<TaskId>,
    /// One [`Notice::ConflictCopyCreated`] per spawned copy
    pub notices: Vec<Notice>,
}

impl ProjectMerge {
    /// Whether the merged project differs from what the remote sent.
    pub fn has_conflicts(&self) -> bool {
        !self.conflicted.is_empty()
    }
}

/// The merge engine.
#[derive(Debug, Clone, Default)]
pub struct MergeEngine {
    config: MergeConfig,
}

impl MergeEngine {
    pub fn new(config: MergeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MergeConfig {
        &self.config
    }

    /// Merge a local task with its remote variant.
    ///
    /// Neither input is modified.
    pub fn merge_entity_fields(
        &self,
        local: &Task,
        remote: &Task,
        locked: &[TaskField],
        now: Timestamp,
    ) -> EntityMerge {
        let local_time = local.updated_time();
        let remote_time = remote.updated_time();
        let local_newer = local_time >= remote_time;
        let is_locked = |field: TaskField| locked.contains(&field);

        let mut merged = if local_newer {
            local.clone()
        } else {
            remote.clone()
        };
        merged.id = local.id.clone();
        let mut has_conflict = false;

        merged.title = pick(
            &local.title,
            &remote.title,
            is_locked(TaskField::Title),
            local_newer,
            &mut has_conflict,
        );
        merged.status = pick(
            &local.status,
            &remote.status,
            is_locked(TaskField::Status),
            local_newer,
            &mut has_conflict,
        );
        merged.priority = pick(
            &local.priority,
            &remote.priority,
            is_locked(TaskField::Priority),
            local_newer,
            &mut has_conflict,
        );
        merged.due_date = pick(
            &local.due_date,
            &remote.due_date,
            is_locked(TaskField::DueDate),
            local_newer,
            &mut has_conflict,
        );

        // Content
        let mut conflict_copy = None;
        if local.content == remote.content {
            merged.content = local.content.clone();
        } else {
            has_conflict = true;
            if is_locked(TaskField::Content) {
                merged.content = local.content.clone();
            } else if self.is_real_conflict(&local.content, &remote.content) {
                merged.content = remote.content.clone();
                conflict_copy = Some(self.conflict_copy(local, now));
            } else {
                merged.content = merge_text(&local.content, &remote.content, local_newer);
            }
        }

        // Position is client-local presentation state
        merged.x = local.x;
        merged.y = local.y;

        // Structural placement moves as one unit
        let structural_differs = local.stage != remote.stage
            || local.parent_id != remote.parent_id
            || local.order != remote.order
            || local.rank != remote.rank;
        if structural_differs {
            has_conflict = true;
        }
        let structural_locked = TaskField::STRUCTURAL.iter().any(|f| is_locked(*f));
        let placement = if !structural_differs || structural_locked || local_newer {
            local
        } else {
            remote
        };
        merged.stage = placement.stage;
        merged.parent_id = placement.parent_id.clone();
        merged.order = placement.order;
        merged.rank = placement.rank;

        // Tombstones: first delete wins
        if local.deleted_at != remote.deleted_at {
            has_conflict = true;
        }
        merged.deleted_at = if is_locked(TaskField::DeletedAt) {
            local.deleted_at
        } else {
            match (local.deleted_at, remote.deleted_at) {
                (Some(l), Some(r)) => Some(l.min(r)),
                (Some(t), None) | (None, Some(t)) => Some(t),
                (None, None) => None,
            }
        };

        if local.tags != remote.tags {
            has_conflict = true;
            merged.tags = if is_locked(TaskField::Tags) {
                local.tags.clone()
            } else {
                merge_tag_set(&local.tags, &remote.tags, local_time, remote_time)
            };
        } else {
            merged.tags = local.tags.clone();
        }

        if local.attachments != remote.attachments {
            has_conflict = true;
            merged.attachments = if is_locked(TaskField::Attachments) {
                local.attachments.clone()
            } else {
                merge_attachment_set(
                    &local.attachments,
                    &remote.attachments,
                    local_time,
                    remote_time,
                )
            };
        } else {
            merged.attachments = local.attachments.clone();
        }

        merged.updated_at = Some(now);

        EntityMerge {
            merged,
            has_conflict,
            conflict_copy,
        }
    }

    /// Whether two versions of a content field are independent, substantive
    /// edits that cannot be merged automatically.
    pub fn is_real_conflict(&self, a: &str, b: &str) -> bool {
        let min = self.config.min_conflict_length;
        if a.chars().count() < min || b.chars().count() < min {
            return false;
        }
        if a.starts_with(b) || b.starts_with(a) || a.ends_with(b) || b.ends_with(a) {
            return false;
        }
        let score = similarity(a, b);
        score >= self.config.low_similarity && score <= self.config.high_similarity
    }

    fn conflict_copy(&self, local: &Task, now: Timestamp) -> Task {
        Task {
            id: Uuid::new_v4().to_string(),
            title: format!("{}{}", local.title, self.config.copy_title_suffix),
            x: local.x + self.config.copy_offset,
            y: local.y + self.config.copy_offset,
            deleted_at: None,
            updated_at: Some(now),
            ..local.clone()
        }
    }

    /// Merge a local project with its remote variant.
    ///
    /// Tasks present on both sides are merged field by field with the lock
    /// lookup; one-sided tasks pass through. Identical rows are kept as they
    /// are so a pull does not restamp untouched tasks.
    pub fn merge_project(
        &self,
        local: &Project,
        remote: &Project,
        locks: &dyn FieldLocks,
        now: Timestamp,
    ) -> ProjectMerge {
        let remote_tasks: HashMap<&str, &Task> =
            remote.tasks.iter().map(|t| (t.id.as_str(), t)).collect();
        let local_ids: HashSet<&str> = local.tasks.iter().map(|t| t.id.as_str()).collect();

        let mut tasks = Vec::with_capacity(local.tasks.len().max(remote.tasks.len()));
        let mut copies = Vec::new();
        let mut conflicted = Vec::new();
        let mut notices = Vec::new();

        for local_task in &local.tasks {
            let Some(remote_task) = remote_tasks.get(local_task.id.as_str()) else {
                tasks.push(local_task.clone());
                continue;
            };

            if local_task.changed_fields(remote_task).is_empty() {
                let newer = if local_task.updated_time() >= remote_task.updated_time() {
                    local_task
                } else {
                    *remote_task
                };
                tasks.push(newer.clone());
                continue;
            }

            let locked = locks.locked_fields(&local_task.id, &local.id);
            let result = self.merge_entity_fields(local_task, remote_task, &locked, now);
            if result.has_conflict {
                conflicted.push(local_task.id.clone());
            }
            if let Some(copy) = result.conflict_copy {
                notices.push(Notice::ConflictCopyCreated {
                    copy_id: copy.id.clone(),
                    source_id: local_task.id.clone(),
                    local_length: local_task.content.chars().count(),
                    remote_length: remote_task.content.chars().count(),
                });
                copies.push(copy);
            }
            tasks.push(result.merged);
        }

        tasks.extend(
            remote
                .tasks
                .iter()
                .filter(|t| !local_ids.contains(t.id.as_str()))
                .cloned(),
        );
        tasks.extend(copies);

        let name = if local.updated_at.unwrap_or(0) >= remote.updated_at.unwrap_or(0) {
            local.name.clone()
        } else {
            remote.name.clone()
        };

        tracing::debug!(
            project_id = %local.id,
            conflicted = conflicted.len(),
            copies = notices.len(),
            "merged remote project"
        );

        ProjectMerge {
            project: Project {
                id: local.id.clone(),
                name,
                tasks,
                connections: merge_connection_set(&local.connections, &remote.connections),
                version: local.version.max(remote.version),
                updated_at: Some(now),
            },
            conflicted,
            notices,
        }
    }
}

/// LWW pick for an independent field.
fn pick<T: Clone + PartialEq>(
    local: &T,
    remote: &T,
    locked: bool,
    local_newer: bool,
    has_conflict: &mut bool,
) -> T {
    if local == remote {
        return local.clone();
    }
    *has_conflict = true;
    if locked || local_newer {
        local.clone()
    } else {
        remote.clone()
    }
}

/// Character-overlap similarity in `[0, 1]`.
///
/// Counts the characters of the shorter string that occur anywhere in the
/// longer one, divided by the longer length. Equal lengths are ordered
/// lexicographically so the score is symmetric.
pub fn similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    let (a_len, b_len) = (a.chars().count(), b.chars().count());
    let (shorter, longer, longer_len) = if (a_len, a) <= (b_len, b) {
        (a, b, b_len)
    } else {
        (b, a, a_len)
    };

    let present: HashSet<char> = longer.chars().collect();
    let matched = shorter.chars().filter(|c| present.contains(c)).count();
    matched as f64 / longer_len as f64
}

/// Automatic text merge for content that is not a real conflict.
///
/// A prefix/suffix relation keeps the longer text. Otherwise, when at least
/// half of the lines are shared, the result is the shared lines followed by
/// the lines unique to each side. Anything else falls back to LWW.
pub fn merge_text(local: &str, remote: &str, local_newer: bool) -> String {
    if local.starts_with(remote) || local.ends_with(remote) {
        return local.to_string();
    }
    if remote.starts_with(local) || remote.ends_with(local) {
        return remote.to_string();
    }

    let local_lines: Vec<&str> = local.lines().collect();
    let remote_lines: Vec<&str> = remote.lines().collect();
    let local_set: HashSet<&str> = local_lines.iter().copied().collect();
    let remote_set: HashSet<&str> = remote_lines.iter().copied().collect();

    let common: Vec<&str> = local_lines
        .iter()
        .copied()
        .filter(|l| remote_set.contains(l))
        .collect();
    let longest = local_lines.len().max(remote_lines.len());

    if !common.is_empty() && common.len() * 2 >= longest {
        let local_only = local_lines.iter().copied().filter(|l| !remote_set.contains(l));
        let remote_only = remote_lines.iter().copied().filter(|l| !local_set.contains(l));
        // Line endings follow the longer side
        let style = if local.len() >= remote.len() { local } else { remote };
        let newline = if style.contains("\r\n") { "\r\n" } else { "\n" };
        let mut merged = common
            .iter()
            .copied()
            .chain(local_only)
            .chain(remote_only)
            .collect::<Vec<_>>()
            .join(newline);
        if style.ends_with('\n') {
            merged.push_str(newline);
        }
        return merged;
    }

    if local_newer {
        local.to_string()
    } else {
        remote.to_string()
    }
}

/// Intent-aware tag merge.
///
/// Shared tags are kept. A one-sided tag survives only when its side is the
/// newer one (or equal): a tag missing from the newer side was removed on
/// purpose.
pub fn merge_tag_set(
    local: &[String],
    remote: &[String],
    local_time: Timestamp,
    remote_time: Timestamp,
) -> Vec<String> {
    let local_set: HashSet<&str> = local.iter().map(String::as_str).collect();
    let remote_set: HashSet<&str> = remote.iter().map(String::as_str).collect();
    let mut seen = HashSet::new();
    let mut merged = Vec::new();

    for tag in local {
        if (remote_set.contains(tag.as_str()) || local_time >= remote_time)
            && seen.insert(tag.as_str())
        {
            merged.push(tag.clone());
        }
    }
    for tag in remote {
        if !local_set.contains(tag.as_str()) && remote_time >= local_time && seen.insert(tag.as_str())
        {
            merged.push(tag.clone());
        }
    }

    merged
}

/// Attachment merge keyed by attachment id.
///
/// Shared ids take the newer side's record (ties to local); one-sided ids
/// follow the same intent rule as [`merge_tag_set`].
pub fn merge_attachment_set(
    local: &[Attachment],
    remote: &[Attachment],
    local_time: Timestamp,
    remote_time: Timestamp,
) -> Vec<Attachment> {
    let local_by_id: HashMap<&str, &Attachment> =
        local.iter().map(|a| (a.id.as_str(), a)).collect();
    let remote_by_id: HashMap<&str, &Attachment> =
        remote.iter().map(|a| (a.id.as_str(), a)).collect();
    let local_newer = local_time >= remote_time;
    let mut seen = HashSet::new();
    let mut merged = Vec::new();

    for attachment in local {
        if !seen.insert(attachment.id.as_str()) {
            continue;
        }
        match remote_by_id.get(attachment.id.as_str()) {
            Some(other) if !local_newer => merged.push((*other).clone()),
            Some(_) => merged.push(attachment.clone()),
            None if local_newer => merged.push(attachment.clone()),
            None => {}
        }
    }
    for attachment in remote {
        if local_by_id.contains_key(attachment.id.as_str()) {
            continue;
        }
        if remote_time >= local_time && seen.insert(attachment.id.as_str()) {
            merged.push(attachment.clone());
        }
    }

    merged
}

/// Tombstone-respecting merge of connection sets, keyed by connection id.
///
/// Deletion is sticky: a tombstone on either side wins regardless of
/// recency, and of two tombstones the earlier one is kept.
pub fn merge_connection_set(local: &[Connection], remote: &[Connection]) -> Vec<Connection> {
    let remote_by_key: HashMap<String, &Connection> =
        remote.iter().map(|c| (c.merge_key(), c)).collect();
    let mut seen = HashSet::new();
    let mut merged = Vec::with_capacity(local.len().max(remote.len()));

    for connection in local {
        let key = connection.merge_key();
        if !seen.insert(key.clone()) {
            continue;
        }
        match remote_by_key.get(&key) {
            Some(other) => merged.push(merge_connection(connection, other)),
            None => merged.push(connection.clone()),
        }
    }
    for connection in remote {
        if seen.insert(connection.merge_key()) {
            merged.push(connection.clone());
        }
    }

    merged
}

fn merge_connection(local: &Connection, remote: &Connection) -> Connection {
    let mut merged = if local.updated_time() >= remote.updated_time() {
        local.clone()
    } else {
        remote.clone()
    };
    merged.id = local.id.clone();

    merged.deleted_at = match (local.deleted_at, remote.deleted_at) {
        (Some(l), Some(r)) => Some(l.min(r)),
        (Some(t), None) | (None, Some(t)) => Some(t),
        (None, None) => {
            merged.description = pick_description(&local.description, &remote.description);
            None
        }
    };
    merged.updated_at = local.updated_at.max(remote.updated_at);

    merged
}

fn pick_description(local: &str, remote: &str) -> String {
    if remote.is_empty() {
        local.to_string()
    } else if local.is_empty() || remote.chars().count() > local.chars().count() {
        remote.to_string()
    } else {
        local.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{NoLocks, Priority, TaskStatus};

    const NOW: Timestamp = 10_000;

    fn engine() -> MergeEngine {
        MergeEngine::default()
    }

    fn task_at(id: &str, updated_at: Timestamp) -> Task {
        Task {
            updated_at: Some(updated_at),
            ..Task::new(id, "Task")
        }
    }

    fn tags(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn identical_entities_do_not_conflict() {
        let task = Task {
            content: "some body text".into(),
            tags: tags(&["a"]),
            ..task_at("t1", 100)
        };
        let result = engine().merge_entity_fields(&task, &task, &[], NOW);

        assert!(!result.has_conflict);
        assert!(result.conflict_copy.is_none());
        assert_eq!(
            result.merged,
            Task {
                updated_at: Some(NOW),
                ..task
            }
        );
    }

    #[test]
    fn newer_side_wins_independent_fields() {
        let local = Task {
            title: "local".into(),
            priority: Some(Priority::Low),
            ..task_at("t1", 100)
        };
        let remote = Task {
            title: "remote".into(),
            status: TaskStatus::Completed,
            priority: Some(Priority::High),
            ..task_at("t1", 200)
        };

        let result = engine().merge_entity_fields(&local, &remote, &[], NOW);
        assert!(result.has_conflict);
        assert_eq!(result.merged.title, "remote");
        assert_eq!(result.merged.status, TaskStatus::Completed);
        assert_eq!(result.merged.priority, Some(Priority::High));
        assert_eq!(result.merged.updated_at, Some(NOW));
    }

    #[test]
    fn ties_favor_local() {
        let local = Task {
            title: "local".into(),
            ..task_at("t1", 100)
        };
        let remote = Task {
            title: "remote".into(),
            ..task_at("t1", 100)
        };
        let result = engine().merge_entity_fields(&local, &remote, &[], NOW);
        assert_eq!(result.merged.title, "local");
    }

    #[test]
    fn missing_timestamp_counts_as_epoch() {
        let local = Task {
            title: "local".into(),
            updated_at: None,
            ..Task::new("t1", "")
        };
        let remote = Task {
            title: "remote".into(),
            ..task_at("t1", 1)
        };
        let result = engine().merge_entity_fields(&local, &remote, &[], NOW);
        assert_eq!(result.merged.title, "remote");
    }

    #[test]
    fn locked_field_keeps_local_value() {
        let local = Task {
            title: "typing...".into(),
            content: "draft in progress that is long enough".into(),
            ..task_at("t1", 100)
        };
        let remote = Task {
            title: "remote title".into(),
            content: "completely unrelated remote body text".into(),
            ..task_at("t1", 900)
        };

        let locked = [TaskField::Title, TaskField::Content];
        let result = engine().merge_entity_fields(&local, &remote, &locked, NOW);
        assert!(result.has_conflict);
        assert_eq!(result.merged.title, "typing...");
        assert_eq!(result.merged.content, local.content);
        assert!(result.conflict_copy.is_none());
    }

    #[test]
    fn real_content_conflict_spawns_copy() {
        let local = Task {
            content: "abcdefghijklmnopqrst".into(),
            x: 10.0,
            y: 20.0,
            ..task_at("t1", 100)
        };
        let remote = Task {
            content: "zyxwvutsrqponmlkjihg".into(),
            ..task_at("t1", 200)
        };

        let result = engine().merge_entity_fields(&local, &remote, &[], NOW);
        assert!(result.has_conflict);
        assert_eq!(result.merged.content, remote.content);

        let copy = result.conflict_copy.expect("conflict copy");
        assert_ne!(copy.id, "t1");
        assert_eq!(copy.content, local.content);
        assert_eq!(copy.x, 50.0);
        assert_eq!(copy.y, 60.0);
        assert_eq!(copy.title, "Task (conflict copy)");
    }

    #[test]
    fn prefix_edit_takes_longer_text() {
        let local = Task {
            content: "Shopping list:\n- milk".into(),
            ..task_at("t1", 300)
        };
        let remote = Task {
            content: "Shopping list:\n- milk\n- eggs".into(),
            ..task_at("t1", 100)
        };
        let result = engine().merge_entity_fields(&local, &remote, &[], NOW);
        assert_eq!(result.merged.content, remote.content);
        assert!(result.conflict_copy.is_none());
    }

    #[test]
    fn line_union_when_mostly_shared() {
        let merged = merge_text("a\nb\nc\nlocal", "a\nb\nc\nremote", true);
        assert_eq!(merged, "a\nb\nc\nlocal\nremote");
    }

    #[test]
    fn line_union_at_exactly_half_shared() {
        let merged = merge_text("a\nb\nx\ny", "a\nb\nz\nw", false);
        assert_eq!(merged, "a\nb\nx\ny\nz\nw");

        // One shared line out of three is below the threshold
        assert_eq!(merge_text("a\nx\ny", "a\np\nq", false), "a\np\nq");
    }

    #[test]
    fn line_union_keeps_line_endings() {
        let merged = merge_text("a\r\nb\r\nlocal\r\n", "a\r\nb\r\nremote\r\n", true);
        assert_eq!(merged, "a\r\nb\r\nlocal\r\nremote\r\n");

        let merged = merge_text("a\nb\nlocal line\n", "a\nb\nremote", true);
        assert_eq!(merged, "a\nb\nlocal line\nremote\n");
    }

    #[test]
    fn disjoint_text_falls_back_to_lww() {
        assert_eq!(merge_text("one\ntwo", "three\nfour", true), "one\ntwo");
        assert_eq!(merge_text("one\ntwo", "three\nfour", false), "three\nfour");
    }

    #[test]
    fn position_always_local() {
        let local = Task {
            x: 1.0,
            y: 2.0,
            ..task_at("t1", 100)
        };
        let remote = Task {
            x: 500.0,
            y: 600.0,
            ..task_at("t1", 999)
        };
        let result = engine().merge_entity_fields(&local, &remote, &[], NOW);
        assert_eq!((result.merged.x, result.merged.y), (1.0, 2.0));
        assert!(!result.has_conflict);
    }

    #[test]
    fn structural_fields_move_as_group() {
        let local = Task {
            parent_id: Some("a".into()),
            order: 1,
            stage: Some(1),
            ..task_at("t1", 100)
        };
        let remote = Task {
            parent_id: Some("b".into()),
            order: 1,
            rank: 0.5,
            stage: Some(2),
            ..task_at("t1", 200)
        };

        let result = engine().merge_entity_fields(&local, &remote, &[], NOW);
        assert!(result.has_conflict);
        assert_eq!(result.merged.parent_id.as_deref(), Some("b"));
        assert_eq!(result.merged.stage, Some(2));
        assert_eq!(result.merged.rank, 0.5);

        // A lock on any structural field pins the whole group
        let result = engine().merge_entity_fields(&local, &remote, &[TaskField::Rank], NOW);
        assert_eq!(result.merged.parent_id.as_deref(), Some("a"));
        assert_eq!(result.merged.stage, Some(1));
        assert_eq!(result.merged.rank, 0.0);
    }

    #[test]
    fn earliest_tombstone_wins() {
        let local = Task {
            deleted_at: Some(500),
            ..task_at("t1", 100)
        };
        let remote = Task {
            deleted_at: Some(300),
            ..task_at("t1", 900)
        };
        let result = engine().merge_entity_fields(&local, &remote, &[], NOW);
        assert_eq!(result.merged.deleted_at, Some(300));

        let alive = task_at("t1", 900);
        let result = engine().merge_entity_fields(&local, &alive, &[], NOW);
        assert_eq!(result.merged.deleted_at, Some(500));
    }

    #[test]
    fn inputs_are_not_mutated() {
        let local = Task {
            content: "abcdefghijklmnopqrst".into(),
            ..task_at("t1", 100)
        };
        let remote = Task {
            content: "zyxwvutsrqponmlkjihg".into(),
            ..task_at("t1", 200)
        };
        let (local_before, remote_before) = (local.clone(), remote.clone());
        let _ = engine().merge_entity_fields(&local, &remote, &[], NOW);
        assert_eq!(local, local_before);
        assert_eq!(remote, remote_before);
    }

    #[test]
    fn is_real_conflict_bands() {
        let engine = engine();
        // Too short
        assert!(!engine.is_real_conflict("short", "other"));
        // Prefix
        assert!(!engine.is_real_conflict(
            "The quick brown fox jumps",
            "The quick brown fox jumps over the dog"
        ));
        // Near duplicate
        assert!(!engine.is_real_conflict(
            "The quick brown fox jumps over the lazy dog",
            "The quick brown fox jumps over the lazy cat"
        ));
        // Too different
        assert!(!engine.is_real_conflict("aaaaaaaaaaaaaaaaaaaaaaaa", "bbbbbbbbbbbbbbbbbbbbbbbb"));
        // Middle band
        assert!(engine.is_real_conflict("abcdefghijklmnopqrst", "zyxwvutsrqponmlkjihg"));
    }

    #[test]
    fn similarity_scores() {
        assert_eq!(similarity("", ""), 1.0);
        assert_eq!(similarity("abc", "abc"), 1.0);
        assert_eq!(similarity("", "abc"), 0.0);
        // Repeated characters count each time they occur
        assert_eq!(similarity("aab", "abb"), 1.0);
        assert_eq!(similarity("abcx", "abcdef"), 0.5);
        assert_eq!(similarity("abc", "aab"), similarity("aab", "abc"));
        let s = similarity("abcdefghijklmnopqrst", "zyxwvutsrqponmlkjihg");
        assert!((0.3..=0.9).contains(&s));
    }

    #[test]
    fn tag_removal_on_newer_side_sticks() {
        let merged = merge_tag_set(&tags(&["a", "b"]), &tags(&["a"]), 100, 200);
        assert_eq!(merged, tags(&["a"]));
    }

    #[test]
    fn tag_addition_on_newer_side_sticks() {
        let merged = merge_tag_set(&tags(&["a"]), &tags(&["a", "c"]), 100, 200);
        assert_eq!(merged, tags(&["a", "c"]));

        let merged = merge_tag_set(&tags(&["a", "b"]), &tags(&["a", "c"]), 100, 100);
        assert_eq!(merged, tags(&["a", "b", "c"]));
    }

    #[test]
    fn attachment_merge() {
        let a = Attachment::new("a1", "spec.pdf", "s3://a1");
        let b = Attachment::new("b1", "photo.png", "s3://b1");
        let renamed = Attachment::new("a1", "spec-v2.pdf", "s3://a1");

        let merged = merge_attachment_set(
            &[a.clone(), b.clone()],
            std::slice::from_ref(&renamed),
            100,
            200,
        );
        assert_eq!(merged, vec![renamed.clone()]);

        let merged = merge_attachment_set(&[a.clone(), b.clone()], &[renamed], 300, 200);
        assert_eq!(merged, vec![a, b]);
    }

    #[test]
    fn connection_tombstone_is_sticky() {
        let local = Connection {
            updated_at: Some(900),
            ..Connection::new("c1", "a", "b")
        };
        let remote = Connection {
            deleted_at: Some(50),
            updated_at: Some(60),
            ..Connection::new("c1", "a", "b")
        };

        let merged = merge_connection_set(&[local], &[remote]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].deleted_at, Some(50));
    }

    #[test]
    fn connection_description_prefers_non_empty_then_longer() {
        let local = Connection {
            description: "blocks".into(),
            ..Connection::new("c1", "a", "b")
        };
        let remote = Connection {
            description: "blocks release".into(),
            ..Connection::new("c1", "a", "b")
        };
        let empty = Connection::new("c1", "a", "b");

        assert_eq!(
            merge_connection_set(&[local.clone()], &[remote])[0].description,
            "blocks release"
        );
        assert_eq!(
            merge_connection_set(&[local], &[empty])[0].description,
            "blocks"
        );
    }

    #[test]
    fn connections_with_shared_endpoints_stay_distinct() {
        let first = Connection::new("c1", "a", "b");
        let second = Connection::new("c2", "a", "b");
        let merged = merge_connection_set(&[first], &[second]);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn project_merge_collects_copies_and_passes_through() {
        let local = Project::new("p1", "Local")
            .with_task(Task {
                content: "abcdefghijklmnopqrst".into(),
                ..task_at("t1", 100)
            })
            .with_task(task_at("only-local", 100))
            .with_task(task_at("same", 50));
        let remote = Project {
            version: 4,
            ..Project::new("p1", "Remote")
                .with_task(Task {
                    content: "zyxwvutsrqponmlkjihg".into(),
                    ..task_at("t1", 200)
                })
                .with_task(task_at("only-remote", 100))
                .with_task(task_at("same", 50))
        };

        let result = engine().merge_project(&local, &remote, &NoLocks, NOW);
        let ids: Vec<&str> = result.project.tasks.iter().map(|t| t.id.as_str()).collect();

        assert_eq!(ids.len(), 5);
        assert_eq!(&ids[..4], &["t1", "only-local", "same", "only-remote"]);
        assert_eq!(result.project.version, 4);
        assert_eq!(result.conflicted, vec!["t1".to_string()]);
        assert_eq!(result.project.task("same").unwrap().updated_at, Some(50));

        match &result.notices[..] {
            [Notice::ConflictCopyCreated {
                copy_id,
                source_id,
                local_length,
                remote_length,
            }] => {
                assert_eq!(copy_id, ids[4]);
                assert_eq!(source_id, "t1");
                assert_eq!((*local_length, *remote_length), (20, 20));
            }
            other => panic!("unexpected notices: {other:?}"),
        }
    }

    // Property-based tests using proptest
    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        fn arb_task() -> impl Strategy<Value = Task> {
            (
                "[a-z ]{0,40}",
                "[a-z ]{0,40}",
                proptest::collection::vec("[a-e]", 0..4),
                proptest::option::of(0u64..1000),
                0u64..1000,
                -100i64..100,
            )
                .prop_map(|(title, content, tags, deleted_at, updated_at, order)| Task {
                    title,
                    content,
                    tags,
                    deleted_at,
                    order,
                    updated_at: Some(updated_at),
                    ..Task::new("t1", "")
                })
        }

        fn arb_field() -> impl Strategy<Value = TaskField> {
            prop_oneof![
                Just(TaskField::Title),
                Just(TaskField::Content),
                Just(TaskField::Tags),
                Just(TaskField::Order),
                Just(TaskField::DeletedAt),
            ]
        }

        fn field_value(task: &Task, field: TaskField) -> String {
            match field {
                TaskField::Title => task.title.clone(),
                TaskField::Content => task.content.clone(),
                TaskField::Tags => task.tags.join(","),
                TaskField::Order => task.order.to_string(),
                TaskField::DeletedAt => format!("{:?}", task.deleted_at),
                other => unreachable!("not generated: {other}"),
            }
        }

        proptest! {
            #[test]
            fn prop_merge_with_self_is_identity(task in arb_task()) {
                let result = MergeEngine::default().merge_entity_fields(&task, &task, &[], NOW);
                prop_assert!(!result.has_conflict);
                prop_assert_eq!(result.merged, Task { updated_at: Some(NOW), ..task });
            }

            #[test]
            fn prop_locked_field_equals_local(
                local in arb_task(),
                remote in arb_task(),
                field in arb_field(),
            ) {
                let result = MergeEngine::default().merge_entity_fields(&local, &remote, &[field], NOW);
                prop_assert_eq!(field_value(&result.merged, field), field_value(&local, field));
            }

            #[test]
            fn prop_real_conflict_preserves_both_sides(local in arb_task(), remote in arb_task()) {
                let engine = MergeEngine::default();
                let result = engine.merge_entity_fields(&local, &remote, &[], NOW);
                if local.content != remote.content
                    && engine.is_real_conflict(&local.content, &remote.content)
                {
                    prop_assert_eq!(&result.merged.content, &remote.content);
                    let copy = result.conflict_copy.expect("copy");
                    prop_assert_eq!(copy.content, local.content);
                } else {
                    prop_assert!(result.conflict_copy.is_none());
                }
            }

            #[test]
            fn prop_similarity_symmetric_and_bounded(a in "[a-f]{0,30}", b in "[a-f]{0,30}") {
                let ab = similarity(&a, &b);
                prop_assert_eq!(ab, similarity(&b, &a));
                prop_assert!((0.0..=1.0).contains(&ab));
            }

            #[test]
            fn prop_single_tombstone_sticks(
                local_time in 0u64..1000,
                remote_time in 0u64..1000,
                deleted_at in 0u64..1000,
                local_deleted in any::<bool>(),
            ) {
                let alive = Connection::new("c1", "a", "b");
                let dead = Connection { deleted_at: Some(deleted_at), ..alive.clone() };
                let (mut local, mut remote) = if local_deleted {
                    (dead, alive)
                } else {
                    (alive, dead)
                };
                local.updated_at = Some(local_time);
                remote.updated_at = Some(remote_time);

                let merged = merge_connection_set(&[local], &[remote]);
                prop_assert_eq!(merged[0].deleted_at, Some(deleted_at));
            }
        }
    }
}
