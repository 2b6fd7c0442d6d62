//! Entity-level change log produced by recorded mutations.

use crate::{Connection, Project, ProjectId, Task, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Which kind of entity changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Task,
    Connection,
}

/// What happened to the entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
    Create,
    Update,
    Delete,
}

/// One entry of the change log drained by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityChange {
    pub project_id: ProjectId,
    pub entity: EntityKind,
    pub id: String,
    pub kind: ChangeOp,
    /// Changed field names; empty for creates and physical removals
    pub fields: Vec<String>,
}

/// The mutable part of a project captured around a mutation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectState {
    pub tasks: Vec<Task>,
    pub connections: Vec<Connection>,
}

impl ProjectState {
    pub fn capture(project: &Project) -> Self {
        Self {
            tasks: project.tasks.clone(),
            connections: project.connections.clone(),
        }
    }

    /// Overwrite the project's tasks and connections with this state.
    pub fn restore_into(&self, project: &mut Project) {
        project.tasks = self.tasks.clone();
        project.connections = self.connections.clone();
    }
}

/// Diff two captures of the same project.
///
/// A newly set tombstone is reported as a delete, as is an entity that
/// vanished outright.
pub fn diff_states(project_id: &str, before: &ProjectState, after: &ProjectState) -> Vec<EntityChange> {
    let mut changes = Vec::new();
    let change = |entity, id: &str, kind, fields: Vec<String>| EntityChange {
        project_id: project_id.to_string(),
        entity,
        id: id.to_string(),
        kind,
        fields,
    };

    let old_tasks: HashMap<&str, &Task> = before.tasks.iter().map(|t| (t.id.as_str(), t)).collect();
    let new_tasks: HashMap<&str, &Task> = after.tasks.iter().map(|t| (t.id.as_str(), t)).collect();

    for task in &after.tasks {
        match old_tasks.get(task.id.as_str()) {
            None => changes.push(change(EntityKind::Task, &task.id, ChangeOp::Create, Vec::new())),
            Some(old) => {
                let fields = old.changed_fields(task);
                if fields.is_empty() {
                    continue;
                }
                let kind = tombstone_op(old.deleted_at, task.deleted_at);
                let fields = fields.iter().map(|f| f.as_str().to_string()).collect();
                changes.push(change(EntityKind::Task, &task.id, kind, fields));
            }
        }
    }
    for task in &before.tasks {
        if !new_tasks.contains_key(task.id.as_str()) {
            changes.push(change(EntityKind::Task, &task.id, ChangeOp::Delete, Vec::new()));
        }
    }

    let old_edges: HashMap<String, &Connection> =
        before.connections.iter().map(|c| (c.merge_key(), c)).collect();
    let new_edges: HashMap<String, &Connection> =
        after.connections.iter().map(|c| (c.merge_key(), c)).collect();

    for edge in &after.connections {
        let key = edge.merge_key();
        match old_edges.get(&key) {
            None => changes.push(change(EntityKind::Connection, &key, ChangeOp::Create, Vec::new())),
            Some(old) => {
                let fields = old.changed_fields(edge);
                if fields.is_empty() {
                    continue;
                }
                let kind = tombstone_op(old.deleted_at, edge.deleted_at);
                let fields = fields.into_iter().map(str::to_string).collect();
                changes.push(change(EntityKind::Connection, &key, kind, fields));
            }
        }
    }
    for edge in &before.connections {
        let key = edge.merge_key();
        if !new_edges.contains_key(&key) {
            changes.push(change(EntityKind::Connection, &key, ChangeOp::Delete, Vec::new()));
        }
    }

    changes
}

/// Stamp tasks and connections that differ from `previous` with `now`.
pub(crate) fn stamp_changed(previous: &ProjectState, project: &mut Project, now: Timestamp) {
    let old_tasks: HashMap<&str, &Task> = previous.tasks.iter().map(|t| (t.id.as_str(), t)).collect();
    for task in &mut project.tasks {
        let differs = old_tasks
            .get(task.id.as_str())
            .map_or(true, |old| !old.changed_fields(task).is_empty());
        if differs {
            task.updated_at = Some(now);
        }
    }

    let old_edges: HashMap<String, &Connection> =
        previous.connections.iter().map(|c| (c.merge_key(), c)).collect();
    for edge in &mut project.connections {
        let differs = old_edges
            .get(&edge.merge_key())
            .map_or(true, |old| !old.changed_fields(edge).is_empty());
        if differs {
            edge.updated_at = Some(now);
        }
    }
}

fn tombstone_op<T>(before: Option<T>, after: Option<T>) -> ChangeOp {
    if before.is_none() && after.is_some() {
        ChangeOp::Delete
    } else {
        ChangeOp::Update
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(tasks: Vec<Task>, connections: Vec<Connection>) -> ProjectState {
        ProjectState { tasks, connections }
    }

    #[test]
    fn detects_create_update_delete() {
        let before = state(
            vec![Task::new("a", "A"), Task::new("b", "B"), Task::new("c", "C")],
            vec![Connection::new("e1", "a", "b")],
        );
        let mut after = before.clone();
        after.tasks[0].title = "A2".into();
        after.tasks[0].x = 12.0;
        after.tasks[1].deleted_at = Some(5);
        after.tasks.remove(2);
        after.tasks.push(Task::new("d", "D"));
        after.connections[0].description = "blocks".into();

        let changes = diff_states("p1", &before, &after);
        let summary: Vec<(EntityKind, &str, ChangeOp)> = changes
            .iter()
            .map(|c| (c.entity, c.id.as_str(), c.kind))
            .collect();

        assert_eq!(
            summary,
            vec![
                (EntityKind::Task, "a", ChangeOp::Update),
                (EntityKind::Task, "b", ChangeOp::Delete),
                (EntityKind::Task, "d", ChangeOp::Create),
                (EntityKind::Task, "c", ChangeOp::Delete),
                (EntityKind::Connection, "e1", ChangeOp::Update),
            ]
        );
        assert_eq!(changes[0].fields, vec!["title", "x"]);
        assert_eq!(changes[1].fields, vec!["deletedAt"]);
        assert_eq!(changes[4].fields, vec!["description"]);
        assert!(changes.iter().all(|c| c.project_id == "p1"));
    }

    #[test]
    fn unchanged_state_has_no_changes() {
        let s = state(vec![Task::new("a", "A")], vec![Connection::new("", "a", "b")]);
        assert!(diff_states("p1", &s, &s.clone()).is_empty());
    }

    #[test]
    fn restore_replaces_tasks_and_connections() {
        let mut project = Project::new("p1", "P").with_task(Task::new("a", "A"));
        let saved = ProjectState::capture(&project);
        project.tasks.clear();
        project.connections.push(Connection::new("e", "a", "a"));
        project.version = 4;

        saved.restore_into(&mut project);
        assert_eq!(project.tasks.len(), 1);
        assert!(project.connections.is_empty());
        assert_eq!(project.version, 4);
    }

    #[test]
    fn stamps_only_changed_entities() {
        let before = state(
            vec![Task::new("a", "A"), Task::new("b", "B")],
            vec![Connection::new("e1", "a", "b")],
        );
        let mut project = Project::new("p1", "P");
        before.restore_into(&mut project);
        project.tasks[1].content = "edited".into();
        project.tasks.push(Task::new("c", "C"));

        stamp_changed(&before, &mut project, 99);
        let stamps: Vec<Option<u64>> = project.tasks.iter().map(|t| t.updated_at).collect();
        assert_eq!(stamps, vec![None, Some(99), Some(99)]);
        assert_eq!(project.connections[0].updated_at, None);
    }
}
