//! Task graph data model.
//!
//! Entities arrive from the remote store as whole rows, so every type here is
//! a plain value: cloneable, serializable, and comparable field by field.

use crate::{ConnectionId, ProjectId, TaskId, Timestamp, Version};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Workflow status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Active,
    Completed,
    Archived,
}

/// Priority of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

/// A file attached to a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    /// Stable attachment id, the merge key
    pub id: String,
    /// Display name
    pub name: String,
    /// Where the file lives
    pub url: String,
    /// Size in bytes, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl Attachment {
    /// Create an attachment without a known size.
    pub fn new(id: impl Into<String>, name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            url: url.into(),
            size: None,
        }
    }
}

/// Fields of a [`Task`] that can be locked, diffed, or reported as changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskField {
    Title,
    Content,
    Status,
    Priority,
    DueDate,
    Tags,
    Attachments,
    Stage,
    ParentId,
    Order,
    Rank,
    X,
    Y,
    DeletedAt,
}

impl TaskField {
    /// Structural placement fields. They always move together during a merge.
    pub const STRUCTURAL: [TaskField; 4] = [
        TaskField::Stage,
        TaskField::ParentId,
        TaskField::Order,
        TaskField::Rank,
    ];

    /// Canvas position fields.
    pub const POSITION: [TaskField; 2] = [TaskField::X, TaskField::Y];

    /// Wire name of the field.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskField::Title => "title",
            TaskField::Content => "content",
            TaskField::Status => "status",
            TaskField::Priority => "priority",
            TaskField::DueDate => "dueDate",
            TaskField::Tags => "tags",
            TaskField::Attachments => "attachments",
            TaskField::Stage => "stage",
            TaskField::ParentId => "parentId",
            TaskField::Order => "order",
            TaskField::Rank => "rank",
            TaskField::X => "x",
            TaskField::Y => "y",
            TaskField::DeletedAt => "deletedAt",
        }
    }

    pub fn is_structural(&self) -> bool {
        Self::STRUCTURAL.contains(self)
    }

    pub fn is_position(&self) -> bool {
        Self::POSITION.contains(self)
    }
}

impl fmt::Display for TaskField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A node in the task graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Stable identifier, never changes
    pub id: TaskId,
    pub title: String,
    /// Long-form markdown body
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub due_date: Option<Timestamp>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Column/stage the task sits in
    #[serde(default)]
    pub stage: Option<u32>,
    #[serde(default)]
    pub parent_id: Option<TaskId>,
    /// Position among siblings
    #[serde(default)]
    pub order: i64,
    /// Fractional rank used by the structural layer
    #[serde(default)]
    pub rank: f64,
    /// Canvas position, client-local
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    /// Tombstone timestamp
    #[serde(default)]
    pub deleted_at: Option<Timestamp>,
    /// Last-write timestamp used for LWW
    #[serde(default)]
    pub updated_at: Option<Timestamp>,
}

impl Task {
    /// Create a live task with empty content and default placement.
    pub fn new(id: impl Into<TaskId>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            content: String::new(),
            status: TaskStatus::Active,
            priority: None,
            due_date: None,
            tags: Vec::new(),
            attachments: Vec::new(),
            stage: None,
            parent_id: None,
            order: 0,
            rank: 0.0,
            x: 0.0,
            y: 0.0,
            deleted_at: None,
            updated_at: None,
        }
    }

    /// Check if the task is live (not tombstoned).
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }

    /// LWW timestamp; a missing timestamp counts as the epoch.
    pub fn updated_time(&self) -> Timestamp {
        self.updated_at.unwrap_or(0)
    }

    /// Fields whose values differ between `self` and `other`.
    ///
    /// `updated_at` and `id` are not reported.
    pub fn changed_fields(&self, other: &Task) -> Vec<TaskField> {
        let mut changed = Vec::new();
        let mut check = |field, differs: bool| {
            if differs {
                changed.push(field);
            }
        };
        check(TaskField::Title, self.title != other.title);
        check(TaskField::Content, self.content != other.content);
        check(TaskField::Status, self.status != other.status);
        check(TaskField::Priority, self.priority != other.priority);
        check(TaskField::DueDate, self.due_date != other.due_date);
        check(TaskField::Tags, self.tags != other.tags);
        check(TaskField::Attachments, self.attachments != other.attachments);
        check(TaskField::Stage, self.stage != other.stage);
        check(TaskField::ParentId, self.parent_id != other.parent_id);
        check(TaskField::Order, self.order != other.order);
        check(TaskField::Rank, self.rank != other.rank);
        check(TaskField::X, self.x != other.x);
        check(TaskField::Y, self.y != other.y);
        check(TaskField::DeletedAt, self.deleted_at != other.deleted_at);
        changed
    }
}

/// A non-hierarchical edge between two tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    /// Primary merge key. Two edges may share endpoints.
    #[serde(default)]
    pub id: ConnectionId,
    pub source: TaskId,
    pub target: TaskId,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub deleted_at: Option<Timestamp>,
    #[serde(default)]
    pub updated_at: Option<Timestamp>,
}

impl Connection {
    /// Create a live connection.
    pub fn new(
        id: impl Into<ConnectionId>,
        source: impl Into<TaskId>,
        target: impl Into<TaskId>,
    ) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            description: String::new(),
            deleted_at: None,
            updated_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }

    pub fn updated_time(&self) -> Timestamp {
        self.updated_at.unwrap_or(0)
    }

    /// Identity used when merging edge sets.
    ///
    /// Rows written by older clients may lack an id; only then is the
    /// endpoint pair used.
    pub fn merge_key(&self) -> String {
        if self.id.is_empty() {
            format!("{}|{}", self.source, self.target)
        } else {
            self.id.clone()
        }
    }

    /// Names of fields whose values differ between `self` and `other`.
    pub fn changed_fields(&self, other: &Connection) -> Vec<&'static str> {
        let mut changed = Vec::new();
        if self.source != other.source {
            changed.push("source");
        }
        if self.target != other.target {
            changed.push("target");
        }
        if self.description != other.description {
            changed.push("description");
        }
        if self.deleted_at != other.deleted_at {
            changed.push("deletedAt");
        }
        changed
    }
}

/// Aggregate root holding the task and connection collections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: ProjectId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub connections: Vec<Connection>,
    /// Remote-committed version, advanced only by the remote store
    #[serde(default)]
    pub version: Version,
    #[serde(default)]
    pub updated_at: Option<Timestamp>,
}

impl Project {
    /// Create an empty project at version 0.
    pub fn new(id: impl Into<ProjectId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            tasks: Vec::new(),
            connections: Vec::new(),
            version: 0,
            updated_at: None,
        }
    }

    /// Builder helper for tests and fixtures.
    pub fn with_task(mut self, task: Task) -> Self {
        self.tasks.push(task);
        self
    }

    /// Builder helper for tests and fixtures.
    pub fn with_connection(mut self, connection: Connection) -> Self {
        self.connections.push(connection);
        self
    }

    /// Get a task by id, including tombstoned ones.
    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn task_mut(&mut self, id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    /// Get a connection by id, including tombstoned ones.
    pub fn connection(&self, id: &str) -> Option<&Connection> {
        self.connections.iter().find(|c| c.id == id)
    }

    pub fn connection_mut(&mut self, id: &str) -> Option<&mut Connection> {
        self.connections.iter_mut().find(|c| c.id == id)
    }

    /// Live tasks.
    pub fn active_tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter().filter(|t| t.is_active())
    }

    /// Live connections.
    pub fn active_connections(&self) -> impl Iterator<Item = &Connection> {
        self.connections.iter().filter(|c| c.is_active())
    }
}
