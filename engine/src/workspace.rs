//! The shared project collection and its persisted form.
//!
//! A [`Workspace`] is the unit that snapshots capture, rollbacks restore and
//! the local autosave writes. Projects are kept in a `BTreeMap` so the JSON
//! form is deterministic.

use crate::{error::Result, Error, Project, ProjectId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Version of the persisted workspace format.
pub const WORKSPACE_FORMAT_VERSION: u32 = 1;

/// All projects plus the currently active project id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workspace {
    /// Persisted format version
    pub format_version: u32,
    /// Projects keyed by id
    pub projects: BTreeMap<ProjectId, Project>,
    /// Project the editor is currently showing
    pub active_project_id: Option<ProjectId>,
}

impl Default for Workspace {
    fn default() -> Self {
        Self::new()
    }
}

impl Workspace {
    /// Create an empty workspace.
    pub fn new() -> Self {
        Self {
            format_version: WORKSPACE_FORMAT_VERSION,
            projects: BTreeMap::new(),
            active_project_id: None,
        }
    }

    /// Insert (or replace) a project.
    pub fn insert_project(&mut self, project: Project) {
        self.projects.insert(project.id.clone(), project);
    }

    /// Insert a project and make it active.
    pub fn with_active_project(mut self, project: Project) -> Self {
        self.active_project_id = Some(project.id.clone());
        self.insert_project(project);
        self
    }

    pub fn project(&self, id: &str) -> Option<&Project> {
        self.projects.get(id)
    }

    pub fn project_mut(&mut self, id: &str) -> Option<&mut Project> {
        self.projects.get_mut(id)
    }

    /// The active project, if one is selected and present.
    pub fn active_project(&self) -> Option<&Project> {
        self.active_project_id
            .as_deref()
            .and_then(|id| self.projects.get(id))
    }

    /// Mutable access to the active project.
    pub fn active_project_mut(&mut self) -> Result<&mut Project> {
        let id = self
            .active_project_id
            .as_deref()
            .ok_or(Error::NoActiveProject)?;
        self.projects
            .get_mut(id)
            .ok_or_else(|| Error::ProjectNotFound(id.to_string()))
    }

    /// Total number of tasks, including tombstones.
    pub fn task_count(&self) -> usize {
        self.projects.values().map(|p| p.tasks.len()).sum()
    }

    /// Check internal consistency.
    pub fn validate(&self) -> Result<()> {
        if let Some(id) = &self.active_project_id {
            if !self.projects.contains_key(id) {
                return Err(Error::InvalidWorkspace(format!(
                    "active project '{id}' is not in the workspace"
                )));
            }
        }

        for (key, project) in &self.projects {
            if key != &project.id {
                return Err(Error::InvalidWorkspace(format!(
                    "project stored under '{key}' has id '{}'",
                    project.id
                )));
            }
        }

        Ok(())
    }

    /// Serialize to JSON with deterministic ordering.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidWorkspace(e.to_string()))
    }

    /// Serialize to pretty JSON with deterministic ordering.
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::InvalidWorkspace(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let workspace: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidWorkspace(e.to_string()))?;
        workspace.ensure_loadable()?;
        Ok(workspace)
    }

    /// Reject workspaces written by a newer format, then validate.
    ///
    /// Use this when the workspace was deserialized as part of a larger
    /// document instead of through [`Workspace::from_json`].
    pub fn ensure_loadable(&self) -> Result<()> {
        if self.format_version > WORKSPACE_FORMAT_VERSION {
            return Err(Error::InvalidWorkspace(format!(
                "unsupported workspace format version: {} (max supported: {})",
                self.format_version, WORKSPACE_FORMAT_VERSION
            )));
        }
        self.validate()
    }
}

/// Strategy for producing a fully independent copy of a workspace.
pub trait WorkspaceCloner: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    fn clone_workspace(&self, workspace: &Workspace) -> Result<Workspace>;
}

/// Native deep clone. Owned data means the copy shares nothing with the
/// original.
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuralClone;

impl WorkspaceCloner for StructuralClone {
    fn name(&self) -> &'static str {
        "structural"
    }

    fn clone_workspace(&self, workspace: &Workspace) -> Result<Workspace> {
        Ok(workspace.clone())
    }
}

/// Clone through the persisted JSON form.
///
/// This is the same path the autosave uses, so a successful clone also
/// proves the state can be written to disk. Non-finite coordinates do not
/// survive JSON and make this strategy fail.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonClone;

impl WorkspaceCloner for JsonClone {
    fn name(&self) -> &'static str {
        "json"
    }

    fn clone_workspace(&self, workspace: &Workspace) -> Result<Workspace> {
        let json = serde_json::to_string(workspace).map_err(|e| Error::Clone(e.to_string()))?;
        serde_json::from_str(&json).map_err(|e| Error::Clone(e.to_string()))
    }
}

/// Metadata about a workspace (without the full data).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceMetadata {
    pub format_version: u32,
    pub project_count: usize,
    pub task_count: usize,
    pub active_project_id: Option<ProjectId>,
}

impl From<&Workspace> for WorkspaceMetadata {
    fn from(workspace: &Workspace) -> Self {
        Self {
            format_version: workspace.format_version,
            project_count: workspace.projects.len(),
            task_count: workspace.task_count(),
            active_project_id: workspace.active_project_id.clone(),
        }
    }
}
