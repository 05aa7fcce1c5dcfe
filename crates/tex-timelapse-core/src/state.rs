//! The project aggregate plus client-side selection.
//!
//! `ProjectState` is the synchronous heart of the store: every mutation goes
//! through one of its methods, each of which reports whether anything
//! actually changed so the caller knows what to publish. It does no I/O and
//! knows nothing about subscribers.
//!
//! The project is held behind an [`Arc`] and mutated copy-on-write
//! ([`Arc::make_mut`]), so values already handed to readers are never
//! modified underneath them.
//!
//! `revision` increases by one on every applied mutation of the aggregate
//! (load, merge, reset, config change). Selection changes do not bump it.

use std::sync::Arc;

use crate::models::{Project, ProjectConfig, Snapshot};

/// Result of merging a snapshot into the aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// No project is loaded.
    NoProject,
    /// The project has no snapshot with that identifier.
    UnknownSnapshot,
    /// Replaced in place; `selected` says whether it is the current selection.
    Updated { selected: bool },
}

impl MergeOutcome {
    pub fn applied(self) -> bool {
        matches!(self, MergeOutcome::Updated { .. })
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProjectState {
    project: Option<Arc<Project>>,
    selected: Option<String>,
    revision: u64,
}

impl ProjectState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn project(&self) -> Option<&Arc<Project>> {
        self.project.as_ref()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn selected_id(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn selected(&self) -> Option<&Snapshot> {
        let id = self.selected.as_deref()?;
        self.project.as_ref()?.snapshot(id)
    }

    /// Replace the aggregate wholesale and select the first snapshot in
    /// commit order.
    ///
    /// Returns `false` (and changes nothing, selection included) when the
    /// loaded project already has identical content.
    pub fn load(&mut self, project: Project) -> bool {
        if self.project.as_deref() == Some(&project) {
            return false;
        }
        self.selected = project.first_chronological().map(|s| s.id.clone());
        self.project = Some(Arc::new(project));
        self.revision += 1;
        true
    }

    /// Select by identifier. Unknown identifiers clear the selection.
    ///
    /// Returns whether the selection changed.
    pub fn select(&mut self, id: &str) -> bool {
        let next = self
            .project
            .as_ref()
            .and_then(|p| p.snapshot(id))
            .map(|s| s.id.clone());
        if next == self.selected {
            return false;
        }
        self.selected = next;
        true
    }

    /// Replace the stored snapshot with the same identifier, in place.
    pub fn merge(&mut self, snapshot: Snapshot) -> MergeOutcome {
        let Some(project) = self.project.as_mut() else {
            return MergeOutcome::NoProject;
        };
        let Some(index) = project.index_of(&snapshot.id) else {
            return MergeOutcome::UnknownSnapshot;
        };
        let selected = self.selected.as_deref() == Some(snapshot.id.as_str());
        Arc::make_mut(project).snapshots[index] = snapshot;
        self.revision += 1;
        MergeOutcome::Updated { selected }
    }

    /// Rewind every snapshot to its initial state. Returns `false` when no
    /// project is loaded.
    pub fn reset_all(&mut self) -> bool {
        let Some(project) = self.project.as_mut() else {
            return false;
        };
        for snapshot in &mut Arc::make_mut(project).snapshots {
            snapshot.reset_all();
        }
        self.revision += 1;
        true
    }

    /// Replace the configuration. Returns `false` when no project is loaded
    /// or the configuration is unchanged.
    pub fn set_config(&mut self, config: ProjectConfig) -> bool {
        let Some(project) = self.project.as_mut() else {
            return false;
        };
        if project.config == config {
            return false;
        }
        Arc::make_mut(project).config = config;
        self.revision += 1;
        true
    }
}
