//! The client's single source of truth for the open project.
//!
//! [`StateStore`] owns a [`ProjectState`] and publishes it on two streams:
//!
//! | Stream | Emits |
//! |--------|-------|
//! | [`subscribe_project`](StateStore::subscribe_project) | every applied mutation of the aggregate |
//! | [`subscribe_selection`](StateStore::subscribe_selection) | every selection change, and every in-place update of the selected snapshot |
//!
//! Three things mutate the aggregate:
//!
//! 1. **Loads** replace it wholesale (a load with identical content is a no-op).
//! 2. **Command responses** (`request_compile`, `request_reset`) merge the
//!    returned snapshot by identity. Concurrent requests for the same
//!    snapshot race; whichever response arrives last wins.
//! 3. **Push events** (`on_push`) merge the pushed snapshot the same way.
//!
//! `request_project_reset` is the one optimistic write: after the backend
//! accepts, every snapshot is rewound locally, and the render worker's push
//! events confirm each one afterwards.
//!
//! No public mutation returns an error. Failures are logged, recorded for
//! [`last_error`](StateStore::last_error), and reported as `false`; the
//! aggregate is left exactly as it was.
//!
//! The state lock is a plain `std::sync::Mutex` that is never held across
//! an `.await`. Emissions happen while it is held, so every subscriber sees
//! mutations in the order they were applied.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Error;

use tex_timelapse_core::backend::{ApiRejection, Backend};
use tex_timelapse_core::events::PushEvent;
use tex_timelapse_core::models::{Project, ProjectConfig, Snapshot, Stage};
use tex_timelapse_core::state::{MergeOutcome, ProjectState};

use crate::config_sync::ConfigSync;
use crate::observable::{Observable, Subscription};

/// One emission of the project stream.
#[derive(Debug, Clone)]
pub struct ProjectUpdate {
    /// Increases with every applied mutation.
    pub revision: u64,
    /// Read-only view; `None` until a project is loaded.
    pub project: Option<Arc<Project>>,
}

pub struct StateStore {
    backend: Arc<dyn Backend>,
    state: Mutex<ProjectState>,
    pending: Mutex<HashMap<String, usize>>,
    last_error: Mutex<Option<String>>,
    project_stream: Observable<ProjectUpdate>,
    selection_stream: Observable<Option<Snapshot>>,
    config_sync: Mutex<Option<ConfigSync>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Decrements the pending counter for a snapshot when dropped.
struct PendingGuard<'a> {
    store: &'a StateStore,
    id: String,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        let mut pending = lock(&self.store.pending);
        if let Some(n) = pending.get_mut(&self.id) {
            *n -= 1;
            if *n == 0 {
                pending.remove(&self.id);
            }
        }
    }
}

impl StateStore {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            state: Mutex::new(ProjectState::new()),
            pending: Mutex::new(HashMap::new()),
            last_error: Mutex::new(None),
            project_stream: Observable::new(ProjectUpdate {
                revision: 0,
                project: None,
            }),
            selection_stream: Observable::new(None),
            config_sync: Mutex::new(None),
        }
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// Route [`update_config`](Self::update_config) edits through `sync`.
    pub fn attach_config_sync(&self, sync: ConfigSync) {
        *lock(&self.config_sync) = Some(sync);
    }

    /// Detach the uploader, if any, so the caller can flush and stop it.
    pub fn detach_config_sync(&self) -> Option<ConfigSync> {
        lock(&self.config_sync).take()
    }

    // ═══════════════════════════════════════════════════════════════════
    // Reads
    // ═══════════════════════════════════════════════════════════════════

    pub fn project(&self) -> Option<Arc<Project>> {
        lock(&self.state).project().cloned()
    }

    pub fn project_name(&self) -> Option<String> {
        lock(&self.state).project().map(|p| p.name.clone())
    }

    pub fn selected(&self) -> Option<Snapshot> {
        lock(&self.state).selected().cloned()
    }

    pub fn selected_id(&self) -> Option<String> {
        lock(&self.state).selected_id().map(str::to_string)
    }

    pub fn revision(&self) -> u64 {
        lock(&self.state).revision()
    }

    /// Message of the most recent failed operation.
    pub fn last_error(&self) -> Option<String> {
        lock(&self.last_error).clone()
    }

    /// True while a compile or reset request for `id` is outstanding.
    pub fn is_pending(&self, id: &str) -> bool {
        lock(&self.pending).contains_key(id)
    }

    pub fn pending_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock(&self.pending).keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn subscribe_project(&self) -> Subscription<ProjectUpdate> {
        self.project_stream.subscribe()
    }

    pub fn subscribe_selection(&self) -> Subscription<Option<Snapshot>> {
        self.selection_stream.subscribe()
    }

    // ═══════════════════════════════════════════════════════════════════
    // Local mutations
    // ═══════════════════════════════════════════════════════════════════

    /// Fetch `name` from the backend and load it.
    pub async fn load_project(&self, name: &str) -> bool {
        match self.backend.get_project(name).await {
            Ok(project) => {
                self.set_project(project);
                true
            }
            Err(e) => {
                self.record_failure("load", name, &e);
                false
            }
        }
    }

    /// Replace the aggregate and reset the selection to the earliest
    /// snapshot. Returns `false` if the content was already loaded.
    pub fn set_project(&self, project: Project) -> bool {
        let mut state = lock(&self.state);
        if !state.load(project) {
            tracing::debug!("project unchanged; load skipped");
            return false;
        }
        self.publish_project(&state);
        self.publish_selection(&state);
        true
    }

    /// Select by identifier. Unknown identifiers clear the selection.
    pub fn select_snapshot(&self, id: &str) {
        let mut state = lock(&self.state);
        if state.select(id) {
            if state.selected_id().is_none() {
                tracing::debug!(id, "selected unknown snapshot; selection cleared");
            }
            self.publish_selection(&state);
        }
    }

    /// Replace the project configuration and queue it for upload.
    pub fn update_config(&self, config: ProjectConfig) -> bool {
        let name = {
            let mut state = lock(&self.state);
            if !state.set_config(config.clone()) {
                return false;
            }
            self.publish_project(&state);
            state.project().map(|p| p.name.clone())
        };
        if let (Some(name), Some(sync)) = (name, lock(&self.config_sync).as_ref()) {
            sync.schedule(&name, config);
        }
        true
    }

    // ═══════════════════════════════════════════════════════════════════
    // Backend commands
    // ═══════════════════════════════════════════════════════════════════

    /// Compile one snapshot and merge the backend's answer.
    pub async fn request_compile(&self, id: &str) -> bool {
        let Some(project) = self.require_project("compile", id) else {
            return false;
        };
        let _pending = self.mark_pending(id);
        match self.backend.compile_snapshot(&project, id).await {
            Ok(snapshot) => {
                self.apply_response(&project, id, snapshot);
                true
            }
            Err(e) => {
                self.record_failure("compile", id, &e);
                false
            }
        }
    }

    /// Rewind one stage and everything after it, or all stages.
    pub async fn request_reset(&self, id: &str, stage: Option<Stage>) -> bool {
        let Some(project) = self.require_project("reset", id) else {
            return false;
        };
        let _pending = self.mark_pending(id);
        match self.backend.reset_snapshot(&project, id, stage).await {
            Ok(snapshot) => {
                self.apply_response(&project, id, snapshot);
                true
            }
            Err(e) => {
                self.record_failure("reset", id, &e);
                false
            }
        }
    }

    /// Rewind the whole project; on acceptance every snapshot is reset
    /// locally without waiting for per-snapshot confirmation.
    pub async fn request_project_reset(&self) -> bool {
        let Some(project) = self.require_project("project reset", "*") else {
            return false;
        };
        match self.backend.reset_project(&project).await {
            Ok(()) => {
                let mut state = lock(&self.state);
                if state.project().map(|p| p.name.as_str()) != Some(project.as_str()) {
                    tracing::warn!(project = %project, "project changed before reset completed");
                    return true;
                }
                if state.reset_all() {
                    self.publish_project(&state);
                    self.publish_selection(&state);
                }
                true
            }
            Err(e) => {
                self.record_failure("project reset", &project, &e);
                false
            }
        }
    }

    /// Ask the backend to render every snapshot. Results arrive as push
    /// events; the aggregate is not touched here.
    pub async fn request_render(&self) -> bool {
        let Some(project) = self.require_project("render", "*") else {
            return false;
        };
        match self.backend.render_project(&project).await {
            Ok(()) => true,
            Err(e) => {
                self.record_failure("render", &project, &e);
                false
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════
    // Push events
    // ═══════════════════════════════════════════════════════════════════

    /// Apply an out-of-band event. Returns whether the aggregate changed.
    pub fn on_push(&self, event: PushEvent) -> bool {
        let snapshot = match event {
            PushEvent::AddProgress { snapshot } => snapshot,
            other => {
                tracing::debug!(event = ?other, "telemetry event ignored by store");
                return false;
            }
        };
        let id = snapshot.id.clone();
        let mut state = lock(&self.state);
        match state.merge(snapshot) {
            MergeOutcome::Updated { selected } => {
                self.publish_project(&state);
                if selected {
                    self.publish_selection(&state);
                }
                true
            }
            MergeOutcome::UnknownSnapshot => {
                tracing::warn!(id = %id, "push for unknown snapshot dropped");
                false
            }
            MergeOutcome::NoProject => {
                tracing::warn!(id = %id, "push before any project was loaded dropped");
                false
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════
    // Internals
    // ═══════════════════════════════════════════════════════════════════

    fn publish_project(&self, state: &ProjectState) {
        self.project_stream.emit(ProjectUpdate {
            revision: state.revision(),
            project: state.project().cloned(),
        });
    }

    fn publish_selection(&self, state: &ProjectState) {
        self.selection_stream.emit(state.selected().cloned());
    }

    fn require_project(&self, op: &str, id: &str) -> Option<String> {
        let name = self.project_name();
        if name.is_none() {
            let msg = format!("cannot {} {}: no project loaded", op, id);
            tracing::warn!("{}", msg);
            *lock(&self.last_error) = Some(msg);
        }
        name
    }

    fn mark_pending(&self, id: &str) -> PendingGuard<'_> {
        *lock(&self.pending).entry(id.to_string()).or_insert(0) += 1;
        PendingGuard {
            store: self,
            id: id.to_string(),
        }
    }

    fn apply_response(&self, project: &str, requested: &str, snapshot: Snapshot) {
        if snapshot.id != requested {
            tracing::warn!(
                requested,
                returned = %snapshot.id,
                "backend answered for a different snapshot; merging by returned id"
            );
        }
        let mut state = lock(&self.state);
        if state.project().map(|p| p.name.as_str()) != Some(project) {
            tracing::warn!(project, id = %snapshot.id, "project changed before response arrived; dropped");
            return;
        }
        let id = snapshot.id.clone();
        match state.merge(snapshot) {
            MergeOutcome::Updated { selected } => {
                self.publish_project(&state);
                if selected {
                    self.publish_selection(&state);
                }
            }
            outcome => {
                tracing::warn!(id = %id, ?outcome, "response for snapshot not in project; dropped");
            }
        }
    }

    fn record_failure(&self, op: &str, target: &str, e: &Error) {
        let detail = format!("{:#}", e);
        if let Some(rejection) = e.downcast_ref::<ApiRejection>() {
            tracing::warn!(op, target, error = %rejection, "backend refused request");
        } else {
            tracing::warn!(op, target, error = %detail, "request failed");
        }
        *lock(&self.last_error) = Some(format!("{} {} failed: {}", op, target, detail));
    }
}
