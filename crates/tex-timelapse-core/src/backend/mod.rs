//! Backend abstraction for TeX Timelapse.
//!
//! The [`Backend`] trait is everything the state store needs from the
//! render server, enabling pluggable implementations (HTTP in the main
//! crate, in-memory for tests and offline demos).
//!
//! | Method | REST route |
//! |--------|------------|
//! | [`list_projects`](Backend::list_projects) | `GET /api/projects` |
//! | [`get_project`](Backend::get_project) | `GET /api/projects/{name}` |
//! | [`save_config`](Backend::save_config) | `POST /api/projects/{name}` |
//! | [`render_project`](Backend::render_project) | `GET /api/projects/{name}/run` |
//! | [`compile_snapshot`](Backend::compile_snapshot) | `GET /api/projects/{name}/snapshot/{sha}/run` |
//! | [`reset_snapshot`](Backend::reset_snapshot) | `GET /api/projects/{name}/snapshot/{sha}/reset/{stage?}` |
//! | [`reset_project`](Backend::reset_project) | `GET /api/projects/{name}/reset` |
//!
//! Every method distinguishes two failure kinds through the returned
//! `anyhow::Error`: transport/parse failures, and [`ApiRejection`] for a
//! well-formed `success: false` response. Callers that care can
//! `downcast_ref::<ApiRejection>()`.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use std::fmt;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::{Project, ProjectConfig, Snapshot, Stage};

/// A well-formed response with `success: false`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRejection {
    pub message: Option<String>,
}

impl ApiRejection {
    pub fn new(message: Option<String>) -> Self {
        Self {
            message: message.filter(|m| !m.is_empty()),
        }
    }
}

impl fmt::Display for ApiRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(m) => write!(f, "backend rejected the request: {}", m),
            None => write!(f, "backend rejected the request"),
        }
    }
}

impl std::error::Error for ApiRejection {}

// ═══════════════════════════════════════════════════════════════════════
// Wire responses
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectListResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(default)]
    pub projects: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProjectListResponse {
    /// A missing `success` flag counts as success.
    pub fn into_result(self) -> Result<Vec<String>> {
        if self.success == Some(false) {
            return Err(ApiRejection::new(self.error).into());
        }
        Ok(self.projects)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<Project>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProjectResponse {
    pub fn into_result(self) -> Result<Project> {
        match (self.success, self.project) {
            (true, Some(project)) => Ok(project),
            (true, None) => Err(ApiRejection::new(Some("response carried no project".into())).into()),
            (false, _) => Err(ApiRejection::new(self.error).into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<Snapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SnapshotResponse {
    pub fn into_result(self) -> Result<Snapshot> {
        match (self.success, self.snapshot) {
            (true, Some(snapshot)) => Ok(snapshot),
            (true, None) => {
                Err(ApiRejection::new(Some("response carried no snapshot".into())).into())
            }
            (false, _) => Err(ApiRejection::new(self.error).into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatusResponse {
    pub fn into_result(self) -> Result<()> {
        if self.success {
            Ok(())
        } else {
            Err(ApiRejection::new(self.error).into())
        }
    }
}

/// `POST /api/import` answers with either a project name or an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ImportResponse {
    /// The imported project's name, falling back to `requested`.
    pub fn into_result(self, requested: &str) -> Result<String> {
        if let Some(error) = self.error {
            return Err(ApiRejection::new(Some(error)).into());
        }
        let from_project = self
            .project
            .as_ref()
            .and_then(|p| p.get("name"))
            .and_then(|n| n.as_str())
            .map(str::to_string);
        Ok(self
            .name
            .or(from_project)
            .unwrap_or_else(|| requested.to_string()))
    }
}

/// Body of `POST /api/projects/{name}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigUpdate {
    pub config: ProjectConfig,
}

// ═══════════════════════════════════════════════════════════════════════
// Trait
// ═══════════════════════════════════════════════════════════════════════

/// Abstract render server.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn list_projects(&self) -> Result<Vec<String>>;

    /// Fetch a project with all of its snapshots.
    async fn get_project(&self, name: &str) -> Result<Project>;

    async fn save_config(&self, project: &str, config: &ProjectConfig) -> Result<()>;

    /// Start rendering the whole project. Progress arrives as push events.
    async fn render_project(&self, project: &str) -> Result<()>;

    /// Compile one snapshot and return its updated state.
    async fn compile_snapshot(&self, project: &str, id: &str) -> Result<Snapshot>;

    /// Rewind one stage (and everything after it), or every stage when
    /// `stage` is `None`.
    ///
    /// On the wire the stage travels as its 0-based pipeline index, the
    /// first stage to rewind: `reset/2` rewinds PDF to Image and Assemble
    /// Image and leaves the earlier stages alone.
    async fn reset_snapshot(&self, project: &str, id: &str, stage: Option<Stage>)
        -> Result<Snapshot>;

    async fn reset_project(&self, project: &str) -> Result<()>;
}
