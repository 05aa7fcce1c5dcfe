//! In-memory [`Backend`] implementation for testing and offline use.
//!
//! Holds projects in a `HashMap` behind `std::sync::RwLock`. Compiling a
//! snapshot completes every stage instantly and produces one page;
//! rendering the whole project compiles every snapshot. Failures can be
//! injected with [`InMemoryBackend::set_offline`] (transport failure) and
//! [`InMemoryBackend::reject_next`] (`success: false`).

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::models::{Project, ProjectConfig, Snapshot, Stage, StageStatus};

use super::{ApiRejection, Backend};

/// In-memory backend for tests and demos.
pub struct InMemoryBackend {
    projects: RwLock<HashMap<String, Project>>,
    offline: RwLock<bool>,
    rejection: Mutex<Option<String>>,
    saved_configs: Mutex<Vec<(String, ProjectConfig)>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            projects: RwLock::new(HashMap::new()),
            offline: RwLock::new(false),
            rejection: Mutex::new(None),
            saved_configs: Mutex::new(Vec::new()),
        }
    }

    pub fn with_project(self, project: Project) -> Self {
        self.insert(project);
        self
    }

    pub fn insert(&self, project: Project) {
        write(&self.projects).insert(project.name.clone(), project);
    }

    /// Current server-side copy of a project.
    pub fn project(&self, name: &str) -> Option<Project> {
        read(&self.projects).get(name).cloned()
    }

    /// Make every call fail as if the server were unreachable.
    pub fn set_offline(&self, offline: bool) {
        *write(&self.offline) = offline;
    }

    /// Answer the next call with `success: false` and this message.
    pub fn reject_next(&self, message: impl Into<String>) {
        *lock(&self.rejection) = Some(message.into());
    }

    /// Every config received through [`Backend::save_config`], in order.
    pub fn saved_configs(&self) -> Vec<(String, ProjectConfig)> {
        lock(&self.saved_configs).clone()
    }

    fn check(&self) -> Result<()> {
        if *read(&self.offline) {
            bail!("connection refused");
        }
        if let Some(message) = lock(&self.rejection).take() {
            return Err(ApiRejection::new(Some(message)).into());
        }
        Ok(())
    }

    fn with_snapshot<F>(&self, project: &str, id: &str, f: F) -> Result<Snapshot>
    where
        F: FnOnce(&mut Snapshot),
    {
        let mut projects = write(&self.projects);
        let Some(p) = projects.get_mut(project) else {
            return Err(ApiRejection::new(Some(format!("project {} not found", project))).into());
        };
        let Some(snapshot) = p.snapshots.iter_mut().find(|s| s.id == id) else {
            return Err(ApiRejection::new(Some(format!("Snapshot {} not found", id))).into());
        };
        f(snapshot);
        Ok(snapshot.clone())
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

fn complete(snapshot: &mut Snapshot) {
    for stage in Stage::ALL {
        snapshot.statuses.set(stage, StageStatus::Completed);
    }
    snapshot.error = None;
    snapshot.pages = vec!["page-01.png".to_string()];
}

fn rewind(snapshot: &mut Snapshot, from: Stage) {
    for stage in Stage::ALL.into_iter().filter(|s| *s >= from) {
        snapshot.statuses.set(stage, StageStatus::Pending);
    }
    snapshot.error = None;
    if from <= Stage::PdfToImage {
        snapshot.pages.clear();
        snapshot.changed_regions.clear();
    }
}

#[async_trait]
impl Backend for InMemoryBackend {
    async fn list_projects(&self) -> Result<Vec<String>> {
        self.check()?;
        let mut names: Vec<String> = read(&self.projects).keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn get_project(&self, name: &str) -> Result<Project> {
        self.check()?;
        match self.project(name) {
            Some(p) => Ok(p),
            None => Err(ApiRejection::new(Some(format!("project {} not found", name))).into()),
        }
    }

    async fn save_config(&self, project: &str, config: &ProjectConfig) -> Result<()> {
        self.check()?;
        lock(&self.saved_configs).push((project.to_string(), config.clone()));
        if let Some(p) = write(&self.projects).get_mut(project) {
            p.config = config.clone();
        }
        Ok(())
    }

    async fn render_project(&self, project: &str) -> Result<()> {
        self.check()?;
        let mut projects = write(&self.projects);
        let Some(p) = projects.get_mut(project) else {
            return Err(ApiRejection::new(Some(format!("project {} not found", project))).into());
        };
        p.snapshots.iter_mut().for_each(complete);
        Ok(())
    }

    async fn compile_snapshot(&self, project: &str, id: &str) -> Result<Snapshot> {
        self.check()?;
        self.with_snapshot(project, id, complete)
    }

    async fn reset_snapshot(
        &self,
        project: &str,
        id: &str,
        stage: Option<Stage>,
    ) -> Result<Snapshot> {
        self.check()?;
        let from = stage.unwrap_or(Stage::InitRepository);
        self.with_snapshot(project, id, |s| rewind(s, from))
    }

    async fn reset_project(&self, project: &str) -> Result<()> {
        self.check()?;
        let mut projects = write(&self.projects);
        let Some(p) = projects.get_mut(project) else {
            return Err(ApiRejection::new(Some(format!("project {} not found", project))).into());
        };
        p.snapshots.iter_mut().for_each(Snapshot::reset_all);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> InMemoryBackend {
        InMemoryBackend::new().with_project(Project {
            name: "thesis".into(),
            config: ProjectConfig::default(),
            snapshots: vec![Snapshot::new("a", 10), Snapshot::new("b", 20)],
        })
    }

    #[tokio::test]
    async fn test_compile_then_reset_stage() {
        let b = backend();
        let s = b.compile_snapshot("thesis", "a").await.unwrap();
        assert!(s.has_pages());
        assert_eq!(s.overall_status(), StageStatus::Completed);

        let s = b
            .reset_snapshot("thesis", "a", Some(Stage::PdfToImage))
            .await
            .unwrap();
        assert_eq!(s.status(Stage::CompileLatex), StageStatus::Completed);
        assert_eq!(s.status(Stage::PdfToImage), StageStatus::Pending);
        assert!(s.pages.is_empty());
        s.validate().unwrap();
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let b = backend();
        b.reject_next("NYI");
        let err = b.compile_snapshot("thesis", "a").await.unwrap_err();
        assert!(err.downcast_ref::<ApiRejection>().is_some());
        // rejection is one-shot
        assert!(b.compile_snapshot("thesis", "a").await.is_ok());

        b.set_offline(true);
        let err = b.list_projects().await.unwrap_err();
        assert!(err.downcast_ref::<ApiRejection>().is_none());
    }

    #[tokio::test]
    async fn test_unknown_snapshot_rejected() {
        let b = backend();
        assert!(b.compile_snapshot("thesis", "zzz").await.is_err());
        assert!(b.get_project("nope").await.is_err());
    }

    #[tokio::test]
    async fn test_render_and_reset_project() {
        let b = backend();
        b.render_project("thesis").await.unwrap();
        assert!(b.project("thesis").unwrap().snapshots.iter().all(|s| s.has_pages()));
        b.reset_project("thesis").await.unwrap();
        assert!(b
            .project("thesis")
            .unwrap()
            .snapshots
            .iter()
            .all(|s| s.pages.is_empty()));
    }
}
