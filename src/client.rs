//! HTTP implementation of [`Backend`] over the render server's REST API.
//!
//! All routes hang off `[server].url`. Path segments are percent-encoded
//! individually, so project names containing `/` or spaces are safe.
//!
//! Besides the store-facing trait methods this client offers the calls the
//! CLI needs directly:
//!
//! | Method | Route |
//! |--------|-------|
//! | [`fetch_image`](HttpBackend::fetch_image) | `GET /api/projects/{name}/snapshot/{sha}/image/{page}` |
//! | [`fetch_pdf`](HttpBackend::fetch_pdf) | `GET /api/projects/{name}/snapshot/{sha}/pdf` |
//! | [`import_project`](HttpBackend::import_project) | `POST /api/import` (multipart `name`, `file`) |
//!
//! The server reports unimplemented binary routes as a JSON
//! `{ success: false }` body with status 200; those surface as
//! [`ApiRejection`] rather than as a file full of JSON.

use std::io::Read;
use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::{Response, Url};
use serde::de::DeserializeOwned;

use tex_timelapse_core::backend::{
    ApiRejection, Backend, ConfigUpdate, ImportResponse, ProjectListResponse, ProjectResponse,
    SnapshotResponse, StatusResponse,
};
use tex_timelapse_core::models::{Project, ProjectConfig, Snapshot, Stage};

use crate::config::Config;

pub struct HttpBackend {
    client: reqwest::Client,
    base: Url,
}

impl HttpBackend {
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.server.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base: config.server_url()?,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("server.url cannot be used as a base: {}", self.base))?
            .pop_if_empty()
            .push("api")
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        let resp = self
            .client
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?;
        read_json(resp, &url).await
    }

    async fn get_bytes(&self, url: Url) -> Result<Vec<u8>> {
        let resp = self
            .client
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?;

        let is_json = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("application/json"));
        if is_json {
            let status: StatusResponse = read_json(resp, &url).await?;
            status.into_result()?;
            bail!("GET {} returned JSON instead of file content", url);
        }

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("GET {} returned {}: {}", url, status, body);
        }
        Ok(resp.bytes().await?.to_vec())
    }

    /// One rendered page image (e.g. `page-01.png`).
    pub async fn fetch_image(&self, project: &str, id: &str, page: &str) -> Result<Vec<u8>> {
        let url = self.endpoint(&["projects", project, "snapshot", id, "image", page])?;
        self.get_bytes(url).await
    }

    pub async fn fetch_pdf(&self, project: &str, id: &str) -> Result<Vec<u8>> {
        let url = self.endpoint(&["projects", project, "snapshot", id, "pdf"])?;
        self.get_bytes(url).await
    }

    /// Upload a zipped git repository as a new project and return the name
    /// the server registered it under.
    pub async fn import_project(&self, name: &str, archive: &Path) -> Result<String> {
        if name.trim().is_empty() {
            bail!("Project name is required");
        }
        check_archive(archive)?;

        let bytes = std::fs::read(archive)
            .with_context(|| format!("Failed to read {}", archive.display()))?;
        let file_name = archive
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "project.zip".to_string());
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("application/zip")?;
        let form = reqwest::multipart::Form::new()
            .text("name", name.to_string())
            .part("file", part);

        let url = self.endpoint(&["import"])?;
        let resp = self
            .client
            .post(url.clone())
            .multipart(form)
            .send()
            .await
            .with_context(|| format!("POST {} failed", url))?;

        // Rejections come back as 400 with an `{error}` body.
        let body = resp.text().await?;
        let parsed: ImportResponse = serde_json::from_str(&body)
            .with_context(|| format!("Invalid response from {}: {}", url, body))?;
        parsed.into_result(name)
    }
}

async fn read_json<T: DeserializeOwned>(resp: Response, url: &Url) -> Result<T> {
    let status = resp.status();
    let body = resp.text().await?;
    if !status.is_success() {
        // Still prefer the server's own `{success: false, error}` if present.
        if let Ok(rejected) = serde_json::from_str::<StatusResponse>(&body) {
            if !rejected.success && rejected.error.is_some() {
                return Err(ApiRejection::new(rejected.error).into());
            }
        }
        bail!("{} returned {}: {}", url, status, body);
    }
    serde_json::from_str(&body).with_context(|| format!("Invalid response from {}", url))
}

/// Client-side check that `path` is a zip of a git repository.
pub fn check_archive(path: &Path) -> Result<()> {
    let is_zip = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("zip"));
    if !is_zip {
        bail!("Only zip files are allowed: {}", path.display());
    }

    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let mut archive = zip::ZipArchive::new(file)
        .with_context(|| format!("{} is not a valid zip archive", path.display()))?;

    let has_git = archive
        .file_names()
        .any(|n| n == ".git" || n.starts_with(".git/"));
    if !has_git {
        bail!(
            "{} does not contain a .git directory at its root",
            path.display()
        );
    }

    // Touch HEAD so a truncated archive fails here rather than on the server.
    if let Ok(mut head) = archive.by_name(".git/HEAD") {
        let mut buf = String::new();
        head.read_to_string(&mut buf)
            .with_context(|| format!("{}: unreadable .git/HEAD", path.display()))?;
    }
    Ok(())
}

#[async_trait]
impl Backend for HttpBackend {
    async fn list_projects(&self) -> Result<Vec<String>> {
        let url = self.endpoint(&["projects"])?;
        let resp: ProjectListResponse = self.get_json(url).await?;
        resp.into_result()
    }

    async fn get_project(&self, name: &str) -> Result<Project> {
        let url = self.endpoint(&["projects", name])?;
        let resp: ProjectResponse = self.get_json(url).await?;
        resp.into_result()
    }

    async fn save_config(&self, project: &str, config: &ProjectConfig) -> Result<()> {
        let url = self.endpoint(&["projects", project])?;
        let body = ConfigUpdate {
            config: config.clone(),
        };
        let resp = self
            .client
            .post(url.clone())
            .json(&body)
            .send()
            .await
            .with_context(|| format!("POST {} failed", url))?;
        let status: StatusResponse = read_json(resp, &url).await?;
        status.into_result()
    }

    async fn render_project(&self, project: &str) -> Result<()> {
        let url = self.endpoint(&["projects", project, "run"])?;
        let resp: StatusResponse = self.get_json(url).await?;
        resp.into_result()
    }

    async fn compile_snapshot(&self, project: &str, id: &str) -> Result<Snapshot> {
        let url = self.endpoint(&["projects", project, "snapshot", id, "run"])?;
        let resp: SnapshotResponse = self.get_json(url).await?;
        resp.into_result()
    }

    async fn reset_snapshot(
        &self,
        project: &str,
        id: &str,
        stage: Option<Stage>,
    ) -> Result<Snapshot> {
        let index;
        let mut segments = vec!["projects", project, "snapshot", id, "reset"];
        if let Some(stage) = stage {
            index = stage.index().to_string();
            segments.push(&index);
        }
        let url = self.endpoint(&segments)?;
        let resp: SnapshotResponse = self.get_json(url).await?;
        resp.into_result()
    }

    async fn reset_project(&self, project: &str) -> Result<()> {
        let url = self.endpoint(&["projects", project, "reset"])?;
        let resp: StatusResponse = self.get_json(url).await?;
        resp.into_result()
    }
}
