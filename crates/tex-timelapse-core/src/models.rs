//! Snapshot and project data model.
//!
//! The backend speaks a loose JSON dialect: stage statuses arrive as an
//! open string-keyed map (or an empty string for a snapshot that never ran),
//! commit dates sometimes arrive as numeric strings, and so on. Every payload
//! is first deserialized into a `Wire*` shape and then converted with
//! `TryFrom`, which is the single place the model invariants are enforced:
//!
//! - stage keys come from the fixed [`Stage`] set (unknown keys are skipped),
//! - a later stage is never `Completed` while an earlier one is not,
//! - pages exist only once `PDF to Image` is `Completed`,
//! - changed regions are clamped into the unit page square (boxes left
//!   without area are dropped),
//! - snapshot identifiers are unique within a project.
//!
//! Serialization goes back through the same wire shapes, so a model value
//! round-trips to exactly what the backend expects.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

// ═══════════════════════════════════════════════════════════════════════
// Stages
// ═══════════════════════════════════════════════════════════════════════

/// One step of the compilation pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    InitRepository,
    CompileLatex,
    PdfToImage,
    AssembleImage,
}

impl Stage {
    /// All stages in pipeline order.
    pub const ALL: [Stage; 4] = [
        Stage::InitRepository,
        Stage::CompileLatex,
        Stage::PdfToImage,
        Stage::AssembleImage,
    ];

    /// The backend's name for this stage.
    pub fn name(self) -> &'static str {
        match self {
            Stage::InitRepository => "Init Repository",
            Stage::CompileLatex => "Compile LaTeX",
            Stage::PdfToImage => "PDF to Image",
            Stage::AssembleImage => "Assemble Image",
        }
    }

    /// Zero-based position in the pipeline.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Look up a stage by its exact backend name.
    pub fn from_name(name: &str) -> Option<Stage> {
        Stage::ALL.into_iter().find(|s| s.name() == name)
    }

    fn slug(self) -> &'static str {
        match self {
            Stage::InitRepository => "init-repository",
            Stage::CompileLatex => "compile-latex",
            Stage::PdfToImage => "pdf-to-image",
            Stage::AssembleImage => "assemble-image",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Accepts the backend name (`"Compile LaTeX"`), a slug (`"compile-latex"`),
/// or the pipeline index (`"1"`).
impl FromStr for Stage {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if let Ok(index) = trimmed.parse::<usize>() {
            return Stage::ALL
                .get(index)
                .copied()
                .ok_or_else(|| anyhow!("stage index out of range: {}", index));
        }
        Stage::ALL
            .into_iter()
            .find(|st| st.name().eq_ignore_ascii_case(trimmed) || st.slug() == trimmed)
            .ok_or_else(|| {
                anyhow!(
                    "unknown stage '{}'. Expected one of: {}",
                    s,
                    Stage::ALL.map(|st| st.slug()).join(", ")
                )
            })
    }
}

/// Status of a single pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StageStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl StageStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StageStatus::Pending => "Pending",
            StageStatus::InProgress => "In Progress",
            StageStatus::Completed => "Completed",
            StageStatus::Failed => "Failed",
        }
    }

    /// Parse a backend status string. `Unknown` and the empty string mean
    /// the stage has not run yet.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "" | "Unknown" | "Pending" => Ok(StageStatus::Pending),
            "In Progress" => Ok(StageStatus::InProgress),
            "Completed" => Ok(StageStatus::Completed),
            "Failed" => Ok(StageStatus::Failed),
            other => bail!("unknown stage status: '{}'", other),
        }
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for StageStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Per-stage status, one slot per [`Stage`] in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StageStatuses([StageStatus; 4]);

impl StageStatuses {
    pub fn get(&self, stage: Stage) -> StageStatus {
        self.0[stage.index()]
    }

    pub fn set(&mut self, stage: Stage, status: StageStatus) {
        self.0[stage.index()] = status;
    }

    pub fn iter(&self) -> impl Iterator<Item = (Stage, StageStatus)> + '_ {
        Stage::ALL.into_iter().map(|s| (s, self.get(s)))
    }

    /// True when no stage is `Completed` behind a stage that is not.
    pub fn is_monotonic(&self) -> bool {
        let mut open = false;
        for (_, status) in self.iter() {
            match status {
                StageStatus::Completed if open => return false,
                StageStatus::Completed => {}
                _ => open = true,
            }
        }
        true
    }

    /// Collapse the stages into one status for display.
    pub fn overall(&self) -> StageStatus {
        if self.0.contains(&StageStatus::InProgress) {
            StageStatus::InProgress
        } else if self.0.contains(&StageStatus::Failed) {
            StageStatus::Failed
        } else if self.0.iter().all(|s| *s == StageStatus::Completed) {
            StageStatus::Completed
        } else {
            StageStatus::Pending
        }
    }

    /// Decode the backend's `status` field.
    ///
    /// A never-run snapshot carries an empty string (or `null`); otherwise
    /// the field is a map from stage name to status string.
    fn from_wire(value: &Value) -> Result<Self> {
        let mut statuses = StageStatuses::default();
        match value {
            Value::Null => {}
            Value::String(s) if s.is_empty() || s == "Unknown" => {}
            Value::Object(map) => {
                for (key, raw) in map {
                    let Some(stage) = Stage::from_name(key) else {
                        tracing::warn!(stage = %key, "skipping unknown pipeline stage");
                        continue;
                    };
                    let status = match raw {
                        Value::Null => StageStatus::Pending,
                        Value::String(s) => StageStatus::parse(s)?,
                        other => bail!("status of stage '{}' is not a string: {}", key, other),
                    };
                    statuses.set(stage, status);
                }
            }
            other => bail!("expected a per-stage status map, got: {}", other),
        }
        Ok(statuses)
    }

    fn to_wire(self) -> Value {
        let map: serde_json::Map<String, Value> = self
            .iter()
            .map(|(stage, status)| (stage.name().to_string(), Value::from(status.as_str())))
            .collect();
        Value::Object(map)
    }
}

impl Serialize for StageStatuses {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_wire().serialize(serializer)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Snapshot
// ═══════════════════════════════════════════════════════════════════════

/// A region of a page that changed relative to the previous snapshot.
///
/// Coordinates are fractions of the page: `0 <= x1 < x2 <= 1`,
/// `0 <= y1 < y2 <= 1`. The backend pads boxes past the page edge and may
/// send every field as a string; ingestion clamps and drops what is left
/// empty (see [`ChangedRegion::clamped`]).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireRegion")]
pub struct ChangedRegion {
    pub page: u32,
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

#[derive(Deserialize)]
struct WireRegion {
    #[serde(deserialize_with = "de_number")]
    page: f64,
    #[serde(deserialize_with = "de_number")]
    x1: f64,
    #[serde(deserialize_with = "de_number")]
    y1: f64,
    #[serde(deserialize_with = "de_number")]
    x2: f64,
    #[serde(deserialize_with = "de_number")]
    y2: f64,
}

impl TryFrom<WireRegion> for ChangedRegion {
    type Error = anyhow::Error;

    fn try_from(wire: WireRegion) -> Result<Self> {
        let page = wire.page;
        if !(page.is_finite() && page >= 0.0 && page.fract() == 0.0 && page <= u32::MAX as f64) {
            bail!("changed region has invalid page number: {}", page);
        }
        Ok(ChangedRegion {
            page: page as u32,
            x1: wire.x1,
            y1: wire.y1,
            x2: wire.x2,
            y2: wire.y2,
        })
    }
}

impl ChangedRegion {
    /// Clamp every coordinate into `[0, 1]`. `None` when the box has no area
    /// left (or a coordinate is not a number).
    pub fn clamped(self) -> Option<ChangedRegion> {
        let unit = |v: f64| v.clamp(0.0, 1.0);
        let region = ChangedRegion {
            page: self.page,
            x1: unit(self.x1),
            y1: unit(self.y1),
            x2: unit(self.x2),
            y2: unit(self.y2),
        };
        region.validate().ok().map(|_| region)
    }

    pub fn validate(&self) -> Result<()> {
        let in_unit = |v: f64| (0.0..=1.0).contains(&v);
        if !(in_unit(self.x1) && in_unit(self.x2) && self.x1 < self.x2) {
            bail!(
                "changed region on page {} has invalid x range [{}, {}]",
                self.page,
                self.x1,
                self.x2
            );
        }
        if !(in_unit(self.y1) && in_unit(self.y2) && self.y1 < self.y2) {
            bail!(
                "changed region on page {} has invalid y range [{}, {}]",
                self.page,
                self.y1,
                self.y2
            );
        }
        Ok(())
    }
}

/// Compilation result and metadata for one commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireSnapshot", into = "WireSnapshot")]
pub struct Snapshot {
    /// Commit hash; stable identity of the snapshot.
    pub id: String,
    /// Commit time in seconds since the Unix epoch.
    pub timestamp: i64,
    pub statuses: StageStatuses,
    pub error: Option<String>,
    /// Source files pulled in by the main file.
    pub includes: Vec<String>,
    /// Which include is the entry point, once the repository stage ran.
    pub main_file: Option<String>,
    /// Raw diff blob as the backend reports it.
    pub diff: Value,
    /// Rendered page identifiers.
    pub pages: Vec<String>,
    pub changed_regions: Vec<ChangedRegion>,
}

impl Snapshot {
    /// A never-compiled snapshot.
    pub fn new(id: impl Into<String>, timestamp: i64) -> Self {
        Self {
            id: id.into(),
            timestamp,
            statuses: StageStatuses::default(),
            error: None,
            includes: Vec::new(),
            main_file: None,
            diff: Value::Null,
            pages: Vec::new(),
            changed_regions: Vec::new(),
        }
    }

    pub fn status(&self, stage: Stage) -> StageStatus {
        self.statuses.get(stage)
    }

    pub fn overall_status(&self) -> StageStatus {
        self.statuses.overall()
    }

    /// True while the backend is working on any stage.
    pub fn is_rendering(&self) -> bool {
        self.statuses.iter().any(|(_, s)| s == StageStatus::InProgress)
    }

    pub fn has_pages(&self) -> bool {
        self.status(Stage::PdfToImage) == StageStatus::Completed && !self.pages.is_empty()
    }

    /// Distinct page numbers touched by a changed region, ascending.
    pub fn changed_pages(&self) -> Vec<u32> {
        let mut pages: Vec<u32> = self.changed_regions.iter().map(|r| r.page).collect();
        pages.sort_unstable();
        pages.dedup();
        pages
    }

    pub fn committed_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.timestamp, 0)
    }

    pub fn short_sha(&self) -> &str {
        let end = self
            .id
            .char_indices()
            .nth(8)
            .map(|(i, _)| i)
            .unwrap_or(self.id.len());
        &self.id[..end]
    }

    /// Rewind every stage and drop derived artifacts, keeping identity.
    pub fn reset_all(&mut self) {
        self.statuses = StageStatuses::default();
        self.pages.clear();
        self.error = None;
        self.changed_regions.clear();
    }

    /// Check the model invariants.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            bail!("snapshot has an empty commit identifier");
        }
        if !self.statuses.is_monotonic() {
            bail!(
                "snapshot {}: a later stage is completed before an earlier one",
                self.id
            );
        }
        if !self.pages.is_empty() && self.status(Stage::PdfToImage) != StageStatus::Completed {
            bail!(
                "snapshot {}: has {} pages but '{}' is not completed",
                self.id,
                self.pages.len(),
                Stage::PdfToImage
            );
        }
        for region in &self.changed_regions {
            region
                .validate()
                .map_err(|e| anyhow!("snapshot {}: {}", self.id, e))?;
        }
        Ok(())
    }
}

/// Snapshot as the backend serializes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireSnapshot {
    pub commit_sha: String,
    #[serde(deserialize_with = "de_timestamp")]
    pub commit_date: i64,
    #[serde(default)]
    pub main_tex_file: String,
    #[serde(default)]
    pub status: Value,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub includes: Vec<String>,
    #[serde(default, rename = "gitDiff")]
    pub git_diff: Value,
    #[serde(default)]
    pub pages: Vec<String>,
    #[serde(default)]
    pub changed_pages: Vec<ChangedRegion>,
}

impl TryFrom<WireSnapshot> for Snapshot {
    type Error = anyhow::Error;

    fn try_from(wire: WireSnapshot) -> Result<Self> {
        let statuses = StageStatuses::from_wire(&wire.status)
            .map_err(|e| anyhow!("snapshot {}: {}", wire.commit_sha, e))?;
        let changed_regions = wire
            .changed_pages
            .into_iter()
            .filter_map(|region| {
                let clamped = region.clamped();
                if clamped.is_none() {
                    tracing::warn!(
                        snapshot = %wire.commit_sha,
                        page = region.page,
                        "changed region empty after clamping; dropped"
                    );
                }
                clamped
            })
            .collect();
        let snapshot = Snapshot {
            id: wire.commit_sha,
            timestamp: wire.commit_date,
            statuses,
            error: wire.error.filter(|e| !e.is_empty()),
            includes: wire.includes,
            main_file: Some(wire.main_tex_file).filter(|f| !f.is_empty()),
            diff: wire.git_diff,
            pages: wire.pages,
            changed_regions,
        };
        snapshot.validate()?;
        Ok(snapshot)
    }
}

impl From<Snapshot> for WireSnapshot {
    fn from(s: Snapshot) -> Self {
        WireSnapshot {
            commit_sha: s.id,
            commit_date: s.timestamp,
            main_tex_file: s.main_file.unwrap_or_default(),
            status: s.statuses.to_wire(),
            error: Some(s.error.unwrap_or_default()),
            includes: s.includes,
            git_diff: s.diff,
            pages: s.pages,
            changed_pages: s.changed_regions,
        }
    }
}

fn de_timestamp<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    use serde::de::Error;

    match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .ok_or_else(|| D::Error::custom(format!("commit_date out of range: {}", n))),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map(|f| f as i64)
            .map_err(|_| D::Error::custom(format!("commit_date is not numeric: '{}'", s))),
        other => Err(D::Error::custom(format!(
            "commit_date must be a number, got: {}",
            other
        ))),
    }
}

/// A number that may arrive as a numeric string (YAML-reloaded snapshots
/// stringify every scalar).
fn de_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    use serde::de::Error;

    match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| D::Error::custom(format!("number out of range: {}", n))),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| D::Error::custom(format!("not a number: '{}'", s))),
        other => Err(D::Error::custom(format!("expected a number, got: {}", other))),
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Project
// ═══════════════════════════════════════════════════════════════════════

/// A `{old, new}` text substitution applied before compiling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextReplacement {
    pub old: String,
    pub new: String,
}

/// Render and layout settings of a project.
///
/// Every known key is optional so that a config fetched from the backend
/// and posted back is byte-for-byte what the backend had; keys this client
/// does not know are kept in `extra`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub videoscale: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub framerate: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blur: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub highlight_changes: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_multithreading: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_commit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_commit: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crop: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crop_two_page: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crop_left: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crop_right: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crop_top: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crop_bottom: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crop_alt_left: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crop_alt_right: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crop_alt_top: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crop_alt_bottom: Option<f64>,

    /// Number of commits folded into one rendered frame.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concat_commits: Option<u32>,

    #[serde(
        default,
        rename = "text_replacements",
        skip_serializing_if = "Option::is_none"
    )]
    pub text_replacements: Option<Vec<TextReplacement>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latex_cmd: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overleaf_project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overleaf_auth_token: Option<String>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ProjectConfig {
    /// Return a copy with one key replaced, re-validating the field type.
    ///
    /// `key` is the backend's key (`"concatCommits"`, `"latexCmd"`, ...).
    pub fn with_field(&self, key: &str, value: Value) -> Result<ProjectConfig> {
        let mut raw = serde_json::to_value(self)?;
        let map = raw
            .as_object_mut()
            .ok_or_else(|| anyhow!("config did not serialize to an object"))?;
        map.insert(key.to_string(), value);
        serde_json::from_value(raw).map_err(|e| anyhow!("invalid value for '{}': {}", key, e))
    }

    pub fn compiler(&self) -> CompilerPreset {
        CompilerPreset::detect(self.latex_cmd.as_deref().unwrap_or(""))
    }
}

/// Known LaTeX engine command lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompilerPreset {
    Pdflatex,
    Lualatex,
    Xetex,
    Custom,
}

impl CompilerPreset {
    pub fn command(self) -> Option<&'static str> {
        match self {
            CompilerPreset::Pdflatex => Some("latexmk -pdf -interaction=nonstopmode -synctex=1 -f"),
            CompilerPreset::Lualatex => Some(
                "latexmk -pdflatex='lualatex %O %S' -interaction=nonstopmode -pdf -synctex=1 -f",
            ),
            CompilerPreset::Xetex => Some(
                "latexmk -pdflatex='xelatex %O %S' -interaction=nonstopmode -pdf -synctex=1 -f",
            ),
            CompilerPreset::Custom => None,
        }
    }

    pub fn detect(cmd: &str) -> CompilerPreset {
        [
            CompilerPreset::Pdflatex,
            CompilerPreset::Lualatex,
            CompilerPreset::Xetex,
        ]
        .into_iter()
        .find(|p| p.command() == Some(cmd))
        .unwrap_or(CompilerPreset::Custom)
    }
}

/// A project: its configuration and one snapshot per commit.
///
/// `snapshots` is in the backend's storage order, which is not necessarily
/// commit order; positional math sorts by timestamp where it matters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireProject")]
pub struct Project {
    pub name: String,
    pub config: ProjectConfig,
    pub snapshots: Vec<Snapshot>,
}

impl Project {
    pub fn snapshot(&self, id: &str) -> Option<&Snapshot> {
        self.snapshots.iter().find(|s| s.id == id)
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.snapshots.iter().position(|s| s.id == id)
    }

    /// Earliest snapshot by commit time; storage order breaks ties.
    pub fn first_chronological(&self) -> Option<&Snapshot> {
        self.snapshots
            .iter()
            .enumerate()
            .min_by_key(|(i, s)| (s.timestamp, *i))
            .map(|(_, s)| s)
    }

    /// Snapshots sorted by commit time (stable for equal timestamps).
    pub fn chronological(&self) -> Vec<&Snapshot> {
        let mut sorted: Vec<&Snapshot> = self.snapshots.iter().collect();
        sorted.sort_by_key(|s| s.timestamp);
        sorted
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::with_capacity(self.snapshots.len());
        for snapshot in &self.snapshots {
            if !seen.insert(snapshot.id.as_str()) {
                bail!(
                    "project '{}': duplicate snapshot identifier {}",
                    self.name,
                    snapshot.id
                );
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct WireProject {
    name: String,
    #[serde(default)]
    config: ProjectConfig,
    #[serde(default)]
    snapshots: Vec<Snapshot>,
}

impl TryFrom<WireProject> for Project {
    type Error = anyhow::Error;

    fn try_from(wire: WireProject) -> Result<Self> {
        let project = Project {
            name: wire.name,
            config: wire.config,
            snapshots: wire.snapshots,
        };
        project.validate()?;
        Ok(project)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn completed_through(stage: Stage) -> Value {
        let mut map = serde_json::Map::new();
        for s in Stage::ALL {
            let status = if s <= stage { "Completed" } else { "Unknown" };
            map.insert(s.name().to_string(), json!(status));
        }
        Value::Object(map)
    }

    #[test]
    fn test_fresh_snapshot_empty_status_string() {
        let snap: Snapshot = serde_json::from_value(json!({
            "commit_sha": "abc123",
            "commit_date": 1700000000,
            "status": "",
            "error": "",
            "index": 0
        }))
        .unwrap();
        assert_eq!(snap.id, "abc123");
        assert_eq!(snap.overall_status(), StageStatus::Pending);
        assert!(snap.error.is_none());
        assert!(snap.main_file.is_none());
    }

    #[test]
    fn test_commit_date_as_string() {
        let snap: Snapshot = serde_json::from_value(json!({
            "commit_sha": "abc",
            "commit_date": "1700000123"
        }))
        .unwrap();
        assert_eq!(snap.timestamp, 1_700_000_123);
    }

    #[test]
    fn test_status_map_parsed() {
        let snap: Snapshot = serde_json::from_value(json!({
            "commit_sha": "abc",
            "commit_date": 1,
            "status": {
                "Init Repository": "Completed",
                "Compile LaTeX": "In Progress"
            }
        }))
        .unwrap();
        assert_eq!(snap.status(Stage::InitRepository), StageStatus::Completed);
        assert_eq!(snap.status(Stage::CompileLatex), StageStatus::InProgress);
        assert_eq!(snap.status(Stage::PdfToImage), StageStatus::Pending);
        assert!(snap.is_rendering());
        assert_eq!(snap.overall_status(), StageStatus::InProgress);
    }

    #[test]
    fn test_unknown_stage_skipped() {
        let snap: Snapshot = serde_json::from_value(json!({
            "commit_sha": "abc",
            "commit_date": 1,
            "status": { "Init Repository": "Completed", "Replace Text": "Completed" }
        }))
        .unwrap();
        assert_eq!(snap.status(Stage::InitRepository), StageStatus::Completed);
    }

    #[test]
    fn test_unknown_status_rejected() {
        let res: Result<Snapshot, _> = serde_json::from_value(json!({
            "commit_sha": "abc",
            "commit_date": 1,
            "status": { "Init Repository": "Exploded" }
        }));
        assert!(res.is_err());
    }

    #[test]
    fn test_non_monotonic_rejected() {
        let res: Result<Snapshot, _> = serde_json::from_value(json!({
            "commit_sha": "abc",
            "commit_date": 1,
            "status": { "Init Repository": "Failed", "Compile LaTeX": "Completed" }
        }));
        let err = res.unwrap_err().to_string();
        assert!(err.contains("later stage"), "{}", err);
    }

    #[test]
    fn test_pages_require_pdf_to_image() {
        let res: Result<Snapshot, _> = serde_json::from_value(json!({
            "commit_sha": "abc",
            "commit_date": 1,
            "status": completed_through(Stage::CompileLatex),
            "pages": ["page-1.jpg"]
        }));
        assert!(res.is_err());

        let ok: Snapshot = serde_json::from_value(json!({
            "commit_sha": "abc",
            "commit_date": 1,
            "status": completed_through(Stage::PdfToImage),
            "pages": ["page-1.jpg"]
        }))
        .unwrap();
        assert!(ok.has_pages());
    }

    #[test]
    fn test_changed_region_bounds() {
        let good = ChangedRegion { page: 1, x1: 0.0, y1: 0.2, x2: 1.0, y2: 0.3 };
        assert!(good.validate().is_ok());

        let inverted = ChangedRegion { page: 1, x1: 0.5, y1: 0.2, x2: 0.5, y2: 0.3 };
        assert!(inverted.validate().is_err());

        let outside = ChangedRegion { page: 2, x1: 0.1, y1: 0.2, x2: 0.4, y2: 1.2 };
        assert!(outside.validate().is_err());
    }

    fn completed_with_regions(regions: Value) -> Value {
        json!({
            "commit_sha": "abc",
            "commit_date": 1,
            "status": completed_through(Stage::AssembleImage),
            "pages": ["page-01.png"],
            "changed_pages": regions
        })
    }

    #[test]
    fn test_padded_regions_clamped_into_page() {
        let snap: Snapshot = serde_json::from_value(completed_with_regions(json!([
            { "page": 1, "x1": -0.02, "y1": 0.1, "x2": 0.5, "y2": 1.03 },
            { "page": 2, "x1": 0.2, "y1": 0.3, "x2": 0.4, "y2": 0.5 }
        ])))
        .unwrap();
        assert_eq!(
            snap.changed_regions,
            vec![
                ChangedRegion { page: 1, x1: 0.0, y1: 0.1, x2: 0.5, y2: 1.0 },
                ChangedRegion { page: 2, x1: 0.2, y1: 0.3, x2: 0.4, y2: 0.5 },
            ]
        );
    }

    #[test]
    fn test_region_outside_page_dropped() {
        let snap: Snapshot = serde_json::from_value(completed_with_regions(json!([
            { "page": 1, "x1": 1.01, "y1": 0.1, "x2": 1.2, "y2": 0.3 },
            { "page": 3, "x1": 0.1, "y1": 0.1, "x2": 0.3, "y2": 0.3 }
        ])))
        .unwrap();
        assert_eq!(snap.changed_pages(), vec![3]);
    }

    #[test]
    fn test_region_fields_as_strings() {
        let snap: Snapshot = serde_json::from_value(completed_with_regions(json!([
            { "page": "1", "x1": "0.1", "y1": "0.2", "x2": "0.6", "y2": "0.4" }
        ])))
        .unwrap();
        assert_eq!(
            snap.changed_regions,
            vec![ChangedRegion { page: 1, x1: 0.1, y1: 0.2, x2: 0.6, y2: 0.4 }]
        );

        let bad: Result<Snapshot, _> = serde_json::from_value(completed_with_regions(json!([
            { "page": "first", "x1": 0.1, "y1": 0.2, "x2": 0.6, "y2": 0.4 }
        ])));
        assert!(bad.is_err());
        let fractional: Result<Snapshot, _> = serde_json::from_value(completed_with_regions(
            json!([{ "page": 1.5, "x1": 0.1, "y1": 0.2, "x2": 0.6, "y2": 0.4 }]),
        ));
        assert!(fractional.is_err());
    }

    #[test]
    fn test_changed_pages_distinct_sorted() {
        let mut snap = Snapshot::new("a", 0);
        snap.changed_regions = vec![
            ChangedRegion { page: 3, x1: 0.0, y1: 0.0, x2: 0.5, y2: 0.5 },
            ChangedRegion { page: 1, x1: 0.0, y1: 0.0, x2: 0.5, y2: 0.5 },
            ChangedRegion { page: 3, x1: 0.5, y1: 0.5, x2: 1.0, y2: 1.0 },
        ];
        assert_eq!(snap.changed_pages(), vec![1, 3]);
    }

    #[test]
    fn test_serialize_uses_backend_names() {
        let mut snap = Snapshot::new("deadbeef", 42);
        snap.statuses.set(Stage::InitRepository, StageStatus::Completed);
        let v = serde_json::to_value(&snap).unwrap();
        assert_eq!(v["commit_sha"], "deadbeef");
        assert_eq!(v["commit_date"], 42);
        assert_eq!(v["status"]["Init Repository"], "Completed");
        assert_eq!(v["status"]["Assemble Image"], "Pending");
        assert!(v.get("gitDiff").is_some());
    }

    #[test]
    fn test_reset_all_keeps_identity() {
        let mut snap: Snapshot = serde_json::from_value(json!({
            "commit_sha": "abc",
            "commit_date": 7,
            "status": completed_through(Stage::AssembleImage),
            "pages": ["p1.jpg", "p2.jpg"],
            "error": "warning",
            "includes": ["main.tex", "intro.tex"],
            "changed_pages": [{ "page": 1, "x1": 0.1, "y1": 0.1, "x2": 0.2, "y2": 0.2 }]
        }))
        .unwrap();
        snap.reset_all();
        assert_eq!(snap.id, "abc");
        assert_eq!(snap.timestamp, 7);
        assert_eq!(snap.statuses, StageStatuses::default());
        assert!(snap.pages.is_empty());
        assert!(snap.error.is_none());
        assert!(snap.changed_regions.is_empty());
        assert_eq!(snap.includes.len(), 2);
        assert!(snap.validate().is_ok());
    }

    #[test]
    fn test_stage_from_str_forms() {
        assert_eq!("Compile LaTeX".parse::<Stage>().unwrap(), Stage::CompileLatex);
        assert_eq!("pdf-to-image".parse::<Stage>().unwrap(), Stage::PdfToImage);
        assert_eq!("3".parse::<Stage>().unwrap(), Stage::AssembleImage);
        assert!("9".parse::<Stage>().is_err());
        assert!("render".parse::<Stage>().is_err());
    }

    #[test]
    fn test_project_duplicate_ids_rejected() {
        let res: Result<Project, _> = serde_json::from_value(json!({
            "name": "thesis",
            "config": {},
            "snapshots": [
                { "commit_sha": "a", "commit_date": 1 },
                { "commit_sha": "a", "commit_date": 2 }
            ]
        }));
        assert!(res.unwrap_err().to_string().contains("duplicate"));
    }

    #[test]
    fn test_first_chronological_ignores_storage_order() {
        let project = Project {
            name: "p".into(),
            config: ProjectConfig::default(),
            snapshots: vec![
                Snapshot::new("late", 300),
                Snapshot::new("early", 100),
                Snapshot::new("also-early", 100),
            ],
        };
        assert_eq!(project.first_chronological().unwrap().id, "early");
        let order: Vec<&str> = project.chronological().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(order, vec!["early", "also-early", "late"]);
    }

    #[test]
    fn test_config_roundtrip_preserves_unknown_keys() {
        let raw = json!({
            "rows": 2,
            "columns": 4,
            "concatCommits": 3,
            "latexCmd": "latexmk -pdf -interaction=nonstopmode -synctex=1 -f",
            "text_replacements": [{ "old": "\\todo", "new": "" }],
            "mainTexFile": "thesis.tex"
        });
        let config: ProjectConfig = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(config.concat_commits, Some(3));
        assert_eq!(config.compiler(), CompilerPreset::Pdflatex);
        assert_eq!(config.extra["mainTexFile"], "thesis.tex");
        assert_eq!(serde_json::to_value(&config).unwrap(), raw);
    }

    #[test]
    fn test_config_with_field_type_checked() {
        let config = ProjectConfig::default();
        let updated = config.with_field("rows", json!(3)).unwrap();
        assert_eq!(updated.rows, Some(3));
        assert!(config.with_field("rows", json!("three")).is_err());
    }
}
