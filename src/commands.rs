//! `tlx` command implementations.
//!
//! Each command builds an [`HttpBackend`] and, where it touches project
//! state, a [`StateStore`] on top of it, then prints human-readable output
//! on stdout. Errors propagate to `main`.
//!
//! Snapshot arguments accept a full commit hash or any unique prefix.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde_json::Value;
use tokio::sync::watch;

use tex_timelapse_core::backend::Backend;
use tex_timelapse_core::models::{CompilerPreset, Project, Snapshot, Stage};
use tex_timelapse_core::timeline::{SliderBounds, Timeline, AXIS_MAX};

use crate::client::HttpBackend;
use crate::config::Config;
use crate::config_sync::ConfigSync;
use crate::progress::ProgressMode;
use crate::push::PushListener;
use crate::scrub::ScrubController;
use crate::store::StateStore;

fn connect(config: &Config) -> Result<(Arc<HttpBackend>, Arc<StateStore>)> {
    let backend = Arc::new(HttpBackend::new(config)?);
    let store = Arc::new(StateStore::new(backend.clone()));
    Ok((backend, store))
}

async fn open_project(config: &Config, name: &str) -> Result<(Arc<HttpBackend>, Arc<StateStore>)> {
    let (backend, store) = connect(config)?;
    if !store.load_project(name).await {
        bail!(store
            .last_error()
            .unwrap_or_else(|| format!("failed to load project {}", name)));
    }
    Ok((backend, store))
}

fn loaded(store: &StateStore) -> Result<Arc<Project>> {
    store
        .project()
        .ok_or_else(|| anyhow!("no project loaded"))
}

/// Resolve a full hash or unique prefix to a snapshot id.
pub fn resolve_snapshot(project: &Project, sha: &str) -> Result<String> {
    if project.snapshot(sha).is_some() {
        return Ok(sha.to_string());
    }
    let matches: Vec<&Snapshot> = project
        .snapshots
        .iter()
        .filter(|s| s.id.starts_with(sha))
        .collect();
    match matches.as_slice() {
        [one] => Ok(one.id.clone()),
        [] => bail!("snapshot not found: {}", sha),
        many => bail!(
            "snapshot prefix '{}' is ambiguous ({} matches)",
            sha,
            many.len()
        ),
    }
}

fn format_date(snapshot: &Snapshot) -> String {
    snapshot
        .committed_at()
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%SZ").to_string())
        .unwrap_or_else(|| snapshot.timestamp.to_string())
}

fn print_snapshot_row(index: usize, snapshot: &Snapshot) {
    println!(
        "{:>4}  {:<8}  {}  {:<11}  {}",
        index,
        snapshot.short_sha(),
        format_date(snapshot),
        snapshot.overall_status().as_str(),
        snapshot.pages.len()
    );
}

fn print_snapshot(snapshot: &Snapshot) {
    println!("--- Snapshot ---");
    println!("sha:        {}", snapshot.id);
    println!("date:       {}", format_date(snapshot));
    for (stage, status) in snapshot.statuses.iter() {
        println!("{:<16} {}", format!("{}:", stage), status);
    }
    if let Some(main) = &snapshot.main_file {
        println!("main file:  {}", main);
    }
    println!("pages:      {}", snapshot.pages.len());
    let changed = snapshot.changed_pages();
    if !changed.is_empty() {
        let list: Vec<String> = changed.iter().map(u32::to_string).collect();
        println!("changed:    pages {}", list.join(", "));
    }
    if let Some(error) = &snapshot.error {
        println!("error:      {}", error);
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Read-only commands
// ═══════════════════════════════════════════════════════════════════════

pub async fn run_projects(config: &Config) -> Result<()> {
    let (backend, _) = connect(config)?;
    let projects = backend.list_projects().await?;
    if projects.is_empty() {
        println!("No projects.");
    }
    for name in projects {
        println!("{}", name);
    }
    Ok(())
}

pub async fn run_show(config: &Config, name: &str) -> Result<()> {
    let (_, store) = open_project(config, name).await?;
    let project = loaded(&store)?;

    println!("project:   {}", project.name);
    let compiler = match project.config.compiler() {
        CompilerPreset::Pdflatex => "pdflatex".to_string(),
        CompilerPreset::Lualatex => "lualatex".to_string(),
        CompilerPreset::Xetex => "xetex".to_string(),
        CompilerPreset::Custom => project
            .config
            .latex_cmd
            .clone()
            .unwrap_or_else(|| "(backend default)".to_string()),
    };
    println!("compiler:  {}", compiler);
    println!("snapshots: {}", project.snapshots.len());
    println!();
    println!("{:>4}  {:<8}  {:<20}  {:<11}  pages", "#", "sha", "date", "status");
    for (i, snapshot) in project.snapshots.iter().enumerate() {
        print_snapshot_row(i, snapshot);
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════
// Commands that change backend state
// ═══════════════════════════════════════════════════════════════════════

pub async fn run_compile(config: &Config, name: &str, sha: &str) -> Result<()> {
    let (_, store) = open_project(config, name).await?;
    let id = resolve_snapshot(&*loaded(&store)?, sha)?;
    if !store.request_compile(&id).await {
        bail!(store.last_error().unwrap_or_else(|| "compile failed".into()));
    }
    if let Some(snapshot) = loaded(&store)?.snapshot(&id) {
        print_snapshot(snapshot);
    }
    Ok(())
}

pub async fn run_reset(config: &Config, name: &str, sha: &str, stage: Option<Stage>) -> Result<()> {
    let (_, store) = open_project(config, name).await?;
    let id = resolve_snapshot(&*loaded(&store)?, sha)?;
    if !store.request_reset(&id, stage).await {
        bail!(store.last_error().unwrap_or_else(|| "reset failed".into()));
    }
    if let Some(snapshot) = loaded(&store)?.snapshot(&id) {
        print_snapshot(snapshot);
    }
    Ok(())
}

pub async fn run_reset_project(config: &Config, name: &str) -> Result<()> {
    let (_, store) = open_project(config, name).await?;
    if !store.request_project_reset().await {
        bail!(store
            .last_error()
            .unwrap_or_else(|| "project reset failed".into()));
    }
    println!(
        "Reset {} snapshots of {}.",
        loaded(&store)?.snapshots.len(),
        name
    );
    Ok(())
}

pub async fn run_render(config: &Config, name: &str) -> Result<()> {
    let (_, store) = open_project(config, name).await?;
    if !store.request_render().await {
        bail!(store.last_error().unwrap_or_else(|| "render failed".into()));
    }
    println!("Render of {} started.", name);
    Ok(())
}

pub async fn run_import(config: &Config, name: &str, archive: &Path) -> Result<()> {
    let (backend, _) = connect(config)?;
    let imported = backend.import_project(name, archive).await?;
    println!("Imported project {}.", imported);
    Ok(())
}

pub async fn run_image(config: &Config, name: &str, sha: &str, page: &str, out: &Path) -> Result<()> {
    let (backend, store) = open_project(config, name).await?;
    let id = resolve_snapshot(&*loaded(&store)?, sha)?;
    let bytes = backend.fetch_image(name, &id, page).await?;
    std::fs::write(out, &bytes).with_context(|| format!("Failed to write {}", out.display()))?;
    println!("Wrote {} ({} bytes).", out.display(), bytes.len());
    Ok(())
}

pub async fn run_pdf(config: &Config, name: &str, sha: &str, out: &Path) -> Result<()> {
    let (backend, store) = open_project(config, name).await?;
    let id = resolve_snapshot(&*loaded(&store)?, sha)?;
    let bytes = backend.fetch_pdf(name, &id).await?;
    std::fs::write(out, &bytes).with_context(|| format!("Failed to write {}", out.display()))?;
    println!("Wrote {} ({} bytes).", out.display(), bytes.len());
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════
// Timeline
// ═══════════════════════════════════════════════════════════════════════

/// Print the timeline and optionally exercise its lookups.
///
/// `drag` is a sequence of pointer x coordinates over a 100-unit track: the
/// first presses, every one moves, and the last also releases.
pub async fn run_timeline(
    config: &Config,
    name: &str,
    at: Option<f64>,
    seek: Option<f64>,
    drag: &[f64],
) -> Result<()> {
    let (_, store) = open_project(config, name).await?;
    let project = loaded(&store)?;
    let timeline = Timeline::new(&project.snapshots);
    if timeline.is_empty() {
        println!("{} has no snapshots.", name);
        return Ok(());
    }

    let mut scrub = ScrubController::new(store.clone());
    let bars = scrub.bars();
    println!("{:>4}  {:<8}  {:>8}  {:>8}  status", "#", "sha", "time", "strip");
    for (i, snapshot) in project.snapshots.iter().enumerate() {
        let position = timeline.position_of(snapshot).unwrap_or(0.0);
        let strip = bars.get(i).map(|b| b.start).unwrap_or(0.0);
        println!(
            "{:>4}  {:<8}  {:>8.2}  {:>8.2}  {}",
            i,
            snapshot.short_sha(),
            position,
            strip,
            snapshot.overall_status()
        );
    }

    if let Some(p) = at {
        if let Some(s) = timeline.nearest(p) {
            println!(
                "nearest({:.2}) -> {} at {:.2}",
                p,
                s.short_sha(),
                timeline.position_of(s).unwrap_or(0.0)
            );
        }
    }

    if let Some(f) = seek {
        if let Some(id) = scrub.seek(f) {
            println!("seek({:.2}) -> {}", f, short(&id));
        }
    }

    if let Some((&last, _)) = drag.split_last() {
        scrub.pointer_down(SliderBounds::new(0.0, AXIS_MAX));
        for &x in drag {
            if let Some(id) = scrub.pointer_move(x) {
                println!(
                    "drag {:.2} -> preview {} (handle {:.2})",
                    x,
                    short(&id),
                    scrub.handle_position()
                );
            }
        }
        if let Some(id) = scrub.pointer_up(Some(last)) {
            println!(
                "release -> commit {} (handle {:.2})",
                short(&id),
                scrub.handle_position()
            );
        }
    }

    if let Some(selected) = store.selected() {
        println!("selected: {}", selected.short_sha());
    }
    Ok(())
}

fn short(id: &str) -> &str {
    id.char_indices().nth(8).map(|(i, _)| &id[..i]).unwrap_or(id)
}

// ═══════════════════════════════════════════════════════════════════════
// Config
// ═══════════════════════════════════════════════════════════════════════

/// Parse a CLI value: JSON when it parses, a plain string otherwise.
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Print the project config, or apply `key=value` edits and upload them.
///
/// `compiler=pdflatex|lualatex|xetex` is shorthand for the matching
/// `latexCmd` preset.
pub async fn run_config(config: &Config, name: &str, pairs: &[(String, String)]) -> Result<()> {
    let (backend, store) = open_project(config, name).await?;
    let project = loaded(&store)?;

    if pairs.is_empty() {
        println!("{}", serde_json::to_string_pretty(&project.config)?);
        return Ok(());
    }

    let mut updated = project.config.clone();
    for (key, raw) in pairs {
        let (key, value) = if key == "compiler" {
            let preset = match raw.as_str() {
                "pdflatex" => CompilerPreset::Pdflatex,
                "lualatex" => CompilerPreset::Lualatex,
                "xetex" => CompilerPreset::Xetex,
                other => bail!("unknown compiler preset '{}': use pdflatex, lualatex, or xetex", other),
            };
            let cmd = preset.command().unwrap_or_default();
            ("latexCmd", Value::String(cmd.to_string()))
        } else {
            (key.as_str(), parse_value(raw))
        };
        updated = updated.with_field(key, value)?;
    }

    store.attach_config_sync(ConfigSync::spawn(
        backend.clone(),
        Duration::from_millis(config.sync.debounce_ms),
    ));
    let changed = store.update_config(updated);
    if let Some(sync) = store.detach_config_sync() {
        sync.shutdown().await;
    }

    if changed {
        println!("Updated {} key(s) of {}.", pairs.len(), name);
    } else {
        println!("Config of {} unchanged.", name);
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════
// Watch
// ═══════════════════════════════════════════════════════════════════════

/// Snapshots whose content differs between two versions of a project.
pub fn changed_snapshots<'a>(before: &Project, after: &'a Project) -> Vec<&'a Snapshot> {
    after
        .snapshots
        .iter()
        .filter(|s| before.snapshot(&s.id) != Some(*s))
        .collect()
}

/// Follow the push channel and print every snapshot update until Ctrl-C.
pub async fn run_watch(config: &Config, name: &str, progress: ProgressMode) -> Result<()> {
    let (_, store) = open_project(config, name).await?;
    let reporter: Arc<dyn crate::progress::RenderProgressReporter> =
        Arc::from(progress.reporter());
    let listener = PushListener::new(config, store.clone(), reporter)?;

    let (stop_tx, stop_rx) = watch::channel(false);
    let handle = tokio::spawn(async move { listener.run(stop_rx).await });

    let mut updates = store.subscribe_project();
    let mut previous = loaded(&store)?;
    println!("Watching {} ({} snapshots). Ctrl-C to stop.", name, previous.snapshots.len());

    loop {
        tokio::select! {
            update = updates.next() => {
                let Some(update) = update else { break };
                let Some(project) = update.project else { continue };
                for snapshot in changed_snapshots(&previous, &project) {
                    println!(
                        "{}  {:<11}  pages={}{}",
                        snapshot.short_sha(),
                        snapshot.overall_status().as_str(),
                        snapshot.pages.len(),
                        snapshot
                            .error
                            .as_deref()
                            .map(|e| format!("  error: {}", e))
                            .unwrap_or_default()
                    );
                }
                previous = project;
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    let _ = stop_tx.send(true);
    let _ = handle.await;
    Ok(())
}
