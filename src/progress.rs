//! Render progress reporting.
//!
//! While the backend renders, its push channel streams telemetry (`stage`,
//! `set_progress`, `log`) alongside snapshot updates. The store ignores
//! telemetry; this module shows it to the user on **stderr** so stdout
//! remains parseable for scripts.

use std::io::Write;

use tex_timelapse_core::events::PushEvent;

/// A single telemetry event from the render worker.
#[derive(Clone, Debug, PartialEq)]
pub enum RenderProgressEvent {
    /// A pipeline stage started over `length` work items.
    Stage { name: String, length: u64 },
    /// Overall progress, as the backend reports it.
    Progress { value: f64 },
    /// Free-form worker message, optionally tied to a snapshot.
    Log {
        msg: String,
        snapshot: Option<String>,
    },
}

impl RenderProgressEvent {
    /// Telemetry view of a push event; `None` for state-carrying events.
    pub fn from_push(event: &PushEvent) -> Option<Self> {
        match event {
            PushEvent::AddProgress { .. } => None,
            PushEvent::Stage { stage, length } => Some(RenderProgressEvent::Stage {
                name: stage.clone(),
                length: *length,
            }),
            PushEvent::SetProgress { set } => Some(RenderProgressEvent::Progress { value: *set }),
            PushEvent::Log { msg, snapshot } => Some(RenderProgressEvent::Log {
                msg: msg.clone(),
                snapshot: snapshot.clone(),
            }),
        }
    }
}

/// Reports render progress. Implementations write to stderr (human or JSON).
pub trait RenderProgressReporter: Send + Sync {
    fn report(&self, event: RenderProgressEvent);
}

fn human_line(event: &RenderProgressEvent) -> String {
    match event {
        RenderProgressEvent::Stage { name, length } => {
            format!("render {}  {} items\n", name, format_number(*length))
        }
        RenderProgressEvent::Progress { value } => format!("render progress  {}\n", value),
        RenderProgressEvent::Log {
            msg,
            snapshot: Some(id),
        } => format!("render [{}]  {}\n", short(id), msg),
        RenderProgressEvent::Log { msg, snapshot: None } => format!("render  {}\n", msg),
    }
}

fn short(id: &str) -> &str {
    id.char_indices().nth(8).map(|(i, _)| &id[..i]).unwrap_or(id)
}

/// Human-friendly progress on stderr: "render Compile LaTeX  1,234 items".
pub struct StderrProgress;

impl RenderProgressReporter for StderrProgress {
    fn report(&self, event: RenderProgressEvent) {
        let line = human_line(&event);
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

fn json_line(event: &RenderProgressEvent) -> serde_json::Value {
    match event {
        RenderProgressEvent::Stage { name, length } => serde_json::json!({
            "event": "stage",
            "stage": name,
            "length": length
        }),
        RenderProgressEvent::Progress { value } => serde_json::json!({
            "event": "progress",
            "value": value
        }),
        RenderProgressEvent::Log { msg, snapshot } => serde_json::json!({
            "event": "log",
            "msg": msg,
            "snapshot": snapshot
        }),
    }
}

impl RenderProgressReporter for JsonProgress {
    fn report(&self, event: RenderProgressEvent) {
        if let Ok(line) = serde_json::to_string(&json_line(&event)) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl RenderProgressReporter for NoProgress {
    fn report(&self, _event: RenderProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn RenderProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
