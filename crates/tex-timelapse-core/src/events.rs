//! Backend push events.
//!
//! The render worker runs independently of any client request and reports
//! through a push channel. Only `add_progress` carries state (a full,
//! authoritative snapshot); the rest is telemetry.
//!
//! | Event          | Payload                    | Effect                     |
//! |----------------|----------------------------|----------------------------|
//! | `add_progress` | `{ snapshot }`             | merged into the store      |
//! | `stage`        | `{ stage, length }`        | progress display only      |
//! | `set_progress` | `{ set }`                  | progress display only      |
//! | `log`          | `{ msg, snapshot? }`       | progress display only      |
//! | `message`      | any string                 | treated as `log`           |
//!
//! Unknown event names decode to `None` and are ignored by callers.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use serde_json::Value;

use crate::models::Snapshot;

#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    AddProgress { snapshot: Snapshot },
    Stage { stage: String, length: u64 },
    SetProgress { set: f64 },
    Log { msg: String, snapshot: Option<String> },
}

#[derive(Deserialize)]
struct AddProgressPayload {
    snapshot: Snapshot,
}

#[derive(Deserialize)]
struct StagePayload {
    stage: String,
    #[serde(default)]
    length: u64,
}

#[derive(Deserialize)]
struct SetProgressPayload {
    set: f64,
}

impl PushEvent {
    /// Decode an event from its name and JSON payload.
    pub fn decode(event: &str, payload: Value) -> Result<Option<PushEvent>> {
        let decoded = match event {
            "add_progress" => {
                let p: AddProgressPayload =
                    serde_json::from_value(payload).context("invalid add_progress payload")?;
                PushEvent::AddProgress {
                    snapshot: p.snapshot,
                }
            }
            "stage" => {
                let p: StagePayload =
                    serde_json::from_value(payload).context("invalid stage payload")?;
                PushEvent::Stage {
                    stage: p.stage,
                    length: p.length,
                }
            }
            "set_progress" => {
                let p: SetProgressPayload =
                    serde_json::from_value(payload).context("invalid set_progress payload")?;
                PushEvent::SetProgress { set: p.set }
            }
            "log" | "message" => decode_log(payload)?,
            _ => return Ok(None),
        };
        Ok(Some(decoded))
    }

    /// Snapshot id this event concerns, if any.
    pub fn snapshot_id(&self) -> Option<&str> {
        match self {
            PushEvent::AddProgress { snapshot } => Some(&snapshot.id),
            PushEvent::Log { snapshot, .. } => snapshot.as_deref(),
            _ => None,
        }
    }

    pub fn is_telemetry(&self) -> bool {
        !matches!(self, PushEvent::AddProgress { .. })
    }
}

fn decode_log(payload: Value) -> Result<PushEvent> {
    match payload {
        Value::String(msg) => Ok(PushEvent::Log {
            msg,
            snapshot: None,
        }),
        Value::Object(map) => {
            let msg = match map.get("msg") {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => return Err(anyhow!("log payload has no 'msg'")),
            };
            // Either a bare commit hash or a full snapshot object.
            let snapshot = match map.get("snapshot") {
                Some(Value::String(s)) => Some(s.clone()),
                Some(Value::Object(s)) => s
                    .get("commit_sha")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                _ => None,
            };
            Ok(PushEvent::Log { msg, snapshot })
        }
        other => Err(anyhow!("unexpected log payload: {}", other)),
    }
}
