//! Fake render server for integration tests.
//!
//! Serves the REST routes the client uses from an in-memory project table
//! and records what it receives so tests can assert on requests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::extract::{Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

pub const STAGES: [&str; 4] = [
    "Init Repository",
    "Compile LaTeX",
    "PDF to Image",
    "Assemble Image",
];

#[derive(Default)]
pub struct FakeState {
    pub projects: BTreeMap<String, Value>,
    pub saved_configs: Vec<(String, Value)>,
    pub resets: Vec<(String, String, Option<String>)>,
    pub renders: Vec<String>,
    pub imports: Vec<(String, String, usize)>,
}

pub type Shared = Arc<Mutex<FakeState>>;

pub fn status_map(completed_through: Option<usize>) -> Value {
    let mut map = serde_json::Map::new();
    for (i, stage) in STAGES.iter().enumerate() {
        let status = match completed_through {
            Some(done) if i <= done => "Completed",
            _ => "Unknown",
        };
        map.insert(stage.to_string(), json!(status));
    }
    Value::Object(map)
}

pub fn wire_snapshot(sha: &str, date: i64) -> Value {
    json!({
        "commit_sha": sha,
        "commit_date": date,
        "main_tex_file": "main.tex",
        "status": status_map(None),
        "error": "",
        "includes": [],
        "gitDiff": {},
        "pages": [],
        "changed_pages": []
    })
}

/// A project with three snapshots at t = 100, 200, 400.
pub fn thesis() -> Value {
    json!({
        "name": "thesis",
        "config": { "rows": 2, "concatCommits": 1 },
        "snapshots": [
            wire_snapshot("aaaa1111", 100),
            wire_snapshot("bbbb2222", 200),
            wire_snapshot("cccc3333", 400),
        ]
    })
}

fn find_snapshot<'a>(project: &'a mut Value, sha: &str) -> Option<&'a mut Value> {
    project["snapshots"]
        .as_array_mut()?
        .iter_mut()
        .find(|s| s["commit_sha"] == sha)
}

async fn list_projects(State(state): State<Shared>) -> Json<Value> {
    let names: Vec<String> = state.lock().unwrap().projects.keys().cloned().collect();
    Json(json!({ "success": true, "projects": names }))
}

async fn get_project(State(state): State<Shared>, Path(name): Path<String>) -> Json<Value> {
    match state.lock().unwrap().projects.get(&name) {
        Some(project) => Json(json!({ "success": true, "project": project })),
        None => Json(json!({ "success": false, "error": "Project not found" })),
    }
}

async fn save_config(
    State(state): State<Shared>,
    Path(name): Path<String>,
    Json(body): Json<Value>,
) -> Json<Value> {
    let mut state = state.lock().unwrap();
    let config = body["config"].clone();
    if let Some(project) = state.projects.get_mut(&name) {
        project["config"] = config.clone();
    }
    state.saved_configs.push((name, config));
    Json(json!({ "success": true }))
}

async fn render(State(state): State<Shared>, Path(name): Path<String>) -> Json<Value> {
    state.lock().unwrap().renders.push(name);
    Json(json!({ "success": true }))
}

async fn reset_project(State(state): State<Shared>, Path(name): Path<String>) -> Json<Value> {
    let mut state = state.lock().unwrap();
    let Some(project) = state.projects.get_mut(&name) else {
        return Json(json!({ "success": false, "error": "Project not found" }));
    };
    if let Some(snapshots) = project["snapshots"].as_array_mut() {
        for s in snapshots {
            s["status"] = status_map(None);
            s["pages"] = json!([]);
        }
    }
    Json(json!({ "success": true }))
}

async fn compile(
    State(state): State<Shared>,
    Path((name, sha)): Path<(String, String)>,
) -> Json<Value> {
    let mut state = state.lock().unwrap();
    let Some(snapshot) = state
        .projects
        .get_mut(&name)
        .and_then(|p| find_snapshot(p, &sha))
    else {
        return Json(json!({ "success": false, "error": "Snapshot not found" }));
    };
    snapshot["status"] = status_map(Some(3));
    snapshot["pages"] = json!(["page-01.png", "page-02.png"]);
    // Padded the way the renderer pads boxes, with YAML-style string scalars.
    snapshot["changed_pages"] = json!([
        { "page": 1, "x1": -0.02, "y1": 0.1, "x2": 0.4, "y2": 1.03 },
        { "page": "2", "x1": "0.2", "y1": "0.3", "x2": "0.6", "y2": "0.5" },
        { "page": 2, "x1": 1.05, "y1": 0.3, "x2": 1.2, "y2": 0.5 }
    ]);
    Json(json!({ "success": true, "snapshot": snapshot.clone() }))
}

fn do_reset(state: &Shared, name: String, sha: String, stage: Option<String>) -> Json<Value> {
    let mut state = state.lock().unwrap();
    let from = stage
        .as_deref()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(0);
    let Some(snapshot) = state
        .projects
        .get_mut(&name)
        .and_then(|p| find_snapshot(p, &sha))
    else {
        return Json(json!({ "success": false, "error": "Snapshot not found" }));
    };
    for stage in STAGES.iter().skip(from) {
        snapshot["status"][*stage] = json!("Unknown");
    }
    // Pages only exist once PDF to Image (index 2) has completed.
    if from <= 2 {
        snapshot["pages"] = json!([]);
        snapshot["changed_pages"] = json!([]);
    }
    let snapshot = snapshot.clone();
    state.resets.push((name, sha, stage));
    Json(json!({ "success": true, "snapshot": snapshot }))
}

async fn reset_snapshot(
    State(state): State<Shared>,
    Path((name, sha)): Path<(String, String)>,
) -> Json<Value> {
    do_reset(&state, name, sha, None)
}

async fn reset_snapshot_stage(
    State(state): State<Shared>,
    Path((name, sha, stage)): Path<(String, String, String)>,
) -> Json<Value> {
    do_reset(&state, name, sha, Some(stage))
}

async fn image(Path((_name, _sha, _page)): Path<(String, String, String)>) -> Json<Value> {
    Json(json!({ "success": false, "error": "NYI" }))
}

async fn pdf(Path((_name, _sha)): Path<(String, String)>) -> Response {
    ([(header::CONTENT_TYPE, "application/pdf")], b"%PDF-1.5\n%fake\n".to_vec()).into_response()
}

async fn import(State(state): State<Shared>, mut multipart: Multipart) -> Response {
    let mut name = None;
    let mut file = None;
    while let Ok(Some(field)) = multipart.next_field().await {
        match field.name() {
            Some("name") => name = field.text().await.ok(),
            Some("file") => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let bytes = field.bytes().await.unwrap_or_default();
                file = Some((file_name, bytes.len()));
            }
            _ => {}
        }
    }

    let (Some(name), Some((file_name, size))) = (name, file) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Missing name or file" })),
        )
            .into_response();
    };
    let mut state = state.lock().unwrap();
    if state.projects.contains_key(&name) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Project already exists" })),
        )
            .into_response();
    }
    state
        .projects
        .insert(name.clone(), json!({ "name": name, "config": {}, "snapshots": [] }));
    state.imports.push((name.clone(), file_name, size));
    Json(json!({
        "message": "Project imported successfully",
        "project": { "name": name }
    }))
    .into_response()
}

pub fn router(state: Shared) -> Router {
    Router::new()
        .route("/api/projects", get(list_projects))
        .route("/api/projects/{name}", get(get_project).post(save_config))
        .route("/api/projects/{name}/run", get(render))
        .route("/api/projects/{name}/reset", get(reset_project))
        .route("/api/projects/{name}/snapshot/{sha}/run", get(compile))
        .route("/api/projects/{name}/snapshot/{sha}/reset", get(reset_snapshot))
        .route(
            "/api/projects/{name}/snapshot/{sha}/reset/{stage}",
            get(reset_snapshot_stage),
        )
        .route("/api/projects/{name}/snapshot/{sha}/image/{page}", get(image))
        .route("/api/projects/{name}/snapshot/{sha}/pdf", get(pdf))
        .route("/api/import", post(import))
        .with_state(state)
}

/// Start the fake server on an ephemeral port.
pub async fn spawn_server(state: Shared) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.unwrap();
    });
    addr
}

pub fn seeded() -> Shared {
    let mut state = FakeState::default();
    state.projects.insert("thesis".into(), thesis());
    Arc::new(Mutex::new(state))
}

pub fn write_repo_zip(path: &std::path::Path) {
    use std::io::Write;
    let file = std::fs::File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    for (name, body) in [
        (".git/HEAD", "ref: refs/heads/main\n"),
        ("main.tex", "\\documentclass{article}\n"),
    ] {
        zip.start_file(name, zip::write::SimpleFileOptions::default())
            .unwrap();
        zip.write_all(body.as_bytes()).unwrap();
    }
    zip.finish().unwrap();
}
