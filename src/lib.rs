//! # TeX Timelapse
//!
//! Client for a TeX Timelapse render server: browse the per-commit
//! snapshots of a LaTeX project, scrub through them on a timeline, and
//! drive compilation.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  REST   ┌─────────────┐  emits   ┌─────────────┐
//! │ HttpBackend  │◀───────▶│ StateStore  │─────────▶│ subscribers │
//! └──────────────┘         └─────▲───────┘          └─────────────┘
//!                                │  ▲
//!                   add_progress │  │ select by id
//!                      ┌─────────┴┐ ┌┴────────────────┐
//!                      │  Push    │ │ ScrubController │
//!                      │ listener │ │ (timeline/drag) │
//!                      └──────────┘ └─────────────────┘
//! ```
//!
//! The I/O-free pieces (models, aggregate, timeline, histogram, event
//! decoding, backend trait) live in the `tex-timelapse-core` crate and are
//! re-exported here.
//!
//! ## Quick Start
//!
//! ```bash
//! tlx projects
//! tlx show thesis
//! tlx compile thesis 3f2a9c1
//! tlx timeline thesis --drag 10 40 70
//! tlx watch thesis
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`logging`] | `tracing` subscriber setup |
//! | [`client`] | REST backend over `reqwest` |
//! | [`observable`] | Ordered value streams |
//! | [`store`] | The project state store |
//! | [`config_sync`] | Debounced config upload |
//! | [`scrub`] | Timeline gestures bound to the store |
//! | [`push`] | Socket.IO push listener |
//! | [`progress`] | Render telemetry output |
//! | [`commands`] | CLI command implementations |

pub mod client;
pub mod commands;
pub mod config;
pub mod config_sync;
pub mod logging;
pub mod observable;
pub mod progress;
pub mod push;
pub mod scrub;
pub mod store;

pub use tex_timelapse_core::{backend, events, histogram, models, state, timeline};
