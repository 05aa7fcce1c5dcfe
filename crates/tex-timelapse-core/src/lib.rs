//! # TeX Timelapse Core
//!
//! I/O-free logic for the TeX Timelapse client: snapshot and project
//! models, the project aggregate with selection, the timeline mapper and
//! drag state machine, the density histogram, push-event decoding, and the
//! backend trait.
//!
//! This crate contains no HTTP, WebSocket, or filesystem code; the main
//! `tex-timelapse` crate wires it to a real server.

pub mod backend;
pub mod events;
pub mod histogram;
pub mod models;
pub mod state;
pub mod timeline;
