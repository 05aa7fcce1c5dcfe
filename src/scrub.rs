//! Scrub controller: the timeline mapper wired to the store.
//!
//! Pointer gestures go through the core [`Scrubber`] state machine against
//! the store's current snapshot list; every resulting intent becomes a
//! `select_snapshot` call, by identity. Reads and writes never hold the
//! store lock across a gesture, so push events may update the list between
//! two pointer moves and the next move resolves against the new list.

use std::sync::Arc;

use tex_timelapse_core::histogram::{Histogram, HistogramBar};
use tex_timelapse_core::timeline::{
    DragState, ScrubIntent, Scrubber, SliderBounds, Step, Timeline,
};

use crate::store::StateStore;

pub struct ScrubController {
    store: Arc<StateStore>,
    scrubber: Scrubber,
}

/// Owned copy of a histogram bar, detached from the project snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Bar {
    pub index: usize,
    pub id: String,
    pub start: f64,
    pub width: f64,
    pub status: tex_timelapse_core::models::StageStatus,
}

impl From<HistogramBar<'_>> for Bar {
    fn from(b: HistogramBar<'_>) -> Self {
        Bar {
            index: b.index,
            id: b.id.to_string(),
            start: b.start,
            width: b.width,
            status: b.status,
        }
    }
}

impl ScrubController {
    pub fn new(store: Arc<StateStore>) -> Self {
        let mut controller = Self {
            store,
            scrubber: Scrubber::new(),
        };
        controller.sync_handle();
        controller
    }

    pub fn state(&self) -> DragState {
        self.scrubber.state()
    }

    pub fn handle_position(&self) -> f64 {
        self.scrubber.handle_position()
    }

    fn apply(&self, intent: Option<ScrubIntent>) -> Option<String> {
        let intent = intent?;
        self.store.select_snapshot(intent.id());
        Some(intent.id().to_string())
    }

    pub fn pointer_down(&mut self, bounds: SliderBounds) {
        self.scrubber.pointer_down(bounds);
    }

    /// Preview-select the snapshot nearest the pointer.
    pub fn pointer_move(&mut self, x: f64) -> Option<String> {
        let project = self.store.project()?;
        let timeline = Timeline::new(&project.snapshots);
        let intent = self.scrubber.pointer_move(x, &timeline);
        self.apply(intent)
    }

    /// Commit the drag. `x` is `None` when the release has no coordinate.
    pub fn pointer_up(&mut self, x: Option<f64>) -> Option<String> {
        let project = self.store.project();
        let snapshots = project.as_ref().map(|p| p.snapshots.as_slice()).unwrap_or(&[]);
        let timeline = Timeline::new(snapshots);
        let intent = self.scrubber.pointer_up(x, &timeline);
        self.apply(intent)
    }

    /// Click-to-seek on the index-uniform strip.
    pub fn click(&mut self, x: f64, bounds: SliderBounds) -> Option<String> {
        self.seek(bounds.to_fraction(x))
    }

    pub fn seek(&mut self, fraction: f64) -> Option<String> {
        let project = self.store.project()?;
        let id = Timeline::new(&project.snapshots).seek(fraction)?.id.clone();
        self.store.select_snapshot(&id);
        self.sync_handle();
        Some(id)
    }

    /// Move the selection one snapshot along storage order.
    pub fn step(&mut self, step: Step) -> Option<String> {
        let project = self.store.project()?;
        let current = self.store.selected_id()?;
        let id = Timeline::new(&project.snapshots)
            .step(&current, step)?
            .id
            .clone();
        self.store.select_snapshot(&id);
        self.sync_handle();
        Some(id)
    }

    /// Snap the handle to the current selection (no-op while dragging).
    pub fn sync_handle(&mut self) {
        let Some(project) = self.store.project() else {
            return;
        };
        let selected = self.store.selected();
        self.scrubber
            .follow(selected.as_ref(), &Timeline::new(&project.snapshots));
    }

    pub fn bars(&self) -> Vec<Bar> {
        let Some(project) = self.store.project() else {
            return Vec::new();
        };
        Histogram::new(&project.snapshots, project.config.concat_commits)
            .bars()
            .into_iter()
            .map(Bar::from)
            .collect()
    }

    /// Index-uniform indicator for the current selection.
    pub fn indicator(&self) -> Option<f64> {
        let project = self.store.project()?;
        let id = self.store.selected_id()?;
        Histogram::new(&project.snapshots, project.config.concat_commits).indicator(&id)
    }
}
