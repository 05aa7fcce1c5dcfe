//! Timeline mapping and the scrub state machine.
//!
//! A project's snapshots are discrete points in time. The timeline maps
//! them onto a continuous `[0, 100]` axis so a slider handle can be dragged
//! across them:
//!
//! ```text
//! position(t) = (t - min_t) / (max_t - min_t) * 100
//! ```
//!
//! When every snapshot shares one timestamp (including the single-snapshot
//! case) all positions are `0`.
//!
//! Two lookups exist and are deliberately different:
//!
//! - [`Timeline::nearest`] resolves a drag position to the snapshot with the
//!   closest *timestamp-derived* position. Used by the slider.
//! - [`Timeline::seek`] resolves a click fraction to an *array index*,
//!   `round(fraction * (count - 1))`. Used by the index-uniform histogram,
//!   where every snapshot gets an equally wide bar regardless of time gaps.
//!
//! Step navigation ([`Timeline::step`]) is also index based.
//!
//! Every lookup on an empty snapshot list returns `None`.

use crate::models::Snapshot;

/// Upper end of the scrub axis.
pub const AXIS_MAX: f64 = 100.0;

/// Direction for sequential navigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Previous,
    Next,
}

/// Read-only positional view over a snapshot list.
#[derive(Debug, Clone, Copy)]
pub struct Timeline<'a> {
    snapshots: &'a [Snapshot],
    min: i64,
    max: i64,
}

impl<'a> Timeline<'a> {
    pub fn new(snapshots: &'a [Snapshot]) -> Self {
        let min = snapshots.iter().map(|s| s.timestamp).min().unwrap_or(0);
        let max = snapshots.iter().map(|s| s.timestamp).max().unwrap_or(0);
        Self {
            snapshots,
            min,
            max,
        }
    }

    pub fn snapshots(&self) -> &'a [Snapshot] {
        self.snapshots
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Map a commit time onto the axis.
    pub fn position(&self, timestamp: i64) -> Option<f64> {
        if self.is_empty() {
            return None;
        }
        // Widened so timestamps near the ends of i64 cannot overflow.
        let span = self.max as i128 - self.min as i128;
        if span == 0 {
            return Some(0.0);
        }
        let offset = timestamp as i128 - self.min as i128;
        Some(offset as f64 / span as f64 * AXIS_MAX)
    }

    pub fn position_of(&self, snapshot: &Snapshot) -> Option<f64> {
        self.position(snapshot.timestamp)
    }

    /// Snapshot whose position is closest to `position`.
    ///
    /// Ties go to whichever snapshot comes first in storage order.
    pub fn nearest(&self, position: f64) -> Option<&'a Snapshot> {
        let mut best: Option<(&'a Snapshot, f64)> = None;
        for snapshot in self.snapshots {
            let Some(pos) = self.position_of(snapshot) else {
                continue;
            };
            let distance = (pos - position).abs();
            match best {
                Some((_, d)) if distance >= d => {}
                _ => best = Some((snapshot, distance)),
            }
        }
        best.map(|(s, _)| s)
    }

    /// Click-to-seek: map a horizontal fraction in `[0, 1]` to an index in
    /// storage order.
    pub fn seek(&self, fraction: f64) -> Option<&'a Snapshot> {
        if self.is_empty() {
            return None;
        }
        let fraction = if fraction.is_finite() {
            fraction.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let index = (fraction * (self.len() - 1) as f64).round() as usize;
        self.snapshots.get(index)
    }

    /// Neighbour of `current` in storage order, or `None` at either end or
    /// when `current` is not in the list.
    pub fn step(&self, current: &str, step: Step) -> Option<&'a Snapshot> {
        let index = self.snapshots.iter().position(|s| s.id == current)?;
        let target = match step {
            Step::Previous => index.checked_sub(1)?,
            Step::Next => index + 1,
        };
        self.snapshots.get(target)
    }

    /// Index-uniform position of a snapshot (`index / (count - 1) * 100`),
    /// used for the histogram's selection indicator.
    pub fn index_position(&self, id: &str) -> Option<f64> {
        let index = self.snapshots.iter().position(|s| s.id == id)?;
        if self.len() < 2 {
            return Some(0.0);
        }
        Some(index as f64 / (self.len() - 1) as f64 * AXIS_MAX)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Drag state machine
// ═══════════════════════════════════════════════════════════════════════

/// Horizontal extent of the slider track, in pointer coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SliderBounds {
    pub left: f64,
    pub width: f64,
}

impl SliderBounds {
    pub fn new(left: f64, width: f64) -> Self {
        Self { left, width }
    }

    /// Pointer x to a clamped axis position.
    pub fn to_position(&self, x: f64) -> f64 {
        if self.width <= 0.0 || !self.width.is_finite() {
            return 0.0;
        }
        let raw = (x - self.left) / self.width * AXIS_MAX;
        if raw.is_finite() {
            raw.clamp(0.0, AXIS_MAX)
        } else {
            0.0
        }
    }

    /// Pointer x to a clamped fraction of the track, for click-to-seek.
    pub fn to_fraction(&self, x: f64) -> f64 {
        self.to_position(x) / AXIS_MAX
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DragState {
    Idle,
    Dragging {
        /// Recorded once at pointer-down.
        bounds: SliderBounds,
        /// Last raw position seen, used when release has no coordinate.
        last_position: f64,
    },
}

/// Selection intent produced by the scrubber, by snapshot identity.
#[derive(Debug, Clone, PartialEq)]
pub enum ScrubIntent {
    /// Live selection while the pointer moves.
    Preview { id: String },
    /// Final selection on release.
    Commit { id: String },
}

impl ScrubIntent {
    pub fn id(&self) -> &str {
        match self {
            ScrubIntent::Preview { id } | ScrubIntent::Commit { id } => id,
        }
    }
}

/// Slider handle plus its `Idle → Dragging → Idle` state machine.
///
/// The handle tracks the pointer continuously while dragging and snaps to
/// the nearest snapshot on release. There is no cancel gesture: a release
/// outside the track resolves through the clamped coordinate, or through the
/// last known position when the release carries none.
#[derive(Debug, Clone)]
pub struct Scrubber {
    state: DragState,
    handle: f64,
}

impl Default for Scrubber {
    fn default() -> Self {
        Self::new()
    }
}

impl Scrubber {
    pub fn new() -> Self {
        Self {
            state: DragState::Idle,
            handle: 0.0,
        }
    }

    pub fn state(&self) -> DragState {
        self.state
    }

    pub fn is_dragging(&self) -> bool {
        matches!(self.state, DragState::Dragging { .. })
    }

    /// Rendered handle position on the axis.
    pub fn handle_position(&self) -> f64 {
        self.handle
    }

    /// Start a drag. Ignored if a drag is already in progress.
    pub fn pointer_down(&mut self, bounds: SliderBounds) {
        if self.is_dragging() {
            return;
        }
        self.state = DragState::Dragging {
            bounds,
            last_position: self.handle,
        };
    }

    /// Move the handle and preview the nearest snapshot.
    pub fn pointer_move(&mut self, x: f64, timeline: &Timeline<'_>) -> Option<ScrubIntent> {
        let DragState::Dragging { bounds, .. } = self.state else {
            return None;
        };
        let position = bounds.to_position(x);
        self.handle = position;
        self.state = DragState::Dragging {
            bounds,
            last_position: position,
        };
        timeline.nearest(position).map(|s| ScrubIntent::Preview { id: s.id.clone() })
    }

    /// End the drag, snap the handle and commit the nearest snapshot.
    pub fn pointer_up(&mut self, x: Option<f64>, timeline: &Timeline<'_>) -> Option<ScrubIntent> {
        let DragState::Dragging {
            bounds,
            last_position,
        } = self.state
        else {
            return None;
        };
        self.state = DragState::Idle;

        let position = x.map(|x| bounds.to_position(x)).unwrap_or(last_position);
        self.handle = position;

        let snapshot = timeline.nearest(position)?;
        if let Some(snapped) = timeline.position_of(snapshot) {
            self.handle = snapped;
        }
        Some(ScrubIntent::Commit {
            id: snapshot.id.clone(),
        })
    }

    /// Move the handle to the selected snapshot, unless the user is
    /// currently dragging it.
    pub fn follow(&mut self, selected: Option<&Snapshot>, timeline: &Timeline<'_>) {
        if self.is_dragging() {
            return;
        }
        if let Some(pos) = selected.and_then(|s| timeline.position_of(s)) {
            self.handle = pos;
        }
    }
}
