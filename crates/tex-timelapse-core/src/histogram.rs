//! Index-uniform density bars for the snapshot strip.
//!
//! Every snapshot gets an equally wide slot in storage order, regardless of
//! how far apart the commits are in time. This is the layout click-to-seek
//! ([`Timeline::seek`](crate::timeline::Timeline::seek)) resolves against.
//!
//! With `concatCommits = k`, the backend folds `k` commits into one frame,
//! so the bar for slot `i` covers the `k` slots ending at `i`.

use crate::models::{Snapshot, StageStatus};
use crate::timeline::{Timeline, AXIS_MAX};

#[derive(Debug, Clone, PartialEq)]
pub struct HistogramBar<'a> {
    pub index: usize,
    pub id: &'a str,
    /// Left edge on the `[0, 100]` axis.
    pub start: f64,
    pub width: f64,
    pub status: StageStatus,
}

#[derive(Debug, Clone, Copy)]
pub struct Histogram<'a> {
    snapshots: &'a [Snapshot],
    span: usize,
}

impl<'a> Histogram<'a> {
    pub fn new(snapshots: &'a [Snapshot], concat_commits: Option<u32>) -> Self {
        let span = concat_commits.unwrap_or(1).max(1) as usize;
        Self { snapshots, span }
    }

    fn slot_width(&self) -> f64 {
        AXIS_MAX / self.snapshots.len() as f64
    }

    fn bar(&self, index: usize, snapshot: &'a Snapshot) -> HistogramBar<'a> {
        let w = self.slot_width();
        let first = (index + 1).saturating_sub(self.span);
        HistogramBar {
            index,
            id: &snapshot.id,
            start: first as f64 * w,
            width: (index + 1 - first) as f64 * w,
            status: snapshot.overall_status(),
        }
    }

    /// All bars, in storage order.
    pub fn bars(&self) -> Vec<HistogramBar<'a>> {
        self.snapshots
            .iter()
            .enumerate()
            .map(|(i, s)| self.bar(i, s))
            .collect()
    }

    /// The single bar to redraw after `id` was updated.
    pub fn bar_for(&self, id: &str) -> Option<HistogramBar<'a>> {
        let index = self.snapshots.iter().position(|s| s.id == id)?;
        Some(self.bar(index, &self.snapshots[index]))
    }

    /// Selection indicator position for `id`.
    pub fn indicator(&self, id: &str) -> Option<f64> {
        Timeline::new(self.snapshots).index_position(id)
    }
}
