use std::sync::Mutex;

use super::lock_or_recover;
use super::sample::{ActionKind, Sample, POINTER_LIMIT};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrokePaint {
    pub width: f32,
    pub marker: u8,
}

/// Surface strokes are rendered onto.
pub trait StrokeTarget {
    /// Draw consecutive segments through `points` with round caps and joins.
    fn draw_polyline(&mut self, points: &[Point], paint: &StrokePaint);
}

/// A polyline under construction. A single point is a pen position with
/// nothing to render yet.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Stroke {
    points: Vec<Point>,
}

impl Stroke {
    fn starting_at(point: Point) -> Self {
        Self {
            points: vec![point],
        }
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn has_pending_segments(&self) -> bool {
        self.points.len() >= 2
    }

    fn line_to(&mut self, point: Point) {
        if self.points.is_empty() {
            self.points.push(point);
        }
        self.points.push(point);
    }

    /// Forget rendered segments. The next point re-seeds the stroke.
    fn reset(&mut self) {
        self.points.clear();
    }
}

#[derive(Debug)]
struct StrokeSet {
    active: [Option<Stroke>; POINTER_LIMIT],
    last_actions: [Option<ActionKind>; POINTER_LIMIT],
    retired: Vec<Stroke>,
    scale: f32,
}

impl Default for StrokeSet {
    fn default() -> Self {
        Self {
            active: Default::default(),
            last_actions: [None; POINTER_LIMIT],
            retired: Vec::new(),
            scale: 1.0,
        }
    }
}

impl StrokeSet {
    fn add(&mut self, sample: &Sample) {
        if !sample.is_tracked_slot() {
            tracing::trace!(slot = sample.pointer_slot, "ignoring untracked pointer slot");
            return;
        }

        let slot = sample.pointer_slot;
        let point = Point::new(sample.x * self.scale, sample.y * self.scale);
        match sample.action {
            ActionKind::Down | ActionKind::PointerDown => self.begin(slot, point),
            ActionKind::Move => {
                // The host reuses slot indexes once a pointer lifts, so a move
                // right after a lift belongs to a different pointer.
                if self.last_actions[slot] == Some(ActionKind::PointerUp) {
                    self.begin(slot, point);
                }
                match self.active[slot].as_mut() {
                    Some(stroke) => stroke.line_to(point),
                    None => {
                        let mut stroke = Stroke::starting_at(point);
                        stroke.line_to(point);
                        self.active[slot] = Some(stroke);
                    }
                }
            }
            ActionKind::Up | ActionKind::PointerUp | ActionKind::Cancel => {}
        }
        self.last_actions[slot] = Some(sample.action);
    }

    fn begin(&mut self, slot: usize, point: Point) {
        if let Some(previous) = self.active[slot].replace(Stroke::starting_at(point)) {
            if previous.has_pending_segments() {
                self.retired.push(previous);
            }
        }
    }
}

/// Turns per-pointer samples into strokes and renders whatever is pending.
#[derive(Debug, Default)]
pub struct StrokeAggregator {
    strokes: Mutex<StrokeSet>,
}

impl StrokeAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scale applied to every sample added from now on.
    pub fn set_scale(&self, scale: f32) {
        lock_or_recover(&self.strokes, "stroke aggregator").scale = scale;
    }

    pub fn scale(&self) -> f32 {
        lock_or_recover(&self.strokes, "stroke aggregator").scale
    }

    pub fn add_samples(&self, samples: &[Sample]) {
        let mut strokes = lock_or_recover(&self.strokes, "stroke aggregator");
        for sample in samples {
            strokes.add(sample);
        }
    }

    /// Render retired strokes and every active stroke with segments, then
    /// forget what was rendered. Returns the number of strokes drawn.
    pub fn draw_and_reset<T: StrokeTarget + ?Sized>(&self, target: &mut T, paint: &StrokePaint) -> usize {
        let mut strokes = lock_or_recover(&self.strokes, "stroke aggregator");
        let mut drawn = 0;

        for stroke in strokes.retired.drain(..) {
            target.draw_polyline(stroke.points(), paint);
            drawn += 1;
        }

        for stroke in strokes.active.iter_mut().flatten() {
            if stroke.has_pending_segments() {
                target.draw_polyline(stroke.points(), paint);
                stroke.reset();
                drawn += 1;
            }
        }

        drawn
    }

    pub fn has_pending(&self) -> bool {
        let strokes = lock_or_recover(&self.strokes, "stroke aggregator");
        !strokes.retired.is_empty()
            || strokes
                .active
                .iter()
                .flatten()
                .any(Stroke::has_pending_segments)
    }

    pub fn active_stroke(&self, slot: usize) -> Option<Stroke> {
        let strokes = lock_or_recover(&self.strokes, "stroke aggregator");
        strokes.active.get(slot).cloned().flatten()
    }

    /// Forget every stroke and pointer action. The scale is kept.
    pub fn clear(&self) {
        let mut strokes = lock_or_recover(&self.strokes, "stroke aggregator");
        let scale = strokes.scale;
        *strokes = StrokeSet {
            scale,
            ..StrokeSet::default()
        };
    }
}
