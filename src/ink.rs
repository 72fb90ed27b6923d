use crate::error::InkError;
use serde::{Deserialize, Serialize};

/// A single timestamped pointer sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
    /// Milliseconds since an arbitrary epoch chosen by the input source
    pub t: u64,
}

impl Point {
    pub fn new(x: f32, y: f32, t: u64) -> Self {
        Self { x, y, t }
    }
}

/// One continuous pen-down-to-pen-up path
///
/// A stroke always holds at least one point: it can only be created from the
/// touch-down sample.
#[derive(Debug, Clone, PartialEq, Serialize)]
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
}

/// Ordered strokes captured since the last reset or commit
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Ink {
    strokes: Vec<Stroke>,
}

impl Ink {
    pub fn strokes(&self) -> &[Stroke] {
        &self.strokes
    }

    pub fn is_empty(&self) -> bool {
        self.strokes.is_empty()
    }

    pub fn point_count(&self) -> usize {
        self.strokes.iter().map(|s| s.points.len()).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TouchAction {
    Down,
    Move,
    Up,
    Cancel,
}

/// Raw touch sample as delivered by the input surface
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TouchEvent {
    pub action: TouchAction,
    pub x: f32,
    pub y: f32,
    pub t: u64,
}

impl TouchEvent {
    pub fn new(action: TouchAction, x: f32, y: f32, t: u64) -> Self {
        Self { action, x, y, t }
    }

    pub fn point(&self) -> Point {
        Point::new(self.x, self.y, self.t)
    }
}

/// Accumulates pointer samples into strokes and strokes into ink
///
/// The buffer is owned by a single task and never shared; readers get an
/// owned [`Ink`] through [`InkBuffer::snapshot`].
#[derive(Debug, Default)]
pub struct InkBuffer {
    closed: Vec<Stroke>,
    open: Option<Stroke>,
}

impl InkBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_stroke(&mut self, point: Point) -> Result<(), InkError> {
        if self.open.is_some() {
            return Err(InkError::InvalidState("a stroke is already open"));
        }
        self.open = Some(Stroke::starting_at(point));
        Ok(())
    }

    pub fn extend_stroke(&mut self, point: Point) -> Result<(), InkError> {
        let stroke = self
            .open
            .as_mut()
            .ok_or(InkError::InvalidState("no open stroke to extend"))?;
        stroke.points.push(point);
        Ok(())
    }

    pub fn end_stroke(&mut self, point: Point) -> Result<(), InkError> {
        let mut stroke = self
            .open
            .take()
            .ok_or(InkError::InvalidState("no open stroke to end"))?;
        stroke.points.push(point);
        self.closed.push(stroke);
        Ok(())
    }

    /// Route a touch event to the matching stroke operation.
    ///
    /// Returns `true` when the event closed a stroke.
    pub fn apply(&mut self, event: &TouchEvent) -> Result<bool, InkError> {
        match event.action {
            TouchAction::Down => self.begin_stroke(event.point()).map(|_| false),
            TouchAction::Move => self.extend_stroke(event.point()).map(|_| false),
            TouchAction::Up | TouchAction::Cancel => self.end_stroke(event.point()).map(|_| true),
        }
    }

    /// Copy of every stroke so far, the open one last.
    pub fn snapshot(&self) -> Ink {
        let mut strokes = self.closed.clone();
        if let Some(open) = &self.open {
            strokes.push(open.clone());
        }
        Ink { strokes }
    }

    pub fn has_open_stroke(&self) -> bool {
        self.open.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.closed.is_empty() && self.open.is_none()
    }

    pub fn clear(&mut self) {
        self.closed.clear();
        self.open = None;
    }
}

#[cfg(test)]
pub(crate) fn ink_from_strokes(strokes: &[&[(f32, f32)]]) -> Ink {
    let mut buffer = InkBuffer::new();
    let mut t = 0;
    for stroke in strokes {
        for (i, &(x, y)) in stroke.iter().enumerate() {
            t += 10;
            let point = Point::new(x, y, t);
            let result = if i == 0 {
                buffer.begin_stroke(point)
            } else {
                buffer.extend_stroke(point)
            };
            result.unwrap();
        }
        let &(x, y) = stroke.last().unwrap();
        t += 10;
        buffer.end_stroke(Point::new(x, y, t)).unwrap();
    }
    buffer.snapshot()
}
