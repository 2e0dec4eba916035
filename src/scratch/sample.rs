use serde::{Deserialize, Serialize};

/// Maximum number of simultaneously tracked pointer slots.
pub const POINTER_LIMIT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Down,
    PointerDown,
    Move,
    Up,
    PointerUp,
    Cancel,
}

impl ActionKind {
    /// Actions that only affect the pointer that triggered them.
    fn is_pointer_scoped(self) -> bool {
        matches!(self, ActionKind::PointerDown | ActionKind::PointerUp)
    }
}

/// One pointer position observation, in content coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub pointer_slot: usize,
    pub x: f32,
    pub y: f32,
    pub action: ActionKind,
}

impl Sample {
    pub const fn new(pointer_slot: usize, x: f32, y: f32, action: ActionKind) -> Self {
        Self {
            pointer_slot,
            x,
            y,
            action,
        }
    }

    pub fn is_tracked_slot(&self) -> bool {
        self.pointer_slot < POINTER_LIMIT
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PointerPosition {
    pub x: f32,
    pub y: f32,
}

impl PointerPosition {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// A host input event: current positions of every pointer in contact plus
/// any positions the host batched since the previous event.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TouchEvent {
    pub action: Option<ActionKind>,
    /// Pointer index the action applies to for `PointerDown`/`PointerUp`.
    pub action_index: usize,
    pub pointers: Vec<PointerPosition>,
    /// Historical batches, oldest first. Each entry holds one position per
    /// pointer, indexed like `pointers`.
    pub history: Vec<Vec<PointerPosition>>,
}

impl TouchEvent {
    pub fn new(action: ActionKind, pointers: Vec<PointerPosition>) -> Self {
        Self {
            action: Some(action),
            action_index: 0,
            pointers,
            history: Vec::new(),
        }
    }

    pub fn single(action: ActionKind, x: f32, y: f32) -> Self {
        Self::new(action, vec![PointerPosition::new(x, y)])
    }

    pub fn with_action_index(mut self, action_index: usize) -> Self {
        self.action_index = action_index;
        self
    }

    pub fn with_history(mut self, history: Vec<Vec<PointerPosition>>) -> Self {
        self.history = history;
        self
    }
}

/// Expand one host event into samples: every historical position tagged
/// `Move` (oldest first, grouped by pointer), followed by the current
/// positions tagged with their action.
pub fn samples_from_event(event: &TouchEvent) -> Vec<Sample> {
    let Some(action) = event.action else {
        return Vec::new();
    };

    let pointer_count = event.pointers.len();
    let mut samples = Vec::with_capacity(event.history.len() * pointer_count + pointer_count);

    for batch in &event.history {
        for (slot, position) in batch.iter().enumerate().take(pointer_count) {
            samples.push(Sample::new(slot, position.x, position.y, ActionKind::Move));
        }
    }

    for (slot, position) in event.pointers.iter().enumerate() {
        let action = if action.is_pointer_scoped() && slot != event.action_index {
            ActionKind::Move
        } else {
            action
        };
        samples.push(Sample::new(slot, position.x, position.y, action));
    }

    samples
}
