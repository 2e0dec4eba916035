use serde::{Deserialize, Serialize};

use super::sample::Sample;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceState {
    Detached,
    Preparing,
    Scratchable,
    Cleared,
}

impl SurfaceState {
    pub fn accepts_input(self) -> bool {
        matches!(self, Self::Scratchable)
    }
}

pub fn can_transition(from: SurfaceState, to: SurfaceState) -> bool {
    matches!(
        (from, to),
        (SurfaceState::Detached, SurfaceState::Preparing)
            | (SurfaceState::Preparing, SurfaceState::Scratchable)
            | (SurfaceState::Preparing, SurfaceState::Cleared)
            | (SurfaceState::Scratchable, SurfaceState::Cleared)
            | (SurfaceState::Scratchable, SurfaceState::Preparing)
            | (SurfaceState::Cleared, SurfaceState::Preparing)
            | (_, SurfaceState::Detached)
    ) || from == to
}

/// Everything needed to bring a scratch session back after the host
/// recreates its surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ScratchState {
    pub content_size: (u32, u32),
    pub threshold_reached: bool,
    #[serde(default)]
    pub history: Vec<Sample>,
}

impl ScratchState {
    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
