pub mod logging;
pub mod scratch;
pub mod settings;

pub use scratch::{
    ActionKind, Quality, RestoreOutcome, Sample, ScratchController, ScratchEvent, ScratchListener,
    ScratchState, SurfaceState, TouchEvent,
};
pub use settings::ScratchSettings;
