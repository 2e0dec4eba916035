use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::scratch::backoff::BackoffScheduler;
use crate::scratch::coverage::Quality;

pub const SETTINGS_FILE_NAME: &str = "scratchoff_settings.json";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackoffSettings {
    pub active_delay_ms: u64,
    pub idle_delay_ms: u64,
    pub idle_threshold_ms: u64,
}

impl BackoffSettings {
    pub const fn new(active_delay_ms: u64, idle_delay_ms: u64, idle_threshold_ms: u64) -> Self {
        Self {
            active_delay_ms,
            idle_delay_ms,
            idle_threshold_ms,
        }
    }

    pub fn scheduler(&self) -> BackoffScheduler {
        BackoffScheduler::new(
            Duration::from_millis(self.active_delay_ms),
            Duration::from_millis(self.idle_delay_ms),
            Duration::from_millis(self.idle_threshold_ms),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScratchSettings {
    #[serde(default = "default_touch_radius_px")]
    pub touch_radius_px: u32,
    #[serde(default = "default_threshold_completion_percent")]
    pub threshold_completion_percent: f32,
    #[serde(default = "default_quality")]
    pub quality: Quality,
    #[serde(default = "default_clear_on_threshold_reached")]
    pub clear_on_threshold_reached: bool,
    #[serde(default = "default_state_restoration_enabled")]
    pub state_restoration_enabled: bool,
    #[serde(default = "default_evaluator_backoff")]
    pub evaluator_backoff: BackoffSettings,
    #[serde(default = "default_orchestrator_backoff")]
    pub orchestrator_backoff: BackoffSettings,
    #[serde(default = "default_priming_delay_ms")]
    pub priming_delay_ms: u64,
}

impl Default for ScratchSettings {
    fn default() -> Self {
        Self {
            touch_radius_px: default_touch_radius_px(),
            threshold_completion_percent: default_threshold_completion_percent(),
            quality: default_quality(),
            clear_on_threshold_reached: default_clear_on_threshold_reached(),
            state_restoration_enabled: default_state_restoration_enabled(),
            evaluator_backoff: default_evaluator_backoff(),
            orchestrator_backoff: default_orchestrator_backoff(),
            priming_delay_ms: default_priming_delay_ms(),
        }
    }
}

impl ScratchSettings {
    /// Load settings from `path`. A missing or empty file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("read scratch settings file {}", path.display()))?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let loaded: Self = serde_json::from_str(&content)
            .with_context(|| format!("deserialize scratch settings file {}", path.display()))?;
        loaded.validate()?;
        Ok(loaded)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("create scratch settings parent folder {}", parent.display())
                })?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("write scratch settings file {}", path.display()))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        validate_touch_radius(self.touch_radius_px)?;
        validate_completion_percent(self.threshold_completion_percent)?;
        self.quality.validate()?;
        for (name, backoff) in [
            ("evaluator_backoff", &self.evaluator_backoff),
            ("orchestrator_backoff", &self.orchestrator_backoff),
        ] {
            if backoff.active_delay_ms == 0 || backoff.idle_delay_ms == 0 {
                bail!("{name} delays must be greater than 0");
            }
        }
        if self.priming_delay_ms == 0 {
            bail!("priming_delay_ms must be greater than 0");
        }
        Ok(())
    }

    pub fn priming_delay(&self) -> Duration {
        Duration::from_millis(self.priming_delay_ms)
    }
}

pub fn validate_touch_radius(touch_radius_px: u32) -> Result<()> {
    if touch_radius_px < 1 {
        bail!("touch radius must be greater than 0");
    }
    Ok(())
}

pub fn validate_completion_percent(percent: f32) -> Result<()> {
    if !percent.is_finite() || !(0.0..=1.0).contains(&percent) {
        bail!("threshold completion percent must be within [0.0, 1.0], got {percent}");
    }
    Ok(())
}

fn default_touch_radius_px() -> u32 {
    25
}

fn default_threshold_completion_percent() -> f32 {
    0.65
}

fn default_quality() -> Quality {
    Quality::High
}

fn default_clear_on_threshold_reached() -> bool {
    true
}

fn default_state_restoration_enabled() -> bool {
    true
}

fn default_evaluator_backoff() -> BackoffSettings {
    BackoffSettings::new(25, 75, 3000)
}

fn default_orchestrator_backoff() -> BackoffSettings {
    BackoffSettings::new(15, 50, 3000)
}

fn default_priming_delay_ms() -> u64 {
    100
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_falls_back_to_defaults_per_field() {
        let loaded: ScratchSettings =
            serde_json::from_str(r#"{ "touch_radius_px": 12, "quality": "medium" }"#)
                .expect("partial settings should deserialize");

        assert_eq!(loaded.touch_radius_px, 12);
        assert_eq!(loaded.quality, Quality::Medium);
        assert_eq!(loaded.threshold_completion_percent, 0.65);
        assert!(loaded.clear_on_threshold_reached);
        assert_eq!(loaded.evaluator_backoff, BackoffSettings::new(25, 75, 3000));
    }

    #[test]
    fn validate_rejects_zero_touch_radius() {
        let settings = ScratchSettings {
            touch_radius_px: 0,
            ..ScratchSettings::default()
        };
        let err = settings.validate().expect_err("zero radius must be rejected");
        assert!(err.to_string().contains("touch radius"));
    }

    #[test]
    fn validate_rejects_completion_percent_out_of_range() {
        assert!(validate_completion_percent(1.5).is_err());
        assert!(validate_completion_percent(-0.1).is_err());
        assert!(validate_completion_percent(f32::NAN).is_err());
        assert!(validate_completion_percent(0.0).is_ok());
        assert!(validate_completion_percent(1.0).is_ok());
    }

    #[test]
    fn validate_rejects_custom_quality_out_of_range() {
        let settings = ScratchSettings {
            quality: Quality::Custom(0.0),
            ..ScratchSettings::default()
        };
        assert!(settings.validate().is_err());
    }
}
