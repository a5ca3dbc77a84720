//! Renderer configuration.

use crate::score::StyleId;
use crate::{Error, Result};

/// Configuration for the phrase-rendering pipeline.
///
/// The durations shape the silence around each phrase and the fade applied
/// to its trailing pau; the style id selects the voice used for the
/// query/pitch/volume analysis calls.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderConfig {
    /// Style used for query, pitch and volume generation.
    pub singing_teacher_style_id: StyleId,
    /// Floor on a phrase's leading rest, in seconds.
    pub first_rest_min_duration_seconds: f64,
    /// Fixed trailing rest appended to every phrase, in seconds.
    pub last_rest_duration_seconds: f64,
    /// Length of the linear fade across the trailing pau, in seconds.
    pub fade_out_duration_seconds: f64,
}

impl RenderConfig {
    pub fn new(singing_teacher_style_id: StyleId) -> Self {
        Self {
            singing_teacher_style_id,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            (
                "first_rest_min_duration_seconds",
                self.first_rest_min_duration_seconds,
            ),
            (
                "last_rest_duration_seconds",
                self.last_rest_duration_seconds,
            ),
            (
                "fade_out_duration_seconds",
                self.fade_out_duration_seconds,
            ),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(Error::InvalidConfig(format!(
                    "{} must be a non-negative finite number, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            singing_teacher_style_id: StyleId(0),
            first_rest_min_duration_seconds: 0.12,
            last_rest_duration_seconds: 0.5,
            fade_out_duration_seconds: 0.15,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = RenderConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.last_rest_duration_seconds, 0.5);
    }

    #[test]
    fn test_negative_duration_rejected() {
        let config = RenderConfig {
            fade_out_duration_seconds: -0.1,
            ..RenderConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_nan_duration_rejected() {
        let config = RenderConfig {
            first_rest_min_duration_seconds: f64::NAN,
            ..RenderConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
