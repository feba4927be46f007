//! Generation settings, defaults and request validation.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::prompt::MAX_BATCH_IMAGES;

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Provider backed by a ComfyUI server.
pub const PROVIDER_COMFYUI: &str = "comfyui";
/// Provider that renders placeholder images locally.
pub const PROVIDER_MOCK: &str = "mock";

pub const DEFAULT_PROVIDER: &str = PROVIDER_COMFYUI;
pub const DEFAULT_MODEL: &str = "sd15";
pub const DEFAULT_WIDTH: i32 = 512;
pub const DEFAULT_HEIGHT: i32 = 512;

// ---------------------------------------------------------------------------
// Limits
// ---------------------------------------------------------------------------

/// Maximum prompt length in characters.
pub const MAX_PROMPT_LENGTH: usize = 2_000;
/// Maximum length of model and provider identifiers.
pub const MAX_IDENTIFIER_LENGTH: usize = 100;
/// Smallest accepted image edge in pixels.
pub const MIN_DIMENSION: i32 = 64;
/// Largest accepted image edge in pixels.
pub const MAX_DIMENSION: i32 = 4_096;

/// Model, provider and resolution applied to a job, or to every child of
/// a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationSettings {
    pub model: String,
    pub provider: String,
    pub width: i32,
    pub height: i32,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            provider: DEFAULT_PROVIDER.to_string(),
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
        }
    }
}

impl GenerationSettings {
    /// Validate identifiers and resolution.
    pub fn validate(&self) -> Result<(), CoreError> {
        validate_identifier("model", &self.model)?;
        validate_identifier("provider", &self.provider)?;
        validate_dimension("width", self.width)?;
        validate_dimension("height", self.height)?;
        Ok(())
    }
}

/// A prompt must be non-empty and within [`MAX_PROMPT_LENGTH`].
pub fn validate_prompt(text: &str) -> Result<(), CoreError> {
    if text.trim().is_empty() {
        return Err(CoreError::Validation("Prompt must not be empty".to_string()));
    }
    let len = text.chars().count();
    if len > MAX_PROMPT_LENGTH {
        return Err(CoreError::Validation(format!(
            "Prompt exceeds maximum length of {MAX_PROMPT_LENGTH} characters (got {len})"
        )));
    }
    Ok(())
}

/// Batch size must be within `1..=MAX_BATCH_IMAGES`.
pub fn validate_total_images(total: i32) -> Result<(), CoreError> {
    if total < 1 || total as usize > MAX_BATCH_IMAGES {
        return Err(CoreError::Validation(format!(
            "total_images must be between 1 and {MAX_BATCH_IMAGES} (got {total})"
        )));
    }
    Ok(())
}

fn validate_identifier(field: &str, value: &str) -> Result<(), CoreError> {
    if value.trim().is_empty() {
        return Err(CoreError::Validation(format!("{field} must not be empty")));
    }
    if value.len() > MAX_IDENTIFIER_LENGTH {
        return Err(CoreError::Validation(format!(
            "{field} exceeds maximum length of {MAX_IDENTIFIER_LENGTH} characters"
        )));
    }
    Ok(())
}

fn validate_dimension(field: &str, value: i32) -> Result<(), CoreError> {
    if !(MIN_DIMENSION..=MAX_DIMENSION).contains(&value) {
        return Err(CoreError::Validation(format!(
            "{field} must be between {MIN_DIMENSION} and {MAX_DIMENSION} pixels (got {value})"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_are_valid() {
        assert!(GenerationSettings::default().validate().is_ok());
    }

    #[test]
    fn empty_model_rejected() {
        let settings = GenerationSettings {
            model: " ".to_string(),
            ..Default::default()
        };
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("model must not be empty"));
    }

    #[test]
    fn non_positive_dimensions_rejected() {
        let settings = GenerationSettings {
            width: 0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());

        let settings = GenerationSettings {
            height: -512,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn oversized_dimension_rejected() {
        let settings = GenerationSettings {
            width: MAX_DIMENSION + 1,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn prompt_bounds() {
        assert!(validate_prompt("a cat").is_ok());
        assert!(validate_prompt("").is_err());
        assert!(validate_prompt(&"x".repeat(MAX_PROMPT_LENGTH)).is_ok());
        assert!(validate_prompt(&"x".repeat(MAX_PROMPT_LENGTH + 1)).is_err());
    }

    #[test]
    fn total_images_bounds() {
        assert!(validate_total_images(1).is_ok());
        assert!(validate_total_images(MAX_BATCH_IMAGES as i32).is_ok());
        assert!(validate_total_images(0).is_err());
        assert!(validate_total_images(-3).is_err());
        assert!(validate_total_images(MAX_BATCH_IMAGES as i32 + 1).is_err());
    }
}
