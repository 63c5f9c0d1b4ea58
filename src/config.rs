use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("{field} must be within [{min}, {max}], got {value}")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("{field} must be greater than zero, got {value}")]
    NotPositive { field: &'static str, value: f64 },

    #[error("Remix band is empty: band_low={low} must be below band_high={high}")]
    EmptyBand { low: f64, high: f64 },
}

/// Clustering thresholds, all in [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Applied to pairs where both videos are declared audio-only.
    pub audio: f64,
    /// Minimum visual score demanded by the strict gating rules.
    pub video: f64,
    /// Applied to every other pair of the combined matrix.
    pub combined: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            audio: 0.75,
            video: 0.85,
            combined: 0.75,
        }
    }
}

/// Weights used to blend the audio and visual matrices.
///
/// They are expected to sum to 1.0; other sums are accepted and logged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModalityWeights {
    pub audio: f64,
    pub video: f64,
}

impl Default for ModalityWeights {
    fn default() -> Self {
        Self {
            audio: 0.5,
            video: 0.5,
        }
    }
}

/// Penalty applied to audio pairs whose base similarity falls inside the
/// ambiguous band where remixes and covers live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemixPenaltyConfig {
    pub enabled: bool,
    /// Inclusive lower bound of the band.
    pub band_low: f64,
    /// Exclusive upper bound of the band.
    pub band_high: f64,
    /// Largest fraction removed from a score (base at `band_low`, full dissimilarity).
    pub max_penalty: f64,
    /// Shape of the falloff toward `band_high`; 1.0 is linear.
    pub curve_exponent: f64,
    pub rolloff_normalization: f64,
    pub zcr_normalization: f64,
    pub bandwidth_normalization: f64,
}

impl Default for RemixPenaltyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            band_low: 0.80,
            band_high: 0.95,
            max_penalty: 0.5,
            curve_exponent: 1.0,
            rolloff_normalization: 2000.0,
            zcr_normalization: 0.05,
            bandwidth_normalization: 1000.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioComparisonConfig {
    pub mfcc_weight: f64,
    pub chroma_weight: f64,
    pub spectral_weight: f64,
    pub tempo_weight: f64,
    /// BPM difference at which tempo similarity reaches zero.
    pub tempo_normalization: f64,
    pub remix: RemixPenaltyConfig,
}

impl Default for AudioComparisonConfig {
    fn default() -> Self {
        Self {
            mfcc_weight: 0.50,
            chroma_weight: 0.25,
            spectral_weight: 0.15,
            tempo_weight: 0.10,
            tempo_normalization: 20.0,
            remix: RemixPenaltyConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnhancedWeights {
    pub brightness: f64,
    pub color: f64,
    pub scene: f64,
    pub context: f64,
}

impl Default for EnhancedWeights {
    fn default() -> Self {
        Self {
            brightness: 0.25,
            color: 0.25,
            scene: 0.25,
            context: 0.25,
        }
    }
}

impl EnhancedWeights {
    pub fn total(&self) -> f64 {
        self.brightness + self.color + self.scene + self.context
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisualComparisonConfig {
    pub embedding_weight: f64,
    pub enhanced_weight: f64,
    pub enhanced: EnhancedWeights,
    /// Luminance difference (0–255 scale) at which brightness closeness reaches zero.
    pub brightness_range: f64,
}

impl Default for VisualComparisonConfig {
    fn default() -> Self {
        Self {
            embedding_weight: 0.6,
            enhanced_weight: 0.4,
            enhanced: EnhancedWeights::default(),
            brightness_range: 100.0,
        }
    }
}

/// Strict per-pair acceptance rules for video and karaoke content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatingConfig {
    /// Karaoke pairs at or above this visual score are always accepted.
    pub karaoke_accept_visual: f64,
    /// Otherwise karaoke pairs need at least this visual score...
    pub karaoke_min_visual: f64,
    /// ...and every gated pair needs at least this audio score.
    pub min_audio: f64,
    pub boost_audio: f64,
    pub boost_visual: f64,
    /// Floor applied to near-identical pairs.
    pub boost_floor: f64,
}

impl Default for GatingConfig {
    fn default() -> Self {
        Self {
            karaoke_accept_visual: 0.92,
            karaoke_min_visual: 0.85,
            min_audio: 0.65,
            boost_audio: 0.96,
            boost_visual: 0.85,
            boost_floor: 0.85,
        }
    }
}

/// Content-type aware rules used while combining matrices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentRules {
    /// Optical-flow magnitude below which a video counts as a static image.
    pub static_flow_threshold: f64,
    /// Use the remaining modality when the other one is undefined.
    pub missing_modality_fallback: bool,
    /// Multiplier for pairs whose known singer counts differ.
    pub singer_mismatch_penalty: Option<f64>,
    /// Never pair audio, karaoke and regular video content with each other.
    pub compare_within_same_type_only: bool,
    pub gating: Option<GatingConfig>,
}

impl Default for ContentRules {
    fn default() -> Self {
        Self {
            static_flow_threshold: 5.0,
            missing_modality_fallback: false,
            singer_mismatch_penalty: Some(0.5),
            compare_within_same_type_only: false,
            gating: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatrixConfig {
    pub parallel: bool,
}

impl Default for MatrixConfig {
    fn default() -> Self {
        Self { parallel: true }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub thresholds: Thresholds,
    pub weights: ModalityWeights,
    pub audio: AudioComparisonConfig,
    pub visual: VisualComparisonConfig,
    pub content: ContentRules,
    pub matrix: MatrixConfig,
}

impl DetectionConfig {
    /// Load and validate a JSON config file. Missing sections take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: DetectionConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_combined_threshold(mut self, threshold: f64) -> Self {
        self.thresholds.combined = threshold;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        unit("thresholds.audio", self.thresholds.audio)?;
        unit("thresholds.video", self.thresholds.video)?;
        unit("thresholds.combined", self.thresholds.combined)?;

        unit("weights.audio", self.weights.audio)?;
        unit("weights.video", self.weights.video)?;
        let weight_sum = self.weights.audio + self.weights.video;
        if (weight_sum - 1.0).abs() > 1e-6 {
            log::warn!(
                "Modality weights sum to {:.3} instead of 1.0; combined scores are clamped",
                weight_sum
            );
        }

        let audio = &self.audio;
        unit("audio.mfcc_weight", audio.mfcc_weight)?;
        unit("audio.chroma_weight", audio.chroma_weight)?;
        unit("audio.spectral_weight", audio.spectral_weight)?;
        unit("audio.tempo_weight", audio.tempo_weight)?;
        positive("audio.tempo_normalization", audio.tempo_normalization)?;
        positive(
            "audio base weights",
            audio.mfcc_weight + audio.chroma_weight + audio.spectral_weight,
        )?;

        let remix = &audio.remix;
        unit("audio.remix.band_low", remix.band_low)?;
        unit("audio.remix.band_high", remix.band_high)?;
        if remix.band_low >= remix.band_high {
            return Err(ConfigError::EmptyBand {
                low: remix.band_low,
                high: remix.band_high,
            });
        }
        unit("audio.remix.max_penalty", remix.max_penalty)?;
        positive("audio.remix.curve_exponent", remix.curve_exponent)?;
        positive("audio.remix.rolloff_normalization", remix.rolloff_normalization)?;
        positive("audio.remix.zcr_normalization", remix.zcr_normalization)?;
        positive("audio.remix.bandwidth_normalization", remix.bandwidth_normalization)?;

        let visual = &self.visual;
        unit("visual.embedding_weight", visual.embedding_weight)?;
        unit("visual.enhanced_weight", visual.enhanced_weight)?;
        unit("visual.enhanced.brightness", visual.enhanced.brightness)?;
        unit("visual.enhanced.color", visual.enhanced.color)?;
        unit("visual.enhanced.scene", visual.enhanced.scene)?;
        unit("visual.enhanced.context", visual.enhanced.context)?;
        positive("visual.enhanced total weight", visual.enhanced.total())?;
        positive("visual.brightness_range", visual.brightness_range)?;

        if self.content.static_flow_threshold < 0.0 {
            return Err(ConfigError::OutOfRange {
                field: "content.static_flow_threshold",
                value: self.content.static_flow_threshold,
                min: 0.0,
                max: f64::INFINITY,
            });
        }
        if let Some(penalty) = self.content.singer_mismatch_penalty {
            unit("content.singer_mismatch_penalty", penalty)?;
        }
        if let Some(gating) = &self.content.gating {
            unit("content.gating.karaoke_accept_visual", gating.karaoke_accept_visual)?;
            unit("content.gating.karaoke_min_visual", gating.karaoke_min_visual)?;
            unit("content.gating.min_audio", gating.min_audio)?;
            unit("content.gating.boost_audio", gating.boost_audio)?;
            unit("content.gating.boost_visual", gating.boost_visual)?;
            unit("content.gating.boost_floor", gating.boost_floor)?;
        }

        Ok(())
    }
}

fn unit(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            value,
            min: 0.0,
            max: 1.0,
        })
    }
}

fn positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::NotPositive { field, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let config = DetectionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.audio.remix.band_low, 0.80);
        assert_eq!(config.audio.remix.band_high, 0.95);
        assert_eq!(config.weights.audio, 0.5);
        assert_eq!(config.content.gating, None);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = DetectionConfig::from_json_str(
            r#"{"thresholds": {"combined": 0.7}, "audio": {"remix": {"band_low": 0.85}}}"#,
        )
        .unwrap();
        assert_eq!(config.thresholds.combined, 0.7);
        assert_eq!(config.thresholds.audio, 0.75);
        assert_eq!(config.audio.remix.band_low, 0.85);
        assert_eq!(config.audio.remix.band_high, 0.95);
        assert_eq!(config.audio.tempo_normalization, 20.0);
    }

    #[test]
    fn test_threshold_out_of_range_rejected() {
        let result = DetectionConfig::from_json_str(r#"{"thresholds": {"combined": 1.5}}"#);
        assert!(matches!(
            result,
            Err(ConfigError::OutOfRange {
                field: "thresholds.combined",
                ..
            })
        ));
    }

    #[test]
    fn test_inverted_band_rejected() {
        let result = DetectionConfig::from_json_str(
            r#"{"audio": {"remix": {"band_low": 0.9, "band_high": 0.8}}}"#,
        );
        assert!(matches!(result, Err(ConfigError::EmptyBand { .. })));
    }

    #[test]
    fn test_zero_tempo_normalization_rejected() {
        let result = DetectionConfig::from_json_str(r#"{"audio": {"tempo_normalization": 0}}"#);
        assert!(matches!(result, Err(ConfigError::NotPositive { .. })));
    }

    #[test]
    fn test_unbalanced_weights_are_accepted() {
        let config =
            DetectionConfig::from_json_str(r#"{"weights": {"audio": 0.7, "video": 0.7}}"#).unwrap();
        assert_eq!(config.weights.audio, 0.7);
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        fs::write(&path, r#"{"content": {"missing_modality_fallback": true}}"#).unwrap();

        let config = DetectionConfig::from_json_file(&path).unwrap();
        assert!(config.content.missing_modality_fallback);

        let missing = DetectionConfig::from_json_file(&temp_dir.path().join("nope.json"));
        assert!(matches!(missing, Err(ConfigError::Io(_))));
    }
}
