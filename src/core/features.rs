use serde::{Deserialize, Serialize};

/// Feature domain a vector belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Audio,
    Visual,
}

/// A numeric feature segment as handed over by an extractor.
///
/// Extractors either pool the segment themselves or pass the raw
/// frames × coefficients matrix. Both are reduced to a fixed-length summary
/// (mean over time frames) before comparison, so two clips of different
/// duration remain comparable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Segment {
    Pooled(Vec<f64>),
    Frames(Vec<Vec<f64>>),
}

impl Segment {
    /// Mean over time frames. `None` when empty or when frames disagree on length.
    pub fn summary(&self) -> Option<Vec<f64>> {
        match self {
            Segment::Pooled(values) => {
                if values.is_empty() {
                    None
                } else {
                    Some(values.clone())
                }
            }
            Segment::Frames(frames) => {
                let width = frames.first()?.len();
                if width == 0 || frames.iter().any(|f| f.len() != width) {
                    return None;
                }

                let mut sums = vec![0.0; width];
                for frame in frames {
                    for (sum, value) in sums.iter_mut().zip(frame) {
                        *sum += value;
                    }
                }
                let count = frames.len() as f64;
                Some(sums.into_iter().map(|s| s / count).collect())
            }
        }
    }
}

impl From<Vec<f64>> for Segment {
    fn from(values: Vec<f64>) -> Self {
        Segment::Pooled(values)
    }
}

/// Production-effect descriptors that tend to separate remixes from the source mix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RemixDescriptors {
    /// Mean spectral roll-off in Hz.
    pub rolloff_mean: f64,
    /// Mean zero-crossing rate.
    pub zcr_mean: f64,
    /// Mean spectral bandwidth in Hz.
    pub bandwidth_mean: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioFeatures {
    pub mfcc: Segment,
    pub chroma: Segment,
    pub spectral_contrast: Segment,
    /// Estimated tempo in BPM.
    pub tempo: f64,
    #[serde(default)]
    pub remix: Option<RemixDescriptors>,
}

/// Color distribution summary; every field normalized to [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColorSummary {
    pub hue: f64,
    pub saturation: f64,
    pub variance: f64,
}

/// Scene complexity summary; every field normalized to [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SceneSummary {
    pub edge_density: f64,
    pub texture_variance: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerformanceContext {
    pub indoor: bool,
    pub night: bool,
}

/// Scalar visual summaries produced next to the frame embedding.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnhancedSummary {
    /// Mean frame luminance on the 0–255 scale.
    pub brightness: f64,
    pub color: ColorSummary,
    pub scene: SceneSummary,
    pub context: PerformanceContext,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualFeatures {
    pub embedding: Segment,
    #[serde(default)]
    pub enhanced: Option<EnhancedSummary>,
    /// Mean optical-flow magnitude; low values mark near-static frames.
    #[serde(default)]
    pub optical_flow: Option<f64>,
}

impl VisualFeatures {
    pub fn is_static(&self, flow_threshold: f64) -> bool {
        self.optical_flow.is_some_and(|flow| flow < flow_threshold)
    }
}

/// Per-modality feature vector for one video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "modality", rename_all = "lowercase")]
pub enum FeatureVector {
    Audio(AudioFeatures),
    Visual(VisualFeatures),
}

impl FeatureVector {
    pub fn modality(&self) -> Modality {
        match self {
            FeatureVector::Audio(_) => Modality::Audio,
            FeatureVector::Visual(_) => Modality::Visual,
        }
    }

    pub fn as_visual(&self) -> Option<&VisualFeatures> {
        match self {
            FeatureVector::Visual(v) => Some(v),
            FeatureVector::Audio(_) => None,
        }
    }
}

impl From<AudioFeatures> for FeatureVector {
    fn from(features: AudioFeatures) -> Self {
        FeatureVector::Audio(features)
    }
}

impl From<VisualFeatures> for FeatureVector {
    fn from(features: VisualFeatures) -> Self {
        FeatureVector::Visual(features)
    }
}
