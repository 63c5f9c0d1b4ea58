use crate::config::{
    AudioComparisonConfig, DetectionConfig, RemixPenaltyConfig, VisualComparisonConfig,
};
use crate::core::features::{
    AudioFeatures, EnhancedSummary, FeatureVector, RemixDescriptors, VisualFeatures,
};
use serde::{Deserialize, Serialize};

/// Per-component view of one audio comparison, kept for debugging and reports.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AudioComparison {
    pub mfcc: f64,
    pub chroma: f64,
    pub spectral: f64,
    pub tempo: f64,
    /// MFCC, chroma and spectral terms only.
    pub base: f64,
    pub dissimilarity: f64,
    pub penalty: f64,
    pub score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VisualComparison {
    pub embedding: f64,
    pub enhanced: Option<f64>,
    pub score: f64,
}

/// Scores two feature vectors of the same modality.
///
/// Every method returns `None` when the pair cannot be compared (missing or
/// empty segments, zero-magnitude vectors, non-finite input, modality
/// mismatch). `None` means "undefined" and must never be read as a low score.
#[derive(Debug, Clone)]
pub struct FeatureComparator {
    audio: AudioComparisonConfig,
    visual: VisualComparisonConfig,
}

impl FeatureComparator {
    pub fn new(config: &DetectionConfig) -> Self {
        Self {
            audio: config.audio.clone(),
            visual: config.visual.clone(),
        }
    }

    pub fn compare(&self, a: &FeatureVector, b: &FeatureVector) -> Option<f64> {
        match (a, b) {
            (FeatureVector::Audio(a), FeatureVector::Audio(b)) => self.compare_audio(a, b),
            (FeatureVector::Visual(a), FeatureVector::Visual(b)) => self.compare_visual(a, b),
            _ => None,
        }
    }

    pub fn compare_audio(&self, a: &AudioFeatures, b: &AudioFeatures) -> Option<f64> {
        self.audio_breakdown(a, b).map(|c| c.score)
    }

    pub fn audio_breakdown(
        &self,
        a: &AudioFeatures,
        b: &AudioFeatures,
    ) -> Option<AudioComparison> {
        let cfg = &self.audio;

        let mfcc = cosine_similarity(&a.mfcc.summary()?, &b.mfcc.summary()?)?;
        let chroma = cosine_similarity(&a.chroma.summary()?, &b.chroma.summary()?)?;
        let spectral = cosine_similarity(
            &a.spectral_contrast.summary()?,
            &b.spectral_contrast.summary()?,
        )?;

        if !a.tempo.is_finite() || !b.tempo.is_finite() {
            return None;
        }
        let tempo_delta = (a.tempo - b.tempo).abs() / cfg.tempo_normalization;
        let tempo = (1.0 - tempo_delta).max(0.0);

        let base_weight = cfg.mfcc_weight + cfg.chroma_weight + cfg.spectral_weight;
        let base_sum =
            cfg.mfcc_weight * mfcc + cfg.chroma_weight * chroma + cfg.spectral_weight * spectral;
        let base = base_sum / base_weight;

        let total_weight = base_weight + cfg.tempo_weight;
        let weighted = (base_sum + cfg.tempo_weight * tempo) / total_weight;

        let dissimilarity = structural_dissimilarity(
            &cfg.remix,
            tempo_delta.min(1.0),
            1.0 - spectral,
            a.remix.as_ref().zip(b.remix.as_ref()),
        );
        let penalty = remix_penalty_factor(&cfg.remix, base, dissimilarity);
        let score = (weighted * penalty).clamp(0.0, 1.0);

        if !score.is_finite() {
            return None;
        }

        if penalty < 1.0 {
            log::debug!(
                "Remix penalty {:.3} applied (base={:.3}, dissimilarity={:.3}) -> {:.3}",
                penalty,
                base,
                dissimilarity,
                score
            );
        }

        Some(AudioComparison {
            mfcc,
            chroma,
            spectral,
            tempo,
            base,
            dissimilarity,
            penalty,
            score,
        })
    }

    pub fn compare_visual(&self, a: &VisualFeatures, b: &VisualFeatures) -> Option<f64> {
        self.visual_breakdown(a, b).map(|c| c.score)
    }

    pub fn visual_breakdown(
        &self,
        a: &VisualFeatures,
        b: &VisualFeatures,
    ) -> Option<VisualComparison> {
        let cfg = &self.visual;
        let embedding = cosine_similarity(&a.embedding.summary()?, &b.embedding.summary()?)?;

        let enhanced = match (&a.enhanced, &b.enhanced) {
            (Some(ea), Some(eb)) => Some(self.enhanced_similarity(ea, eb)),
            _ => None,
        };

        let score = match enhanced {
            Some(enhanced) => {
                let total = cfg.embedding_weight + cfg.enhanced_weight;
                if total <= 0.0 {
                    embedding
                } else {
                    (cfg.embedding_weight * embedding + cfg.enhanced_weight * enhanced) / total
                }
            }
            None => embedding,
        }
        .clamp(0.0, 1.0);

        if !score.is_finite() {
            return None;
        }

        Some(VisualComparison {
            embedding,
            enhanced,
            score,
        })
    }

    /// Weighted average of brightness, color, scene and context closeness.
    pub fn enhanced_similarity(&self, a: &EnhancedSummary, b: &EnhancedSummary) -> f64 {
        let weights = &self.visual.enhanced;

        let brightness = closeness(a.brightness, b.brightness, self.visual.brightness_range);
        let color = (hue_closeness(a.color.hue, b.color.hue)
            + closeness(a.color.saturation, b.color.saturation, 1.0)
            + closeness(a.color.variance, b.color.variance, 1.0))
            / 3.0;
        let scene = (closeness(a.scene.edge_density, b.scene.edge_density, 1.0)
            + closeness(a.scene.texture_variance, b.scene.texture_variance, 1.0))
            / 2.0;
        let context = (flag_match(a.context.indoor, b.context.indoor)
            + flag_match(a.context.night, b.context.night))
            / 2.0;

        (weights.brightness * brightness
            + weights.color * color
            + weights.scene * scene
            + weights.context * context)
            / weights.total()
    }
}

/// Cosine similarity clamped to [0, 1] (`1 - cosine_distance`).
///
/// `None` for empty or mismatched lengths, zero magnitude, or non-finite values.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> Option<f64> {
    if a.is_empty() || a.len() != b.len() {
        return None;
    }

    let mut dot = 0.0;
    let mut norm_a = 0.0;
    let mut norm_b = 0.0;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if !(dot.is_finite() && norm_a.is_finite() && norm_b.is_finite()) {
        return None;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }
    if a == b {
        return Some(1.0);
    }

    let cos = dot / (norm_a * norm_b).sqrt();
    cos.is_finite().then(|| cos.clamp(0.0, 1.0))
}

/// Multiplier applied to an audio score whose base similarity sits in the remix band.
///
/// Returns 1.0 outside the band. Inside it the penalty grows with structural
/// dissimilarity and with the distance from the top of the band, so a base of
/// 0.82 is cut harder than a base of 0.93 with the same dissimilarity.
pub fn remix_penalty_factor(cfg: &RemixPenaltyConfig, base: f64, dissimilarity: f64) -> f64 {
    if !cfg.enabled || base < cfg.band_low || base >= cfg.band_high {
        return 1.0;
    }

    let position = (cfg.band_high - base) / (cfg.band_high - cfg.band_low);
    let strength = position.clamp(0.0, 1.0).powf(cfg.curve_exponent);
    1.0 - cfg.max_penalty * dissimilarity.clamp(0.0, 1.0) * strength
}

fn structural_dissimilarity(
    cfg: &RemixPenaltyConfig,
    tempo_delta: f64,
    spectral_delta: f64,
    descriptors: Option<(&RemixDescriptors, &RemixDescriptors)>,
) -> f64 {
    let mut deltas = vec![tempo_delta, spectral_delta.clamp(0.0, 1.0)];

    if let Some((a, b)) = descriptors {
        deltas.push(normalized_delta(a.rolloff_mean, b.rolloff_mean, cfg.rolloff_normalization));
        deltas.push(normalized_delta(a.zcr_mean, b.zcr_mean, cfg.zcr_normalization));
        deltas.push(normalized_delta(
            a.bandwidth_mean,
            b.bandwidth_mean,
            cfg.bandwidth_normalization,
        ));
    }

    deltas.iter().sum::<f64>() / deltas.len() as f64
}

fn normalized_delta(a: f64, b: f64, range: f64) -> f64 {
    ((a - b).abs() / range).min(1.0)
}

fn closeness(a: f64, b: f64, range: f64) -> f64 {
    (1.0 - (a - b).abs() / range).clamp(0.0, 1.0)
}

/// Hue lives on a circle: 0.0 and 1.0 are the same color.
fn hue_closeness(a: f64, b: f64) -> f64 {
    let d = (a - b).abs().rem_euclid(1.0);
    (1.0 - 2.0 * d.min(1.0 - d)).clamp(0.0, 1.0)
}

fn flag_match(a: bool, b: bool) -> f64 {
    if a == b { 1.0 } else { 0.0 }
}
