use crate::config::{DetectionConfig, GatingConfig};
use crate::core::features::FeatureVector;
use crate::core::matrix::SimilarityMatrix;
use crate::core::orchestrator::{DetectionError, DetectionStage};
use crate::core::video::VideoRecord;
use std::collections::HashMap;

/// Flags videos whose optical flow marks them as near-static frames.
///
/// Videos without visual features or without a flow estimate are never static.
pub fn classify_static(
    records: &[VideoRecord],
    visual_features: &HashMap<String, FeatureVector>,
    flow_threshold: f64,
) -> Vec<bool> {
    records
        .iter()
        .map(|record| {
            visual_features
                .get(&record.id)
                .and_then(FeatureVector::as_visual)
                .is_some_and(|visual| visual.is_static(flow_threshold))
        })
        .collect()
}

/// Merges the audio and visual matrices into one combined matrix.
pub struct MatrixCombiner<'a> {
    config: &'a DetectionConfig,
}

impl<'a> MatrixCombiner<'a> {
    pub fn new(config: &'a DetectionConfig) -> Self {
        Self { config }
    }

    pub fn combine(
        &self,
        audio: &SimilarityMatrix,
        visual: &SimilarityMatrix,
        records: &[VideoRecord],
        static_flags: &[bool],
    ) -> Result<SimilarityMatrix, DetectionError> {
        check_shape(audio, records)?;
        check_shape(visual, records)?;
        if static_flags.len() != records.len() {
            return Err(DetectionError::ShapeMismatch {
                stage: DetectionStage::Combine,
                expected: records.len(),
                actual: static_flags.len(),
            });
        }

        let ids = records.iter().map(|r| r.id.clone()).collect();
        let combined = SimilarityMatrix::from_fn(ids, |i, j| {
            self.combine_pair(
                &records[i],
                &records[j],
                audio.get(i, j),
                visual.get(i, j),
                static_flags[i] || static_flags[j],
            )
        });
        Ok(combined)
    }

    /// Applies the content-type rules to one unordered pair.
    pub fn combine_pair(
        &self,
        a: &VideoRecord,
        b: &VideoRecord,
        audio: Option<f64>,
        visual: Option<f64>,
        either_static: bool,
    ) -> Option<f64> {
        let rules = &self.config.content;

        if rules.compare_within_same_type_only
            && a.content_type.family() != b.content_type.family()
        {
            return None;
        }

        let score = self.modality_score(a, b, audio, visual, either_static)?;

        Some(self.apply_singer_penalty(a, b, score))
    }

    fn modality_score(
        &self,
        a: &VideoRecord,
        b: &VideoRecord,
        audio: Option<f64>,
        visual: Option<f64>,
        either_static: bool,
    ) -> Option<f64> {
        if a.content_type.is_audio() || b.content_type.is_audio() {
            return audio;
        }
        if either_static {
            log::debug!("Static pair {} / {}: using audio similarity", a.id, b.id);
            return audio.or(visual);
        }

        match (audio, visual) {
            (Some(audio_score), Some(visual_score)) => {
                let weights = &self.config.weights;
                let weighted =
                    (weights.audio * audio_score + weights.video * visual_score).clamp(0.0, 1.0);
                Some(match &self.config.content.gating {
                    Some(gating) => self.gate(a, b, weighted, audio_score, visual_score, gating),
                    None => weighted,
                })
            }
            (Some(only), None) | (None, Some(only))
                if self.config.content.missing_modality_fallback =>
            {
                Some(only)
            }
            _ => None,
        }
    }

    fn gate(
        &self,
        a: &VideoRecord,
        b: &VideoRecord,
        combined: f64,
        audio: f64,
        visual: f64,
        gating: &GatingConfig,
    ) -> f64 {
        let karaoke_pair = a.content_type.is_karaoke() && b.content_type.is_karaoke();

        let accepted = if karaoke_pair {
            visual >= gating.karaoke_accept_visual
                || (visual >= gating.karaoke_min_visual && audio >= gating.min_audio)
        } else {
            audio >= gating.min_audio && visual >= self.config.thresholds.video
        };

        if !accepted {
            log::debug!(
                "Gate rejected {} / {} (audio={:.3}, visual={:.3})",
                a.id,
                b.id,
                audio,
                visual
            );
            return 0.0;
        }

        if audio >= gating.boost_audio && visual >= gating.boost_visual {
            return combined.max(gating.boost_floor);
        }
        combined
    }

    fn apply_singer_penalty(&self, a: &VideoRecord, b: &VideoRecord, score: f64) -> f64 {
        let Some(penalty) = self.config.content.singer_mismatch_penalty else {
            return score;
        };
        match (a.singer_count, b.singer_count) {
            (Some(sa), Some(sb)) if sa > 0 && sb > 0 && sa != sb => {
                let penalized = score * penalty;
                log::debug!(
                    "Singer mismatch {} / {} ({} vs {}): {:.3} -> {:.3}",
                    a.id,
                    b.id,
                    sa,
                    sb,
                    score,
                    penalized
                );
                penalized
            }
            _ => score,
        }
    }
}

fn check_shape(matrix: &SimilarityMatrix, records: &[VideoRecord]) -> Result<(), DetectionError> {
    if matrix.size() != records.len() {
        return Err(DetectionError::ShapeMismatch {
            stage: DetectionStage::Combine,
            expected: records.len(),
            actual: matrix.size(),
        });
    }
    if let Some(index) = matrix
        .ids()
        .iter()
        .zip(records)
        .position(|(id, record)| *id != record.id)
    {
        return Err(DetectionError::IdentifierMismatch {
            stage: DetectionStage::Combine,
            index,
        });
    }
    Ok(())
}
