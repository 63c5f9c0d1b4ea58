use crate::core::features::{AudioFeatures, FeatureVector, VisualFeatures};
use crate::core::video::VideoRecord;
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

/// A detection batch: video records plus per-modality features keyed by video id.
///
/// A video missing from a feature map has no features for that modality.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchInput {
    pub videos: Vec<VideoRecord>,
    #[serde(default)]
    pub audio_features: HashMap<String, AudioFeatures>,
    #[serde(default)]
    pub visual_features: HashMap<String, VisualFeatures>,
}

impl BatchInput {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read batch file {:?}", path))?;
        Self::from_json_str(&raw).with_context(|| format!("Invalid batch file {:?}", path))
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let batch: BatchInput = serde_json::from_str(raw)?;
        batch.validate()?;
        Ok(batch)
    }

    /// Rejects duplicate video ids; features for unknown ids are logged and ignored.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for video in &self.videos {
            if video.id.trim().is_empty() {
                bail!("Video record with an empty id");
            }
            if !seen.insert(video.id.as_str()) {
                bail!("Duplicate video id {:?}", video.id);
            }
        }

        let orphans = self
            .audio_features
            .keys()
            .chain(self.visual_features.keys())
            .filter(|id| !seen.contains(id.as_str()))
            .count();
        if orphans > 0 {
            log::warn!("{} feature entries reference unknown video ids", orphans);
        }
        Ok(())
    }

    pub fn audio_vectors(&self) -> HashMap<String, FeatureVector> {
        self.audio_features
            .iter()
            .map(|(id, features)| (id.clone(), FeatureVector::Audio(features.clone())))
            .collect()
    }

    pub fn visual_vectors(&self) -> HashMap<String, FeatureVector> {
        self.visual_features
            .iter()
            .map(|(id, features)| (id.clone(), FeatureVector::Visual(features.clone())))
            .collect()
    }
}
