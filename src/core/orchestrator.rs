use crate::config::DetectionConfig;
use crate::core::cluster::ClusterDetector;
use crate::core::combine::{MatrixCombiner, classify_static};
use crate::core::comparator::FeatureComparator;
use crate::core::features::{FeatureVector, Modality};
use crate::core::matrix::{SimilarityMatrix, SimilarityMatrixBuilder};
use crate::core::report::{DetectionReport, GroupedReport, Outcome};
use crate::core::resolver::{Cluster, OriginalResolver};
use crate::core::video::VideoRecord;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DetectionStage {
    AudioMatrix,
    VisualMatrix,
    Combine,
    Cluster,
    Resolve,
    Complete,
}

impl DetectionStage {
    const PIPELINE: [DetectionStage; 6] = [
        DetectionStage::AudioMatrix,
        DetectionStage::VisualMatrix,
        DetectionStage::Combine,
        DetectionStage::Cluster,
        DetectionStage::Resolve,
        DetectionStage::Complete,
    ];

    fn position(self) -> usize {
        Self::PIPELINE
            .iter()
            .position(|s| *s == self)
            .map_or(0, |p| p + 1)
    }
}

impl fmt::Display for DetectionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DetectionStage::AudioMatrix => "audio matrix",
            DetectionStage::VisualMatrix => "visual matrix",
            DetectionStage::Combine => "combine",
            DetectionStage::Cluster => "cluster",
            DetectionStage::Resolve => "resolve",
            DetectionStage::Complete => "complete",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("Detection cancelled during {stage}")]
    Cancelled { stage: DetectionStage },

    #[error("Shape mismatch in {stage}: expected {expected} videos, got {actual}")]
    ShapeMismatch {
        stage: DetectionStage,
        expected: usize,
        actual: usize,
    },

    #[error("Video order differs between matrices in {stage} at index {index}")]
    IdentifierMismatch { stage: DetectionStage, index: usize },
}

impl DetectionError {
    pub fn stage(&self) -> DetectionStage {
        match self {
            DetectionError::Cancelled { stage }
            | DetectionError::ShapeMismatch { stage, .. }
            | DetectionError::IdentifierMismatch { stage, .. } => *stage,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionProgress {
    pub stage: DetectionStage,
    pub stages_completed: usize,
    pub total_stages: usize,
    /// Group key when running grouped batches.
    pub group: Option<String>,
    pub videos: usize,
}

/// Runs the full pipeline: matrices, combination, clustering, originals.
pub struct DetectionOrchestrator {
    config: DetectionConfig,
    comparator: FeatureComparator,
    progress_sender: Option<mpsc::UnboundedSender<DetectionProgress>>,
    cancellation_token: Arc<AtomicBool>,
}

impl DetectionOrchestrator {
    pub fn new(config: DetectionConfig) -> Self {
        let comparator = FeatureComparator::new(&config);
        Self {
            config,
            comparator,
            progress_sender: None,
            cancellation_token: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_progress_sender(
        mut self,
        sender: mpsc::UnboundedSender<DetectionProgress>,
    ) -> Self {
        self.progress_sender = Some(sender);
        self
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    pub fn cancellation_token(&self) -> Arc<AtomicBool> {
        self.cancellation_token.clone()
    }

    pub fn cancel(&self) {
        self.cancellation_token.store(true, Ordering::Relaxed);
    }

    pub fn run(
        &self,
        records: &[VideoRecord],
        audio_features: &HashMap<String, FeatureVector>,
        visual_features: &HashMap<String, FeatureVector>,
    ) -> Result<DetectionReport, DetectionError> {
        self.run_group(None, records, audio_features, visual_features)
    }

    /// Splits records by group key and runs each group independently.
    pub fn run_grouped(
        &self,
        records: &[VideoRecord],
        audio_features: &HashMap<String, FeatureVector>,
        visual_features: &HashMap<String, FeatureVector>,
    ) -> Result<GroupedReport, DetectionError> {
        let mut groups: BTreeMap<String, Vec<VideoRecord>> = BTreeMap::new();
        for record in records {
            groups
                .entry(record.group_key().to_string())
                .or_default()
                .push(record.clone());
        }
        log::info!("Running {} groups over {} videos", groups.len(), records.len());

        let reports = groups
            .into_par_iter()
            .map(|(key, group_records)| {
                let report =
                    self.run_group(Some(&key), &group_records, audio_features, visual_features)?;
                Ok((key, report))
            })
            .collect::<Result<BTreeMap<_, _>, DetectionError>>()?;

        Ok(GroupedReport::new(reports))
    }

    fn run_group(
        &self,
        group: Option<&str>,
        records: &[VideoRecord],
        audio_features: &HashMap<String, FeatureVector>,
        visual_features: &HashMap<String, FeatureVector>,
    ) -> Result<DetectionReport, DetectionError> {
        let start = Instant::now();
        let label = group.unwrap_or("batch");
        let thresholds = &self.config.thresholds;

        if records.is_empty() {
            self.send_progress(DetectionStage::Complete, group, 0);
            return Ok(DetectionReport::without_clusters(
                Vec::new(),
                thresholds,
                Outcome::EmptyBatch,
            ));
        }

        let builder = SimilarityMatrixBuilder::new(&self.comparator)
            .with_parallel(self.config.matrix.parallel)
            .with_cancellation_token(self.cancellation_token.clone());

        self.check_cancelled(DetectionStage::AudioMatrix)?;
        let audio = builder.build(Modality::Audio, records, audio_features)?;
        self.send_progress(DetectionStage::AudioMatrix, group, records.len());

        self.check_cancelled(DetectionStage::VisualMatrix)?;
        let visual = builder.build(Modality::Visual, records, visual_features)?;
        self.send_progress(DetectionStage::VisualMatrix, group, records.len());

        self.check_cancelled(DetectionStage::Combine)?;
        let static_flags = classify_static(
            records,
            visual_features,
            self.config.content.static_flow_threshold,
        );
        let combined = MatrixCombiner::new(&self.config).combine(
            &audio,
            &visual,
            records,
            &static_flags,
        )?;
        self.send_progress(DetectionStage::Combine, group, records.len());

        log_matrix(label, "audio", &audio, thresholds.audio);
        log_matrix(label, "visual", &visual, thresholds.video);
        let combined_stats = log_matrix(label, "combined", &combined, thresholds.combined);

        if records.len() >= 2 && combined_stats == 0 {
            log::warn!("{}: no comparable pairs in {} videos", label, records.len());
            self.send_progress(DetectionStage::Complete, group, records.len());
            return Ok(DetectionReport::new(
                records.to_vec(),
                Vec::new(),
                [audio, visual, combined],
                thresholds,
                Outcome::NoComparableFeatures,
            ));
        }

        let pair_threshold = |i: usize, j: usize| {
            if records[i].content_type.is_audio() && records[j].content_type.is_audio() {
                thresholds.audio
            } else {
                thresholds.combined
            }
        };

        self.check_cancelled(DetectionStage::Cluster)?;
        let candidates = ClusterDetector::detect_with(&combined, pair_threshold);
        self.send_progress(DetectionStage::Cluster, group, records.len());

        self.check_cancelled(DetectionStage::Resolve)?;
        let mut clusters: Vec<Cluster> = candidates
            .iter()
            .filter_map(|candidate| {
                OriginalResolver::resolve_with(candidate, records, &combined, pair_threshold)
            })
            .collect();
        clusters.sort_by(|a, b| {
            b.reupload_count()
                .cmp(&a.reupload_count())
                .then(a.original.cmp(&b.original))
        });
        self.send_progress(DetectionStage::Resolve, group, records.len());

        let outcome = if clusters.is_empty() {
            Outcome::NoDuplicates
        } else {
            Outcome::Clustered
        };

        log::info!(
            "{}: {} clusters over {} videos in {:.2?}",
            label,
            clusters.len(),
            records.len(),
            start.elapsed()
        );
        self.send_progress(DetectionStage::Complete, group, records.len());

        Ok(DetectionReport::new(
            records.to_vec(),
            clusters,
            [audio, visual, combined],
            thresholds,
            outcome,
        ))
    }

    fn check_cancelled(&self, stage: DetectionStage) -> Result<(), DetectionError> {
        if self.cancellation_token.load(Ordering::Relaxed) {
            return Err(DetectionError::Cancelled { stage });
        }
        Ok(())
    }

    fn send_progress(&self, stage: DetectionStage, group: Option<&str>, videos: usize) {
        if let Some(sender) = &self.progress_sender {
            let _ = sender.send(DetectionProgress {
                stage,
                stages_completed: stage.position(),
                total_stages: DetectionStage::PIPELINE.len(),
                group: group.map(str::to_string),
                videos,
            });
        }
    }
}

/// Logs matrix statistics and returns the number of defined pairs.
fn log_matrix(label: &str, name: &str, matrix: &SimilarityMatrix, threshold: f64) -> usize {
    let stats = matrix.stats(threshold);
    match (stats.min, stats.max, stats.mean) {
        (Some(min), Some(max), Some(mean)) => log::info!(
            "{} {} matrix: {} defined / {} undefined pairs, \
             min={:.3} max={:.3} mean={:.3}, {} pairs >= {:.2}",
            label,
            name,
            stats.defined_pairs,
            stats.undefined_pairs,
            min,
            max,
            mean,
            stats.pairs_at_threshold,
            threshold
        ),
        _ => log::info!(
            "{} {} matrix: no defined pairs ({} undefined)",
            label,
            name,
            stats.undefined_pairs
        ),
    }
    stats.defined_pairs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::features::{AudioFeatures, Segment, VisualFeatures};
    use crate::core::resolver::Link;
    use crate::core::video::ContentType;
    use chrono::NaiveDate;

    fn unit_at(cos: f64) -> Vec<f64> {
        vec![cos, (1.0 - cos * cos).sqrt()]
    }

    fn audio(v: Vec<f64>) -> FeatureVector {
        FeatureVector::Audio(AudioFeatures {
            mfcc: Segment::from(v.clone()),
            chroma: Segment::from(v.clone()),
            spectral_contrast: Segment::from(v),
            tempo: 120.0,
            remix: None,
        })
    }

    fn visual(v: Vec<f64>) -> FeatureVector {
        FeatureVector::Visual(VisualFeatures {
            embedding: Segment::from(v),
            enhanced: None,
            optical_flow: Some(20.0),
        })
    }

    fn record(id: &str, date: &str, content_type: ContentType) -> VideoRecord {
        VideoRecord::new(id, NaiveDate::parse_from_str(date, "%Y-%m-%d").ok(), content_type)
    }

    /// A and B share near-identical audio and visuals; C is unrelated.
    fn scenario() -> (
        Vec<VideoRecord>,
        HashMap<String, FeatureVector>,
        HashMap<String, FeatureVector>,
    ) {
        let records = vec![
            record("a", "2023-01-01", ContentType::Video),
            record("b", "2022-06-01", ContentType::Video),
            record("c", "2021-01-01", ContentType::Video),
        ];
        let audio_features = HashMap::from([
            ("a".to_string(), audio(vec![1.0, 0.0])),
            ("b".to_string(), audio(vec![1.0, 0.0])),
            ("c".to_string(), audio(vec![0.0, 1.0])),
        ]);
        let visual_features = HashMap::from([
            ("a".to_string(), visual(vec![1.0, 0.0])),
            ("b".to_string(), visual(unit_at(0.9))),
            ("c".to_string(), visual(vec![0.0, 1.0])),
        ]);
        (records, audio_features, visual_features)
    }

    fn config() -> DetectionConfig {
        DetectionConfig::default().with_combined_threshold(0.70)
    }

    #[test]
    fn test_end_to_end_cluster() {
        let (records, audio, visual) = scenario();
        let report = DetectionOrchestrator::new(config())
            .run(&records, &audio, &visual)
            .unwrap();

        assert_eq!(report.outcome, Outcome::Clustered);
        assert_eq!(report.clusters.len(), 1);
        let cluster = &report.clusters[0];
        assert_eq!(cluster.members, vec![0, 1]);
        assert_eq!(cluster.original_id, "b");
        assert_eq!(cluster.reuploads[0].video_id, "a");
        assert_eq!(cluster.reuploads[0].link, Link::Direct);
        assert!((cluster.reuploads[0].similarity.unwrap() - 0.95).abs() < 1e-9);
        assert_eq!(report.statistics.reuploads, 1);
    }

    #[test]
    fn test_near_duplicate_pair_clusters_and_outlier_stays_out() {
        // 0.9 * cos + 0.1 * tempo = 0.95 with matching tempo
        let audio_cos = 0.85 / 0.9;
        let records = vec![
            record("A", "2021-03-01", ContentType::Video),
            record("B", "2022-08-15", ContentType::Video),
            record("C", "2020-01-01", ContentType::Video),
        ];
        let audio_features = HashMap::from([
            ("A".to_string(), audio(vec![1.0, 0.0])),
            ("B".to_string(), audio(unit_at(audio_cos))),
            ("C".to_string(), audio(vec![0.0, 1.0])),
        ]);
        let visual_features = HashMap::from([
            ("A".to_string(), visual(vec![1.0, 0.0])),
            ("B".to_string(), visual(unit_at(0.9))),
            ("C".to_string(), visual(vec![0.0, 1.0])),
        ]);
        let mut config = config();
        config.audio.remix.enabled = false;

        let report = DetectionOrchestrator::new(config)
            .run(&records, &audio_features, &visual_features)
            .unwrap();

        assert!((report.audio_matrix.get(0, 1).unwrap() - 0.95).abs() < 1e-9);
        assert!((report.visual_matrix.get(0, 1).unwrap() - 0.90).abs() < 1e-9);
        assert!((report.combined_matrix.get(0, 1).unwrap() - 0.925).abs() < 1e-9);
        assert!(report.combined_matrix.get(1, 2).unwrap() < 0.70);

        assert_eq!(report.outcome, Outcome::Clustered);
        assert_eq!(report.clusters.len(), 1);
        let cluster = &report.clusters[0];
        assert_eq!(cluster.members, vec![0, 1]);
        assert_eq!(cluster.original_id, "A");
        assert_eq!(cluster.reuploads.len(), 1);
        assert_eq!(cluster.reuploads[0].video_id, "B");
        assert!(report.cluster_of("C").is_none());
        assert!(!report.reupload_ids().contains("C"));
    }

    #[test]
    fn test_identical_vectors_cluster_at_threshold_one() {
        let records = vec![
            record("x", "2020-01-01", ContentType::Video),
            record("y", "2020-01-02", ContentType::Video),
        ];
        let audio = HashMap::from([
            ("x".to_string(), audio(vec![0.3, 0.7])),
            ("y".to_string(), audio(vec![0.3, 0.7])),
        ]);
        let visual = HashMap::from([
            ("x".to_string(), visual(vec![2.0, 1.0])),
            ("y".to_string(), visual(vec![2.0, 1.0])),
        ]);
        let config = DetectionConfig::default().with_combined_threshold(1.0);
        let report = DetectionOrchestrator::new(config)
            .run(&records, &audio, &visual)
            .unwrap();
        assert_eq!(report.combined_matrix.get(0, 1), Some(1.0));
        assert_eq!(report.clusters.len(), 1);
    }

    #[test]
    fn test_audio_type_ignores_visual() {
        let records = vec![
            record("a", "2020-01-01", ContentType::Audio),
            record("b", "2020-02-01", ContentType::Audio),
        ];
        let audio = HashMap::from([
            ("a".to_string(), audio(vec![1.0, 0.0])),
            ("b".to_string(), audio(vec![0.0, 1.0])),
        ]);
        let visual = HashMap::from([
            ("a".to_string(), visual(vec![1.0, 0.0])),
            ("b".to_string(), visual(vec![1.0, 0.0])),
        ]);
        let report = DetectionOrchestrator::new(config()).run(&records, &audio, &visual).unwrap();
        // tempo alone contributes
        assert!((report.combined_matrix.get(0, 1).unwrap() - 0.1).abs() < 1e-9);
        assert_eq!(report.outcome, Outcome::NoDuplicates);
    }

    #[test]
    fn test_empty_and_single_batches() {
        let orchestrator = DetectionOrchestrator::new(config());
        let empty = orchestrator.run(&[], &HashMap::new(), &HashMap::new()).unwrap();
        assert_eq!(empty.outcome, Outcome::EmptyBatch);
        assert!(empty.clusters.is_empty());

        let single = vec![record("a", "2020-01-01", ContentType::Video)];
        let report = orchestrator.run(&single, &HashMap::new(), &HashMap::new()).unwrap();
        assert_eq!(report.outcome, Outcome::NoDuplicates);
        assert_eq!(report.combined_matrix.get(0, 0), Some(1.0));
    }

    #[test]
    fn test_no_features_reports_outcome() {
        let (records, _, _) = scenario();
        let report = DetectionOrchestrator::new(config().with_combined_threshold(0.0))
            .run(&records, &HashMap::new(), &HashMap::new())
            .unwrap();
        assert_eq!(report.outcome, Outcome::NoComparableFeatures);
        assert!(report.clusters.is_empty());
    }

    #[test]
    fn test_partition_stable_under_permutation() {
        let (records, audio, visual) = scenario();
        let orchestrator = DetectionOrchestrator::new(config());
        let forward = orchestrator.run(&records, &audio, &visual).unwrap();

        let reversed: Vec<VideoRecord> = records.iter().rev().cloned().collect();
        let backward = orchestrator.run(&reversed, &audio, &visual).unwrap();

        let originals = |r: &DetectionReport| -> Vec<String> {
            r.clusters.iter().map(|c| c.original_id.clone()).collect()
        };
        assert_eq!(originals(&forward), originals(&backward));
        assert_eq!(forward.reupload_ids(), backward.reupload_ids());
    }

    #[test]
    fn test_grouped_run_separates_groups() {
        let (mut records, audio, visual) = scenario();
        records[0] = records[0].clone().with_group("K-1");
        records[1] = records[1].clone().with_group("K-2");

        let grouped = DetectionOrchestrator::new(config())
            .run_grouped(&records, &audio, &visual)
            .unwrap();

        assert_eq!(grouped.statistics.groups, 3);
        assert_eq!(grouped.statistics.reuploads, 0);
        assert!(grouped.groups.contains_key("UNKNOWN"));
        assert_eq!(grouped.groups["K-1"].outcome, Outcome::NoDuplicates);
    }

    #[test]
    fn test_cancellation_is_reported_with_stage() {
        let (records, audio, visual) = scenario();
        let orchestrator = DetectionOrchestrator::new(config());
        orchestrator.cancel();
        let err = orchestrator.run(&records, &audio, &visual).unwrap_err();
        assert_eq!(err.stage(), DetectionStage::AudioMatrix);
        assert!(matches!(err, DetectionError::Cancelled { .. }));
    }

    #[test]
    fn test_progress_events_cover_every_stage() {
        let (records, audio, visual) = scenario();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let orchestrator = DetectionOrchestrator::new(config()).with_progress_sender(tx);
        orchestrator.run(&records, &audio, &visual).unwrap();
        drop(orchestrator);

        let mut stages = Vec::new();
        while let Ok(progress) = rx.try_recv() {
            stages.push(progress.stage);
        }
        assert_eq!(stages, DetectionStage::PIPELINE.to_vec());
    }
}
