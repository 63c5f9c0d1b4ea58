use crate::config::Thresholds;
use crate::core::matrix::{MatrixStats, SimilarityMatrix};
use crate::core::resolver::Cluster;
use crate::core::video::{ContentType, VideoRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Why a report ended up with or without clusters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Clustered,
    NoDuplicates,
    NoComparableFeatures,
    EmptyBatch,
}

impl Outcome {
    pub fn describe(self) -> &'static str {
        match self {
            Outcome::Clustered => "reuploads found",
            Outcome::NoDuplicates => "no pair reached the threshold",
            Outcome::NoComparableFeatures => "no pair had comparable features",
            Outcome::EmptyBatch => "batch contained no videos",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportStatistics {
    pub total_videos: usize,
    pub originals: usize,
    pub reuploads: usize,
    pub reupload_percentage: f64,
    pub reuploads_by_type: BTreeMap<ContentType, usize>,
    /// Mean of every defined reupload-to-original score.
    pub average_similarity: Option<f64>,
    pub audio_matrix: MatrixStats,
    pub visual_matrix: MatrixStats,
    pub combined_matrix: MatrixStats,
}

impl ReportStatistics {
    /// Each matrix is summarized against its own threshold: audio, video, then combined.
    pub fn compute(
        total_videos: usize,
        clusters: &[Cluster],
        matrices: [&SimilarityMatrix; 3],
        thresholds: &Thresholds,
    ) -> Self {
        let [audio, visual, combined] = matrices;
        let reuploads: usize = clusters.iter().map(Cluster::reupload_count).sum();

        let mut reuploads_by_type = BTreeMap::new();
        for reupload in clusters.iter().flat_map(|c| &c.reuploads) {
            *reuploads_by_type.entry(reupload.content_type).or_insert(0) += 1;
        }

        let scores: Vec<f64> = clusters
            .iter()
            .flat_map(|c| c.reuploads.iter().filter_map(|r| r.similarity))
            .collect();
        let average_similarity = if scores.is_empty() {
            None
        } else {
            Some(scores.iter().sum::<f64>() / scores.len() as f64)
        };

        Self {
            total_videos,
            originals: clusters.len(),
            reuploads,
            reupload_percentage: percentage(reuploads, total_videos),
            reuploads_by_type,
            average_similarity,
            audio_matrix: audio.stats(thresholds.audio),
            visual_matrix: visual.stats(thresholds.video),
            combined_matrix: combined.stats(thresholds.combined),
        }
    }
}

/// Result of one detection run over a batch (or one group of a batch).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionReport {
    pub generated_at: DateTime<Utc>,
    pub threshold: f64,
    pub outcome: Outcome,
    pub clusters: Vec<Cluster>,
    pub statistics: ReportStatistics,
    pub records: Vec<VideoRecord>,
    pub audio_matrix: SimilarityMatrix,
    pub visual_matrix: SimilarityMatrix,
    pub combined_matrix: SimilarityMatrix,
}

impl DetectionReport {
    pub fn new(
        records: Vec<VideoRecord>,
        clusters: Vec<Cluster>,
        matrices: [SimilarityMatrix; 3],
        thresholds: &Thresholds,
        outcome: Outcome,
    ) -> Self {
        let statistics = ReportStatistics::compute(
            records.len(),
            &clusters,
            [&matrices[0], &matrices[1], &matrices[2]],
            thresholds,
        );
        let [audio_matrix, visual_matrix, combined_matrix] = matrices;
        Self {
            generated_at: Utc::now(),
            threshold: thresholds.combined,
            outcome,
            clusters,
            statistics,
            records,
            audio_matrix,
            visual_matrix,
            combined_matrix,
        }
    }

    /// Report with no clusters and matrices sized to `records`.
    pub fn without_clusters(
        records: Vec<VideoRecord>,
        thresholds: &Thresholds,
        outcome: Outcome,
    ) -> Self {
        let ids: Vec<String> = records.iter().map(|r| r.id.clone()).collect();
        let empty = || SimilarityMatrix::from_fn(ids.clone(), |_, _| None);
        Self::new(records, Vec::new(), [empty(), empty(), empty()], thresholds, outcome)
    }

    pub fn reupload_ids(&self) -> HashSet<&str> {
        self.clusters
            .iter()
            .flat_map(|c| c.reuploads.iter().map(|r| r.video_id.as_str()))
            .collect()
    }

    pub fn cluster_of(&self, video_id: &str) -> Option<&Cluster> {
        self.clusters.iter().find(|c| {
            c.original_id == video_id || c.reuploads.iter().any(|r| r.video_id == video_id)
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupedStatistics {
    pub groups: usize,
    pub total_videos: usize,
    pub originals: usize,
    pub reuploads: usize,
    pub reupload_percentage: f64,
}

/// One report per group key, plus totals across groups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupedReport {
    pub generated_at: DateTime<Utc>,
    pub groups: BTreeMap<String, DetectionReport>,
    pub statistics: GroupedStatistics,
}

impl GroupedReport {
    pub fn new(groups: BTreeMap<String, DetectionReport>) -> Self {
        let mut statistics = GroupedStatistics {
            groups: groups.len(),
            ..GroupedStatistics::default()
        };
        for report in groups.values() {
            statistics.total_videos += report.statistics.total_videos;
            statistics.originals += report.statistics.originals;
            statistics.reuploads += report.statistics.reuploads;
        }
        statistics.reupload_percentage = percentage(statistics.reuploads, statistics.total_videos);

        Self {
            generated_at: Utc::now(),
            groups,
            statistics,
        }
    }
}

fn percentage(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}
