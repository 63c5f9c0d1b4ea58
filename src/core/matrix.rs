use crate::core::comparator::FeatureComparator;
use crate::core::features::{FeatureVector, Modality};
use crate::core::orchestrator::{DetectionError, DetectionStage};
use crate::core::video::VideoRecord;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Square, symmetric similarity matrix indexed like the input record list.
///
/// `None` entries are undefined pairs. The diagonal is always `Some(1.0)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "MatrixRows", try_from = "MatrixRows")]
pub struct SimilarityMatrix {
    ids: Vec<String>,
    values: Vec<Option<f64>>,
}

/// Row-major JSON shape: `{"ids": [...], "rows": [[1.0, null, ...], ...]}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct MatrixRows {
    ids: Vec<String>,
    rows: Vec<Vec<Option<f64>>>,
}

impl From<SimilarityMatrix> for MatrixRows {
    fn from(matrix: SimilarityMatrix) -> Self {
        let n = matrix.size();
        let rows = if n == 0 {
            Vec::new()
        } else {
            matrix.values.chunks(n).map(<[Option<f64>]>::to_vec).collect()
        };
        MatrixRows {
            ids: matrix.ids,
            rows,
        }
    }
}

impl TryFrom<MatrixRows> for SimilarityMatrix {
    type Error = String;

    fn try_from(repr: MatrixRows) -> Result<Self, Self::Error> {
        let n = repr.ids.len();
        if repr.rows.len() != n || repr.rows.iter().any(|row| row.len() != n) {
            return Err(format!("matrix rows do not form a {n}x{n} square"));
        }
        let values: Vec<Option<f64>> = repr.rows.into_iter().flatten().collect();
        for i in 0..n {
            for j in (i + 1)..n {
                if values[i * n + j] != values[j * n + i] {
                    return Err(format!("matrix is not symmetric at ({i}, {j})"));
                }
            }
        }
        Ok(SimilarityMatrix {
            ids: repr.ids,
            values,
        })
    }
}

impl SimilarityMatrix {
    /// Builds a matrix by evaluating `score` once per unordered pair `i < j`.
    pub fn from_fn<F>(ids: Vec<String>, mut score: F) -> Self
    where
        F: FnMut(usize, usize) -> Option<f64>,
    {
        let n = ids.len();
        let mut upper = Vec::with_capacity(n);
        for i in 0..n {
            let mut row = Vec::with_capacity(n - i - 1);
            for j in (i + 1)..n {
                row.push(score(i, j));
            }
            upper.push(row);
        }
        Self::from_upper_rows(ids, upper)
    }

    /// `upper[i]` holds the entries `(i, i+1..n)`.
    pub(crate) fn from_upper_rows(ids: Vec<String>, upper: Vec<Vec<Option<f64>>>) -> Self {
        let n = ids.len();
        let mut values = vec![None; n * n];
        for i in 0..n {
            values[i * n + i] = Some(1.0);
        }
        for (i, row) in upper.into_iter().enumerate() {
            for (offset, value) in row.into_iter().enumerate() {
                let j = i + 1 + offset;
                values[i * n + j] = value;
                values[j * n + i] = value;
            }
        }
        Self { ids, values }
    }

    pub fn size(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn get(&self, i: usize, j: usize) -> Option<f64> {
        let n = self.size();
        if i >= n || j >= n {
            return None;
        }
        self.values[i * n + j]
    }

    pub fn row(&self, i: usize) -> &[Option<f64>] {
        let n = self.size();
        &self.values[i * n..(i + 1) * n]
    }

    /// Pairwise statistics over the upper triangle.
    pub fn stats(&self, threshold: f64) -> MatrixStats {
        let n = self.size();
        let mut stats = MatrixStats {
            videos: n,
            threshold,
            ..MatrixStats::default()
        };
        let mut sum = 0.0;

        for i in 0..n {
            for j in (i + 1)..n {
                match self.get(i, j) {
                    Some(value) => {
                        stats.defined_pairs += 1;
                        sum += value;
                        stats.min = Some(stats.min.map_or(value, |m| m.min(value)));
                        stats.max = Some(stats.max.map_or(value, |m| m.max(value)));
                        if value >= threshold {
                            stats.pairs_at_threshold += 1;
                        }
                    }
                    None => stats.undefined_pairs += 1,
                }
            }
        }

        if stats.defined_pairs > 0 {
            stats.mean = Some(sum / stats.defined_pairs as f64);
        }
        stats
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatrixStats {
    pub videos: usize,
    pub defined_pairs: usize,
    pub undefined_pairs: usize,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
    pub threshold: f64,
    pub pairs_at_threshold: usize,
}

/// Builds one modality's matrix from a feature map keyed by video id.
pub struct SimilarityMatrixBuilder<'a> {
    comparator: &'a FeatureComparator,
    parallel: bool,
    cancellation_token: Arc<AtomicBool>,
}

impl<'a> SimilarityMatrixBuilder<'a> {
    pub fn new(comparator: &'a FeatureComparator) -> Self {
        Self {
            comparator,
            parallel: true,
            cancellation_token: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_cancellation_token(mut self, token: Arc<AtomicBool>) -> Self {
        self.cancellation_token = token;
        self
    }

    pub fn build(
        &self,
        modality: Modality,
        records: &[VideoRecord],
        features: &HashMap<String, FeatureVector>,
    ) -> Result<SimilarityMatrix, DetectionError> {
        let stage = match modality {
            Modality::Audio => DetectionStage::AudioMatrix,
            Modality::Visual => DetectionStage::VisualMatrix,
        };
        let n = records.len();

        let vectors: Vec<Option<&FeatureVector>> = records
            .iter()
            .map(|record| match features.get(&record.id) {
                Some(vector) if vector.modality() == modality => Some(vector),
                Some(vector) => {
                    log::warn!(
                        "Ignoring {:?} features for {} in the {:?} matrix",
                        vector.modality(),
                        record.id,
                        modality
                    );
                    None
                }
                None => None,
            })
            .collect();

        let missing = vectors.iter().filter(|v| v.is_none()).count();
        if missing > 0 {
            log::info!(
                "{:?} matrix: {} of {} videos have no usable features",
                modality,
                missing,
                n
            );
        }

        let compute_row = |i: usize| -> Result<Vec<Option<f64>>, DetectionError> {
            if self.cancellation_token.load(Ordering::Relaxed) {
                return Err(DetectionError::Cancelled { stage });
            }
            let Some(a) = vectors[i] else {
                return Ok(vec![None; n - i - 1]);
            };
            Ok(((i + 1)..n)
                .map(|j| vectors[j].and_then(|b| self.comparator.compare(a, b)))
                .collect())
        };

        let upper: Vec<Vec<Option<f64>>> = if self.parallel {
            (0..n).into_par_iter().map(compute_row).collect::<Result<_, _>>()?
        } else {
            (0..n).map(compute_row).collect::<Result<_, _>>()?
        };

        let ids = records.iter().map(|r| r.id.clone()).collect();
        let matrix = SimilarityMatrix::from_upper_rows(ids, upper);
        log::debug!("{:?} matrix built for {} videos", modality, n);
        Ok(matrix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DetectionConfig;
    use crate::core::features::{AudioFeatures, Segment, VisualFeatures};
    use crate::core::video::ContentType;

    fn record(id: &str) -> VideoRecord {
        VideoRecord::new(id, None, ContentType::Video)
    }

    fn visual(embedding: Vec<f64>) -> FeatureVector {
        FeatureVector::Visual(VisualFeatures {
            embedding: Segment::from(embedding),
            enhanced: None,
            optical_flow: None,
        })
    }

    fn features() -> HashMap<String, FeatureVector> {
        let mut map = HashMap::new();
        map.insert("a".to_string(), visual(vec![1.0, 0.0, 0.0]));
        map.insert("b".to_string(), visual(vec![0.8, 0.6, 0.0]));
        map.insert("c".to_string(), visual(vec![0.0, 0.0, 1.0]));
        map
    }

    #[test]
    fn test_matrix_is_symmetric_with_unit_diagonal() {
        let comparator = FeatureComparator::new(&DetectionConfig::default());
        let records = vec![record("a"), record("b"), record("c")];
        let matrix = SimilarityMatrixBuilder::new(&comparator)
            .build(Modality::Visual, &records, &features())
            .unwrap();

        assert_eq!(matrix.size(), 3);
        assert_eq!(matrix.ids(), &["a", "b", "c"]);
        for i in 0..3 {
            assert_eq!(matrix.get(i, i), Some(1.0));
            for j in 0..3 {
                assert_eq!(matrix.get(i, j), matrix.get(j, i));
            }
        }
        assert!((matrix.get(0, 1).unwrap() - 0.8).abs() < 1e-9);
        assert_eq!(matrix.get(0, 2), Some(0.0));
    }

    #[test]
    fn test_missing_features_leave_row_undefined() {
        let comparator = FeatureComparator::new(&DetectionConfig::default());
        let records = vec![record("a"), record("ghost"), record("b")];
        let matrix = SimilarityMatrixBuilder::new(&comparator)
            .build(Modality::Visual, &records, &features())
            .unwrap();

        assert_eq!(matrix.get(1, 1), Some(1.0));
        assert_eq!(matrix.get(0, 1), None);
        assert_eq!(matrix.get(1, 2), None);
        assert!(matrix.get(0, 2).is_some());
    }

    #[test]
    fn test_wrong_modality_is_ignored() {
        let comparator = FeatureComparator::new(&DetectionConfig::default());
        let mut map = features();
        map.insert(
            "x".to_string(),
            FeatureVector::Audio(AudioFeatures {
                mfcc: Segment::from(vec![1.0]),
                chroma: Segment::from(vec![1.0]),
                spectral_contrast: Segment::from(vec![1.0]),
                tempo: 120.0,
                remix: None,
            }),
        );
        let records = vec![record("a"), record("x")];
        let matrix = SimilarityMatrixBuilder::new(&comparator)
            .build(Modality::Visual, &records, &map)
            .unwrap();
        assert_eq!(matrix.get(0, 1), None);
    }

    #[test]
    fn test_parallel_and_sequential_agree() {
        let comparator = FeatureComparator::new(&DetectionConfig::default());
        let records = vec![record("a"), record("b"), record("c"), record("ghost")];
        let parallel = SimilarityMatrixBuilder::new(&comparator)
            .build(Modality::Visual, &records, &features())
            .unwrap();
        let sequential = SimilarityMatrixBuilder::new(&comparator)
            .with_parallel(false)
            .build(Modality::Visual, &records, &features())
            .unwrap();
        assert_eq!(parallel, sequential);
    }

    #[test]
    fn test_cancelled_build() {
        let comparator = FeatureComparator::new(&DetectionConfig::default());
        let token = Arc::new(AtomicBool::new(true));
        let result = SimilarityMatrixBuilder::new(&comparator)
            .with_cancellation_token(token)
            .build(Modality::Visual, &[record("a"), record("b")], &features());
        assert!(matches!(
            result,
            Err(DetectionError::Cancelled {
                stage: DetectionStage::VisualMatrix
            })
        ));
    }

    #[test]
    fn test_stats_count_defined_and_threshold_pairs() {
        let ids = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let matrix = SimilarityMatrix::from_fn(ids, |i, j| match (i, j) {
            (0, 1) => Some(0.9),
            (0, 2) => Some(0.3),
            _ => None,
        });
        let stats = matrix.stats(0.75);
        assert_eq!(stats.defined_pairs, 2);
        assert_eq!(stats.undefined_pairs, 1);
        assert_eq!(stats.pairs_at_threshold, 1);
        assert_eq!(stats.max, Some(0.9));
        assert_eq!(stats.min, Some(0.3));
        assert!((stats.mean.unwrap() - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_json_shape_round_trips() {
        let ids = vec!["a".to_string(), "b".to_string()];
        let matrix = SimilarityMatrix::from_fn(ids, |_, _| None);
        let json = serde_json::to_value(&matrix).unwrap();
        assert_eq!(json["rows"][0][1], serde_json::Value::Null);
        assert_eq!(json["rows"][1][1], 1.0);

        let back: SimilarityMatrix = serde_json::from_value(json).unwrap();
        assert_eq!(back, matrix);

        let ragged = serde_json::json!({"ids": ["a", "b"], "rows": [[1.0]]});
        assert!(serde_json::from_value::<SimilarityMatrix>(ragged).is_err());
    }
}
