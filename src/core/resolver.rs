use crate::core::cluster::ClusterCandidate;
use crate::core::matrix::SimilarityMatrix;
use crate::core::video::{ContentType, VideoRecord, compare_upload_dates};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// How a reupload is connected to its cluster's original.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Link {
    /// The pair itself clears the threshold.
    Direct,
    /// Reached only through other members of the cluster.
    Transitive,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reupload {
    pub index: usize,
    pub video_id: String,
    pub upload_date: Option<NaiveDate>,
    pub content_type: ContentType,
    /// Combined similarity to the original, `None` when the pair is undefined.
    pub similarity: Option<f64>,
    pub link: Link,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub original: usize,
    pub original_id: String,
    pub original_upload_date: Option<NaiveDate>,
    pub content_type: ContentType,
    /// All member indices, original included, ascending.
    pub members: Vec<usize>,
    pub reuploads: Vec<Reupload>,
}

impl Cluster {
    pub fn size(&self) -> usize {
        self.members.len()
    }

    pub fn reupload_count(&self) -> usize {
        self.reuploads.len()
    }

    /// Mean of the defined reupload similarities.
    pub fn average_similarity(&self) -> Option<f64> {
        let scores: Vec<f64> = self.reuploads.iter().filter_map(|r| r.similarity).collect();
        if scores.is_empty() {
            None
        } else {
            Some(scores.iter().sum::<f64>() / scores.len() as f64)
        }
    }
}

/// Chooses the earliest upload of each cluster as its original.
pub struct OriginalResolver;

impl OriginalResolver {
    pub fn resolve(
        candidate: &ClusterCandidate,
        records: &[VideoRecord],
        combined: &SimilarityMatrix,
        threshold: f64,
    ) -> Option<Cluster> {
        Self::resolve_with(candidate, records, combined, |_, _| threshold)
    }

    /// Returns `None` for candidates with fewer than two members.
    ///
    /// Missing upload dates sort after known ones; remaining ties go to the
    /// lower input index.
    pub fn resolve_with<F>(
        candidate: &ClusterCandidate,
        records: &[VideoRecord],
        combined: &SimilarityMatrix,
        threshold: F,
    ) -> Option<Cluster>
    where
        F: Fn(usize, usize) -> f64,
    {
        if candidate.len() < 2 {
            return None;
        }

        let original = candidate.members.iter().copied().min_by(|&a, &b| {
            compare_upload_dates(records[a].upload_date, records[b].upload_date)
                .then(a.cmp(&b))
        })?;
        let original_record = &records[original];

        let reuploads = candidate
            .members
            .iter()
            .copied()
            .filter(|&index| index != original)
            .map(|index| {
                let record = &records[index];
                let similarity = combined.get(original, index);
                let link = match similarity {
                    Some(score) if score >= threshold(original, index) => Link::Direct,
                    _ => Link::Transitive,
                };
                Reupload {
                    index,
                    video_id: record.id.clone(),
                    upload_date: record.upload_date,
                    content_type: record.content_type,
                    similarity,
                    link,
                }
            })
            .collect();

        Some(Cluster {
            original,
            original_id: original_record.id.clone(),
            original_upload_date: original_record.upload_date,
            content_type: original_record.content_type,
            members: candidate.members.clone(),
            reuploads,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
    }

    fn records(dates: &[Option<NaiveDate>]) -> Vec<VideoRecord> {
        dates
            .iter()
            .enumerate()
            .map(|(i, d)| VideoRecord::new(format!("v{i}"), *d, ContentType::Video))
            .collect()
    }

    fn chain_matrix(n: usize) -> SimilarityMatrix {
        let ids = (0..n).map(|i| format!("v{i}")).collect();
        SimilarityMatrix::from_fn(ids, |i, j| if j == i + 1 { Some(0.9) } else { Some(0.4) })
    }

    #[test]
    fn test_earliest_upload_is_original() {
        let records = records(&[date("2024-03-01"), date("2023-01-15"), date("2024-01-01")]);
        let candidate = ClusterCandidate {
            members: vec![0, 1, 2],
        };
        let cluster =
            OriginalResolver::resolve(&candidate, &records, &chain_matrix(3), 0.8).unwrap();

        assert_eq!(cluster.original, 1);
        assert_eq!(cluster.original_id, "v1");
        let ids: Vec<&str> = cluster.reuploads.iter().map(|r| r.video_id.as_str()).collect();
        assert_eq!(ids, vec!["v0", "v2"]);
    }

    #[test]
    fn test_ties_and_missing_dates_fall_back_to_input_order() {
        let same_day = records(&[date("2024-01-01"), date("2024-01-01")]);
        let candidate = ClusterCandidate { members: vec![0, 1] };
        let cluster =
            OriginalResolver::resolve(&candidate, &same_day, &chain_matrix(2), 0.8).unwrap();
        assert_eq!(cluster.original, 0);

        let missing_first = records(&[None, date("2024-05-01")]);
        let cluster =
            OriginalResolver::resolve(&candidate, &missing_first, &chain_matrix(2), 0.8).unwrap();
        assert_eq!(cluster.original, 1);

        let all_missing = records(&[None, None]);
        let cluster =
            OriginalResolver::resolve(&candidate, &all_missing, &chain_matrix(2), 0.8).unwrap();
        assert_eq!(cluster.original, 0);
    }

    #[test]
    fn test_transitive_members_keep_direct_score() {
        let records = records(&[date("2020-01-01"), date("2021-01-01"), date("2022-01-01")]);
        let candidate = ClusterCandidate {
            members: vec![0, 1, 2],
        };
        let cluster =
            OriginalResolver::resolve(&candidate, &records, &chain_matrix(3), 0.8).unwrap();

        assert_eq!(cluster.reuploads[0].link, Link::Direct);
        assert_eq!(cluster.reuploads[0].similarity, Some(0.9));
        assert_eq!(cluster.reuploads[1].link, Link::Transitive);
        assert_eq!(cluster.reuploads[1].similarity, Some(0.4));
        assert!((cluster.average_similarity().unwrap() - 0.65).abs() < 1e-9);
    }

    #[test]
    fn test_singleton_candidate_is_rejected() {
        let records = records(&[None]);
        let candidate = ClusterCandidate { members: vec![0] };
        assert!(OriginalResolver::resolve(&candidate, &records, &chain_matrix(1), 0.8).is_none());
    }
}
