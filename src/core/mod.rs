pub mod cluster;
pub mod combine;
pub mod comparator;
pub mod features;
pub mod matrix;
pub mod orchestrator;
pub mod report;
pub mod resolver;
pub mod video;

pub use cluster::{ClusterCandidate, ClusterDetector};
pub use combine::MatrixCombiner;
pub use comparator::FeatureComparator;
pub use features::{AudioFeatures, FeatureVector, Modality, Segment, VisualFeatures};
pub use matrix::{SimilarityMatrix, SimilarityMatrixBuilder};
pub use orchestrator::{DetectionError, DetectionOrchestrator, DetectionProgress, DetectionStage};
pub use report::{DetectionReport, GroupedReport, Outcome};
pub use resolver::{Cluster, Link, OriginalResolver, Reupload};
pub use video::{ContentType, VideoRecord};
