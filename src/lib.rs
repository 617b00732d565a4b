//! Frequency, co-occurrence and bias analysis over corpora of per-site web
//! fingerprints, producing platform signatures and confidence-scored rule
//! recommendations for CMS detection.
//!
//! ```no_run
//! use patternscope::{AnalysisOptions, Pipeline, PreprocessedCorpus};
//!
//! # fn main() -> patternscope::Result<()> {
//! let corpus = PreprocessedCorpus::from_path(std::path::Path::new("corpus.json"))?;
//! let output = Pipeline::new(AnalysisOptions::default())?.run(&corpus);
//! println!("{} recommendations", output.recommendations.len());
//! # Ok(())
//! # }
//! ```

pub mod bias_detector;
pub mod cooccurrence;
pub mod corpus;
pub mod error;
pub mod header_analyzer;
pub mod meta_analyzer;
pub mod normalize;
pub mod options;
pub mod patterns;
pub mod pipeline;
pub mod platform_signature;
pub mod recommendations;
pub mod script_analyzer;
pub mod semantic_classifier;
pub mod skip_lists;
pub mod stats;
pub mod technology_signatures;
pub mod vendor_classifier;

#[cfg(test)]
mod fixtures;

pub use corpus::{PreprocessedCorpus, SiteRecord};
pub use error::{AnalysisError, Result};
pub use options::{AnalysisOptions, Thresholds};
pub use patterns::{AnalysisResult, CorpusAnalyzer, FinalizedPatterns, PatternRecord};
pub use pipeline::{AggregatedResults, Pipeline, PipelineOutput};
pub use recommendations::{Recommendation, RecommendationAction, RecommendationSet};
