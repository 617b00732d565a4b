// Pipeline - Runs every analyzer in dependency order and hands the
// aggregated results to the recommendation coordinator
use crate::bias_detector::{BiasDetector, BiasSpecific};
use crate::cooccurrence::{CooccurrenceAnalyzer, CooccurrenceSpecific};
use crate::corpus::PreprocessedCorpus;
use crate::error::Result;
use crate::header_analyzer::{HeaderAnalyzer, HeaderSpecific};
use crate::meta_analyzer::{MetaAnalyzer, MetaSpecific};
use crate::options::AnalysisOptions;
use crate::patterns::{AnalysisResult, CorpusAnalyzer};
use crate::platform_signature::{DimensionInputs, PlatformSignatureAnalyzer, PlatformSignatureSpecific};
use crate::recommendations::{self, RecommendationSet};
use crate::script_analyzer::{ScriptAnalyzer, ScriptSpecific};
use crate::semantic_classifier::{SemanticAnalyzer, SemanticSpecific};
use crate::vendor_classifier::{VendorAnalyzer, VendorSpecific};
use serde::Serialize;
use std::time::Instant;
use tracing::{debug, info};

/// One slot per analyzer. A `None` slot is an upstream result that was not
/// produced, and downstream consumers degrade instead of guessing.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedResults {
    pub header: Option<AnalysisResult<HeaderSpecific>>,
    pub meta: Option<AnalysisResult<MetaSpecific>>,
    pub script: Option<AnalysisResult<ScriptSpecific>>,
    pub semantic: Option<AnalysisResult<SemanticSpecific>>,
    pub vendor: Option<AnalysisResult<VendorSpecific>>,
    pub cooccurrence: Option<AnalysisResult<CooccurrenceSpecific>>,
    pub platform_signature: Option<AnalysisResult<PlatformSignatureSpecific>>,
    pub bias: Option<AnalysisResult<BiasSpecific>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineOutput {
    pub total_sites: usize,
    pub results: AggregatedResults,
    pub recommendations: RecommendationSet,
}

pub struct Pipeline {
    options: AnalysisOptions,
}

impl Pipeline {
    pub fn new(options: AnalysisOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self { options })
    }

    pub fn options(&self) -> &AnalysisOptions {
        &self.options
    }

    pub fn run(&self, corpus: &PreprocessedCorpus) -> PipelineOutput {
        let options = &self.options;
        let started = Instant::now();
        info!("Analyzing corpus of {} sites", corpus.total_sites());

        let header = HeaderAnalyzer::new().analyze(corpus, options);
        let meta = MetaAnalyzer::new().analyze(corpus, options);
        let script = ScriptAnalyzer::new().analyze(corpus, options);
        debug!(
            "Dimension patterns: {} header, {} meta, {} script",
            header.patterns().len(),
            meta.patterns().len(),
            script.patterns().len()
        );

        let semantic = SemanticAnalyzer::new().analyze(&header, options);
        let vendor = VendorAnalyzer::new().analyze(corpus, &header, Some(&script), options);
        let cooccurrence = CooccurrenceAnalyzer::new().analyze(corpus, options);

        let inputs = DimensionInputs {
            header: Some(semantic.patterns()),
            meta: Some(meta.patterns()),
            script: Some(script.patterns()),
        };
        let platform_signature =
            PlatformSignatureAnalyzer::new().analyze(corpus, inputs, Some(&cooccurrence), options);

        let bias = if options.bias_aware_analysis {
            Some(BiasDetector::new().analyze(corpus, options))
        } else {
            debug!("Bias analysis disabled");
            None
        };

        let results = AggregatedResults {
            header: Some(header),
            meta: Some(meta),
            script: Some(script),
            semantic: Some(semantic),
            vendor: Some(vendor),
            cooccurrence: Some(cooccurrence),
            platform_signature: Some(platform_signature),
            bias,
        };
        let recommendations = recommendations::generate(corpus, options, &results);

        info!(
            "Analysis complete in {:.2}s: {} recommendations",
            started.elapsed().as_secs_f64(),
            recommendations.len()
        );
        PipelineOutput {
            total_sites: corpus.total_sites(),
            results,
            recommendations,
        }
    }
}
