// Filtering: headers that carry no platform signal
use super::{GeneratorContext, MissingInput, Recommendation, RecommendationAction, RecommendationGenerator};
use crate::semantic_classifier::{FilterRecommendation, PatternCategory};

/// Spread of per-CMS frequencies below which a header counts as uniform.
const UNIFORM_SPECIFICITY: f64 = 0.1;
const UBIQUITOUS_FREQUENCY: f64 = 0.5;

pub struct FilteringGenerator;

impl RecommendationGenerator for FilteringGenerator {
    fn name(&self) -> &'static str {
        "filtering"
    }

    fn generate(&self, ctx: &GeneratorContext<'_>) -> Result<Vec<Recommendation>, MissingInput> {
        let patterns = ctx.require_headers(self.name())?;
        let semantic = ctx.results.semantic.as_ref().ok_or(MissingInput {
            generator: self.name(),
            input: "semantic",
        })?;
        let classifications = &semantic.specific().classifications;

        let mut recommendations = Vec::new();
        for record in patterns.iter() {
            let Some(classification) = classifications.get(record.pattern()) else {
                continue;
            };
            if classification.filter_recommendation == FilterRecommendation::AlwaysFilter {
                recommendations.push(ctx.recommend(
                    record,
                    record.pattern().to_string(),
                    RecommendationAction::Filter,
                    1.0 - classification.discriminative_score,
                    vec![
                        "classified as generic".to_string(),
                        "always-filter category".to_string(),
                    ],
                    vec![format!("discriminative score {:.2}", classification.discriminative_score)],
                ));
                continue;
            }

            // Uniform presence across CMS categories says nothing about the platform
            if classification.category == PatternCategory::Platform || classification.vendor.is_some() {
                continue;
            }
            let Some(correlation) = ctx.correlation(record.pattern()) else {
                continue;
            };
            if correlation.platform_specificity < UNIFORM_SPECIFICITY
                && correlation.overall_frequency >= UBIQUITOUS_FREQUENCY
            {
                recommendations.push(ctx.recommend(
                    record,
                    record.pattern().to_string(),
                    RecommendationAction::Filter,
                    0.8 * (1.0 - correlation.platform_specificity),
                    vec![
                        format!(
                            "uniform across CMS categories (specificity {:.2})",
                            correlation.platform_specificity
                        ),
                        format!("present on {:.0}% of sites", correlation.overall_frequency * 100.0),
                    ],
                    vec![format!("category {:?}", classification.category)],
                ));
            }
        }
        Ok(recommendations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::{PreprocessedCorpus, SiteRecord};
    use crate::fixtures::multi_platform_corpus;
    use crate::options::AnalysisOptions;
    use crate::pipeline::{AggregatedResults, Pipeline};

    #[test]
    fn test_requires_semantic_result() {
        let corpus = multi_platform_corpus(5);
        let options = AnalysisOptions::default();
        let mut results = Pipeline::new(options.clone()).unwrap().run(&corpus).results;
        results.semantic = None;
        let ctx = GeneratorContext::new(&corpus, &options, &results);
        let err = FilteringGenerator.generate(&ctx).unwrap_err();
        assert_eq!(err.input, "semantic");

        let empty = AggregatedResults::default();
        let ctx = GeneratorContext::new(&corpus, &options, &empty);
        assert_eq!(FilteringGenerator.generate(&ctx).unwrap_err().input, "header");
    }

    #[test]
    fn test_generic_and_uniform_headers_filtered() {
        let mut records = Vec::new();
        for (i, cms) in ["WordPress", "Drupal"].iter().cycle().take(80).enumerate() {
            records.push(
                SiteRecord::new(format!("https://s{}.example", i))
                    .with_cms(*cms)
                    .with_header("x-ua-compatible", "IE=edge")
                    .with_header("x-request-id", "abc"),
            );
        }
        let corpus = PreprocessedCorpus::new(records);
        let options = AnalysisOptions::default();
        let results = Pipeline::new(options.clone()).unwrap().run(&corpus).results;
        let ctx = GeneratorContext::new(&corpus, &options, &results);
        let recommendations = FilteringGenerator.generate(&ctx).unwrap();

        let generic = recommendations.iter().find(|r| r.pattern == "x-ua-compatible").unwrap();
        assert_eq!(generic.action, RecommendationAction::Filter);
        assert!(generic.reasoning.primary_factors.iter().any(|f| f.contains("generic")));

        let uniform = recommendations.iter().find(|r| r.pattern == "x-request-id").unwrap();
        assert!(uniform.bias_assessment.is_some());
        assert!(uniform.confidence.value > 0.5);
    }
}
