// Retention: headers backed by vendor or category evidence
use super::{GeneratorContext, MissingInput, Recommendation, RecommendationAction, RecommendationGenerator};
use crate::semantic_classifier::PatternCategory;

const VENDOR_STRENGTH: f64 = 0.7;
const SIGNATURE_BONUS: f64 = 0.1;

fn retains(category: PatternCategory) -> bool {
    matches!(
        category,
        PatternCategory::Platform
            | PatternCategory::CmsIndicative
            | PatternCategory::Infrastructure
            | PatternCategory::Security
    )
}

pub struct RetentionGenerator;

impl RecommendationGenerator for RetentionGenerator {
    fn name(&self) -> &'static str {
        "retention"
    }

    fn generate(&self, ctx: &GeneratorContext<'_>) -> Result<Vec<Recommendation>, MissingInput> {
        let patterns = ctx.require_headers(self.name())?;
        if ctx.results.semantic.is_none() && ctx.results.vendor.is_none() {
            return Err(MissingInput {
                generator: self.name(),
                input: "semantic or vendor",
            });
        }
        let signatures = ctx
            .results
            .platform_signature
            .as_ref()
            .filter(|_| ctx.options.cross_analyzer_intelligence)
            .map(|r| r.specific().signatures.as_slice())
            .unwrap_or_default();

        let mut recommendations = Vec::new();
        for record in patterns.iter() {
            if record.site_count() < ctx.options.min_occurrences {
                continue;
            }
            let metadata = ctx.metadata(record.pattern());
            let category = metadata.category.filter(|c| retains(*c));
            if category.is_none() && metadata.vendor.is_none() {
                continue;
            }

            let mut factors = Vec::new();
            let mut evidence = Vec::new();
            let mut strength: f64 = 0.0;
            if let Some(category) = category {
                let score = metadata.discriminative_score.unwrap_or(0.0);
                strength = strength.max(score);
                factors.push(format!("{:?} category", category));
                evidence.push(format!("discriminative score {:.2}", score));
            }
            if let Some(vendor) = &metadata.vendor {
                strength = strength.max(VENDOR_STRENGTH);
                factors.push(format!("attributed to {}", vendor));
            }

            let key = format!("header:{}", record.pattern());
            for signature in signatures {
                if signature.evidence.iter().any(|e| e.pattern == key) {
                    strength += SIGNATURE_BONUS;
                    factors.push(format!(
                        "evidence for the {} signature (rank {})",
                        signature.platform, signature.rank
                    ));
                }
            }

            recommendations.push(ctx.recommend(
                record,
                record.pattern().to_string(),
                RecommendationAction::Retain,
                strength.min(1.0),
                factors,
                evidence,
            ));
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
    use crate::pipeline::Pipeline;

    #[test]
    fn test_no_evidence_means_no_recommendation() {
        let mut records = Vec::new();
        for i in 0..40 {
            records.push(
                SiteRecord::new(format!("https://s{}.example", i))
                    .with_cms(if i % 2 == 0 { "WordPress" } else { "Drupal" })
                    .with_header("x-mystery", "1"),
            );
        }
        let corpus = PreprocessedCorpus::new(records);
        let options = AnalysisOptions::default();
        let results = Pipeline::new(options.clone()).unwrap().run(&corpus).results;
        let ctx = GeneratorContext::new(&corpus, &options, &results);
        let recommendations = RetentionGenerator.generate(&ctx).unwrap();
        assert!(recommendations.iter().all(|r| r.pattern != "x-mystery"));
    }

    #[test]
    fn test_platform_header_retained_with_signature_bonus() {
        let corpus = multi_platform_corpus(40);
        let options = AnalysisOptions::default();
        let results = Pipeline::new(options.clone()).unwrap().run(&corpus).results;
        let ctx = GeneratorContext::new(&corpus, &options, &results);
        let recommendations = RetentionGenerator.generate(&ctx).unwrap();

        let pingback = recommendations.iter().find(|r| r.pattern == "x-pingback").unwrap();
        assert_eq!(pingback.action, RecommendationAction::Retain);
        assert!(pingback
            .reasoning
            .primary_factors
            .iter()
            .any(|f| f.contains("WordPress signature")));
        assert!(pingback.reasoning.primary_factors.iter().any(|f| f.contains("attributed to WordPress")));
    }

    #[test]
    fn test_respects_min_occurrences() {
        let corpus = multi_platform_corpus(4);
        let options = AnalysisOptions::default();
        let results = Pipeline::new(options.clone()).unwrap().run(&corpus).results;
        let strict = AnalysisOptions::default().with_min_occurrences(100);
        let ctx = GeneratorContext::new(&corpus, &strict, &results);
        assert!(RetentionGenerator.generate(&ctx).unwrap().is_empty());
    }
}
