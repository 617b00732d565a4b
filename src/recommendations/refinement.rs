// Refinement: narrow broad headers to values or combine correlated ones
use super::{GeneratorContext, MissingInput, Recommendation, RecommendationAction, RecommendationGenerator};
use crate::vendor_classifier::detect_vendor_by_value;
use std::collections::BTreeMap;

const DOMINANT_VALUE_SHARE: f64 = 0.6;
const VALUE_STRENGTH: f64 = 0.8;
const VENDOR_VALUE_BONUS: f64 = 0.1;

pub struct RefinementGenerator;

impl RecommendationGenerator for RefinementGenerator {
    fn name(&self) -> &'static str {
        "refinement"
    }

    fn generate(&self, ctx: &GeneratorContext<'_>) -> Result<Vec<Recommendation>, MissingInput> {
        let patterns = ctx.require_headers(self.name())?;
        let cooccurrence = ctx.results.cooccurrence.as_ref().ok_or(MissingInput {
            generator: self.name(),
            input: "cooccurrence",
        })?;
        let specific = cooccurrence.specific();

        // Keyed by recommended pattern so each refinement appears once
        let mut by_pattern: BTreeMap<String, Recommendation> = BTreeMap::new();
        let mut offer = |recommendation: Recommendation| {
            let keep = by_pattern
                .get(&recommendation.pattern)
                .is_none_or(|existing| existing.confidence.value < recommendation.confidence.value);
            if keep {
                by_pattern.insert(recommendation.pattern.clone(), recommendation);
            }
        };

        for pair in &specific.strong_correlations {
            let Some(record) = patterns.get(&pair.header1) else {
                continue;
            };
            if !patterns.contains(&pair.header2) {
                continue;
            }
            offer(ctx.recommend(
                record,
                format!("{}+{}", pair.header1, pair.header2),
                RecommendationAction::Refine,
                pair.conditional_probability.min(pair.reverse_conditional_probability),
                vec![format!(
                    "{} and {} appear together (P={:.2}/{:.2})",
                    pair.header1, pair.header2, pair.conditional_probability, pair.reverse_conditional_probability
                )],
                vec![
                    format!("{} sites carry both", pair.count),
                    format!("mutual information {:.3} bits", pair.mutual_information),
                ],
            ));
        }

        for signature in &specific.technology_signatures {
            if signature.conflicting_sites == 0 {
                continue;
            }
            let Some(record) = signature
                .required
                .iter()
                .filter_map(|label| label.strip_prefix("header:"))
                .find_map(|header| patterns.get(header))
            else {
                continue;
            };
            let share = signature.occurrence_count as f64
                / (signature.occurrence_count + signature.conflicting_sites) as f64;
            offer(ctx.recommend(
                record,
                record.pattern().to_string(),
                RecommendationAction::Refine,
                share,
                vec![format!(
                    "{} sites matching the {} signature also carry conflicting evidence",
                    signature.conflicting_sites, signature.name
                )],
                vec![format!("conflicting evidence: {}", signature.conflicting.join(", "))],
            ));
        }

        for record in patterns.iter() {
            let values = record.value_frequencies();
            let Some(top) = values.first() else {
                continue;
            };
            if values.len() < 2 || record.values_truncated() || top.frequency < DOMINANT_VALUE_SHARE {
                continue;
            }
            let mut strength = VALUE_STRENGTH * top.frequency;
            let mut factors = vec![format!(
                "value '{}' on {:.0}% of carrying sites",
                top.value,
                top.frequency * 100.0
            )];
            if let Some(vendor) = detect_vendor_by_value(record.pattern(), &top.value) {
                strength += VENDOR_VALUE_BONUS;
                factors.push(format!("value identifies {}", vendor.name));
            }
            offer(ctx.recommend(
                record,
                format!("{}={}", record.pattern(), top.value),
                RecommendationAction::Refine,
                strength,
                factors,
                vec![format!("{} distinct values tracked", values.len())],
            ));
        }

        Ok(by_pattern.into_values().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::{PreprocessedCorpus, SiteRecord};
    use crate::options::AnalysisOptions;
    use crate::pipeline::Pipeline;

    fn corpus() -> PreprocessedCorpus {
        let mut records = Vec::new();
        for i in 0..40 {
            let server = if i < 32 { "nginx" } else { "Apache" };
            let mut site = SiteRecord::new(format!("https://s{}.example", i))
                .with_cms(if i < 20 { "Shopify" } else { "WordPress" })
                .with_header("server", server);
            if i < 20 {
                site = site.with_header("x-shopid", "1").with_header("x-shardid", "2");
            } else {
                site = site.with_header("x-pingback", "/xmlrpc.php");
            }
            records.push(site);
        }
        PreprocessedCorpus::new(records)
    }

    #[test]
    fn test_correlated_and_value_refinements() {
        let corpus = corpus();
        let options = AnalysisOptions::default();
        let results = Pipeline::new(options.clone()).unwrap().run(&corpus).results;
        let ctx = GeneratorContext::new(&corpus, &options, &results);
        let recommendations = RefinementGenerator.generate(&ctx).unwrap();

        assert!(recommendations.iter().any(|r| r.pattern == "x-shardid+x-shopid"));
        let server = recommendations.iter().find(|r| r.pattern == "server=nginx").unwrap();
        assert_eq!(server.action, RecommendationAction::Refine);
        assert!(server.reasoning.primary_factors.iter().any(|f| f.contains("Nginx")));
    }

    #[test]
    fn test_requires_cooccurrence() {
        let corpus = corpus();
        let options = AnalysisOptions::default();
        let mut results = Pipeline::new(options.clone()).unwrap().run(&corpus).results;
        results.cooccurrence = None;
        let ctx = GeneratorContext::new(&corpus, &options, &results);
        assert_eq!(RefinementGenerator.generate(&ctx).unwrap_err().input, "cooccurrence");
    }
}
