//! The model registry: resolves a logical model name (+ optional routing
//! profile) to one concrete provider-backed variant, applying the
//! configured load-balancing strategy.

use std::sync::atomic::{AtomicUsize, Ordering};

use config::{ModelConfigFile, ModelVariantConfig, SelectionStrategy};
use dashmap::DashMap;
use itertools::Itertools;
use rand::Rng;

use crate::error::{LlmError, LlmResult};

pub struct Registry {
    default_strategy: SelectionStrategy,
    variants: Vec<ModelVariantConfig>,
    round_robin_cursors: DashMap<String, AtomicUsize>,
}

impl Registry {
    pub fn new(config: ModelConfigFile) -> Self {
        let registry = Self {
            default_strategy: config.default_strategy,
            variants: config.models,
            round_robin_cursors: DashMap::new(),
        };

        log::info!("loaded models: {}", registry.model_names().iter().join(", "));

        registry
    }

    /// All variants for `model`, narrowed to `profile` when the narrowed
    /// set is non-empty; a profile is a hint, not a hard partition, so a
    /// profile matching nothing falls back to all variants of `model`.
    fn candidates(&self, model: &str, profile: Option<&str>) -> Vec<&ModelVariantConfig> {
        let all: Vec<&ModelVariantConfig> = self.variants.iter().filter(|v| v.name == model).collect();

        let Some(profile) = profile else { return all };

        let narrowed: Vec<&ModelVariantConfig> = all.iter().copied().filter(|v| v.profile.as_deref() == Some(profile)).collect();

        if narrowed.is_empty() { all } else { narrowed }
    }

    /// Resolve `model` (+ optional `profile`) to one concrete variant.
    ///
    /// The effective strategy is the first candidate's `strategy`
    /// override if set, else `default_strategy`.
    pub fn resolve(&self, model: &str, profile: Option<&str>) -> LlmResult<&ModelVariantConfig> {
        let candidates = self.candidates(model, profile);
        if candidates.is_empty() {
            return Err(LlmError::UnknownModel(model.to_string()));
        }
        if candidates.len() == 1 {
            return Ok(candidates[0]);
        }

        let strategy = candidates[0].strategy.unwrap_or(self.default_strategy);

        let selected = match strategy {
            SelectionStrategy::First => candidates[0],
            SelectionStrategy::RoundRobin => self.round_robin_select(model, &candidates),
            SelectionStrategy::Random => candidates[rand::rng().random_range(0..candidates.len())],
            SelectionStrategy::WeightedRandom => self.weighted_random_select(&candidates),
        };

        Ok(selected)
    }

    /// Distinct logical model names, sorted, for the `/v1/models` listing.
    pub fn model_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.variants.iter().map(|v| v.name.clone()).collect();
        names.sort();
        names.dedup();
        names
    }

    fn round_robin_select<'a>(&self, model: &str, candidates: &[&'a ModelVariantConfig]) -> &'a ModelVariantConfig {
        let cursor = self.round_robin_cursors.entry(model.to_string()).or_insert_with(|| AtomicUsize::new(0));
        let index = cursor.fetch_add(1, Ordering::Relaxed) % candidates.len();
        candidates[index]
    }

    fn weighted_random_select<'a>(&self, candidates: &[&'a ModelVariantConfig]) -> &'a ModelVariantConfig {
        let total_weight: u32 = candidates.iter().map(|v| v.weight.max(1)).sum();
        let mut pick = rand::rng().random_range(0..total_weight);

        for candidate in candidates {
            let weight = candidate.weight.max(1);
            if pick < weight {
                return candidate;
            }
            pick -= weight;
        }

        candidates[candidates.len() - 1]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    fn registry(yaml: &str) -> Registry {
        Registry::new(ModelConfigFile::from_yaml(yaml).unwrap())
    }

    #[test]
    fn resolves_single_variant_regardless_of_strategy() {
        let reg = registry(indoc! {r#"
            models:
              - name: default
                provider: openai
                model: gpt-4o-mini
        "#});

        assert_eq!(reg.resolve("default", None).unwrap().model, "gpt-4o-mini");
    }

    #[test]
    fn unknown_model_is_an_error() {
        let reg = registry(indoc! {r#"
            models:
              - name: default
                provider: openai
                model: gpt-4o-mini
        "#});

        assert!(matches!(reg.resolve("nope", None), Err(LlmError::UnknownModel(_))));
    }

    #[test]
    fn round_robin_cycles_through_candidates_in_order() {
        let reg = registry(indoc! {r#"
            default_strategy: round_robin
            models:
              - name: default
                provider: openai
                model: a
              - name: default
                provider: openai
                model: b
        "#});

        let picks: Vec<_> = (0..4).map(|_| reg.resolve("default", None).unwrap().model.clone()).collect();
        assert_eq!(picks, vec!["a", "b", "a", "b"]);
    }

    #[test]
    fn profile_narrows_candidate_set() {
        let reg = registry(indoc! {r#"
            models:
              - name: default
                provider: openai
                model: prod-model
              - name: default
                provider: openai
                model: eval-model
                profile: eval
        "#});

        assert_eq!(reg.resolve("default", Some("eval")).unwrap().model, "eval-model");
        assert_eq!(reg.resolve("default", None).unwrap().model, "prod-model");
    }

    #[test]
    fn profile_with_no_matching_variant_falls_back_to_all_variants() {
        let reg = registry(indoc! {r#"
            models:
              - name: default
                provider: openai
                model: prod-model
        "#});

        assert_eq!(reg.resolve("default", Some("staging")).unwrap().model, "prod-model");
    }

    #[test]
    fn weighted_random_never_selects_zero_weight_candidate_exclusively() {
        let reg = registry(indoc! {r#"
            default_strategy: weighted_random
            models:
              - name: default
                provider: openai
                model: heavy
                weight: 99
              - name: default
                provider: openai
                model: light
                weight: 1
        "#});

        let picks: std::collections::HashSet<_> = (0..50).map(|_| reg.resolve("default", None).unwrap().model.clone()).collect();
        assert!(picks.contains("heavy"));
    }
}
