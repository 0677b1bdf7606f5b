use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::catalog::Catalog;
use crate::constraint::UseCaseId;
use crate::error::{CatalogError, ValidationError};

const EXCERPT_CHARS: usize = 50;

/// Tuning knobs for [`BeliefNetwork`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Top two beliefs closer than this are ambiguous.
    pub ambiguity_threshold: f64,
    /// Likelihood with no matching indicator.
    pub base_likelihood: f64,
    /// Added per strong indicator hit.
    pub strong_weight: f64,
    /// Added per weak indicator hit.
    pub weak_weight: f64,
    /// Likelihood ceiling.
    pub likelihood_cap: f64,
    /// Likelihood given to a use case the user confirmed.
    pub confirmation_likelihood: f64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            ambiguity_threshold: 0.15,
            base_likelihood: 0.1,
            strong_weight: 0.4,
            weak_weight: 0.1,
            likelihood_cap: 0.95,
            confirmation_likelihood: 0.95,
        }
    }
}

impl NetworkConfig {
    /// Sets the ambiguity threshold.
    #[must_use]
    pub fn with_ambiguity_threshold(mut self, threshold: f64) -> Self {
        self.ambiguity_threshold = threshold;
        self
    }

    /// Sets the likelihood ceiling.
    #[must_use]
    pub fn with_likelihood_cap(mut self, cap: f64) -> Self {
        self.likelihood_cap = cap;
        self
    }
}

/// Static description of one use case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UseCaseNode {
    /// Use case id.
    pub id: UseCaseId,
    /// Display name.
    pub name: String,
    /// Prior probability.
    pub prior: f64,
    /// Strong indicator tokens, lowercase.
    pub strong_indicators: BTreeSet<String>,
    /// Weak indicator tokens, lowercase.
    pub weak_indicators: BTreeSet<String>,
}

impl UseCaseNode {
    fn likelihood(&self, matched: &BTreeSet<&str>, config: &NetworkConfig) -> f64 {
        let strong = matched
            .iter()
            .filter(|m| self.strong_indicators.contains(**m))
            .count();
        let weak = matched
            .iter()
            .filter(|m| self.weak_indicators.contains(**m))
            .count();
        #[allow(clippy::cast_precision_loss)]
        let raw = config.base_likelihood
            + config.strong_weight * strong as f64
            + config.weak_weight * weak as f64;
        raw.min(config.likelihood_cap)
    }
}

/// Current belief in one use case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Belief {
    /// Use case id.
    pub use_case: UseCaseId,
    /// Current probability.
    pub probability: f64,
    /// Excerpts of evidence that raised the probability.
    pub supporting_evidence: Vec<String>,
    /// Excerpts of evidence that lowered it.
    pub conflicting_evidence: Vec<String>,
}

/// Material for a binary clarifying question between the two leading use
/// cases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisambiguationInfo {
    /// The two leading use cases, highest first.
    pub top_two: [(UseCaseId, f64); 2],
    /// Strong indicators only the first has.
    pub first_only: BTreeSet<String>,
    /// Strong indicators only the second has.
    pub second_only: BTreeSet<String>,
    /// Probability of the leader.
    pub confidence: f64,
    /// Entropy of the whole distribution, in bits.
    pub entropy: f64,
}

#[derive(Debug, Clone)]
struct Indicator {
    token: String,
    pattern: Regex,
}

/// Belief-update network over the catalog's use cases.
///
/// Each update multiplies the current belief by an indicator-driven
/// likelihood and normalizes. The posterior is reused as the next prior, so
/// repeated evidence compounds.
///
/// # Examples
///
/// ```
/// use reconcile::catalog::Catalog;
/// use reconcile::constraint::UseCaseId;
/// use reconcile::inference::BeliefNetwork;
///
/// let mut network = BeliefNetwork::from_catalog(&Catalog::builtin()).unwrap();
/// network.update("dosing pump and pH probe in the treatment tank");
/// let (leader, _) = network.top_use_cases(1)[0].clone();
/// assert_eq!(leader, UseCaseId::new("UC6"));
/// ```
#[derive(Debug, Clone)]
pub struct BeliefNetwork {
    config: NetworkConfig,
    nodes: BTreeMap<UseCaseId, UseCaseNode>,
    beliefs: BTreeMap<UseCaseId, Belief>,
    vocabulary: Vec<Indicator>,
    history: Vec<String>,
}

impl BeliefNetwork {
    /// Builds a network with default tuning.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::Invalid` if an indicator cannot be compiled
    /// into a matcher.
    pub fn from_catalog(catalog: &Catalog) -> Result<Self, CatalogError> {
        Self::with_config(catalog, NetworkConfig::default())
    }

    /// Builds a network with explicit tuning.
    ///
    /// # Errors
    ///
    /// As [`BeliefNetwork::from_catalog`].
    pub fn with_config(catalog: &Catalog, config: NetworkConfig) -> Result<Self, CatalogError> {
        let mut nodes = BTreeMap::new();
        let mut tokens = BTreeSet::new();

        for (id, def) in &catalog.use_cases {
            let (strong, weak) = def.indicators();
            let strong: BTreeSet<String> = strong.into_iter().filter(|s| !s.is_empty()).collect();
            let weak: BTreeSet<String> = weak.into_iter().filter(|s| !s.is_empty()).collect();
            tokens.extend(strong.iter().cloned());
            tokens.extend(weak.iter().cloned());
            nodes.insert(
                id.clone(),
                UseCaseNode {
                    id: id.clone(),
                    name: def.name.clone(),
                    prior: catalog.prior(id),
                    strong_indicators: strong,
                    weak_indicators: weak,
                },
            );
        }

        let vocabulary = tokens
            .into_iter()
            .map(|token| {
                let phrase = token
                    .split_whitespace()
                    .map(regex::escape)
                    .collect::<Vec<_>>()
                    .join(r"\s+");
                let pattern = Regex::new(&format!(r"\b{phrase}\b")).map_err(|e| {
                    CatalogError::Invalid {
                        reason: format!("indicator '{token}' is not matchable: {e}"),
                    }
                })?;
                Ok(Indicator { token, pattern })
            })
            .collect::<Result<Vec<_>, CatalogError>>()?;

        let mut network = Self {
            config,
            nodes,
            beliefs: BTreeMap::new(),
            vocabulary,
            history: Vec::new(),
        };
        network.reset();
        Ok(network)
    }

    /// Indicator tokens found in `text` as whole words or phrases.
    #[must_use]
    pub fn matched_indicators(&self, text: &str) -> BTreeSet<&str> {
        let lowered = text.to_lowercase();
        self.vocabulary
            .iter()
            .filter(|ind| ind.pattern.is_match(&lowered))
            .map(|ind| ind.token.as_str())
            .collect()
    }

    /// Folds one piece of evidence into the beliefs and returns the new
    /// distribution.
    ///
    /// If every unnormalized posterior is zero the beliefs are left as they
    /// were.
    pub fn update(&mut self, evidence: &str) -> BTreeMap<UseCaseId, f64> {
        let likelihoods: BTreeMap<UseCaseId, f64> = {
            let matched = self.matched_indicators(evidence);
            self.nodes
                .iter()
                .map(|(id, node)| (id.clone(), node.likelihood(&matched, &self.config)))
                .collect()
        };
        self.history.push(evidence.to_string());
        self.apply(&likelihoods, evidence);

        debug!(
            evidence_chars = evidence.len(),
            entropy = self.entropy(),
            "belief update"
        );
        self.probabilities()
    }

    /// Treats an explicit user choice as strong evidence for `use_case`.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::UnknownUseCase` if the id is not in the
    /// catalog.
    pub fn confirm_use_case(
        &mut self,
        use_case: &UseCaseId,
    ) -> Result<BTreeMap<UseCaseId, f64>, ValidationError> {
        if !self.nodes.contains_key(use_case) {
            return Err(ValidationError::UnknownUseCase {
                id: use_case.to_string(),
            });
        }
        let likelihoods: BTreeMap<UseCaseId, f64> = self
            .nodes
            .keys()
            .map(|id| {
                let l = if id == use_case {
                    self.config.confirmation_likelihood
                } else {
                    self.config.base_likelihood
                };
                (id.clone(), l)
            })
            .collect();
        let note = format!("user confirmed {use_case}");
        self.history.push(note.clone());
        self.apply(&likelihoods, &note);
        Ok(self.probabilities())
    }

    fn apply(&mut self, likelihoods: &BTreeMap<UseCaseId, f64>, evidence: &str) {
        let unnormalized: BTreeMap<&UseCaseId, f64> = self
            .beliefs
            .iter()
            .map(|(id, b)| (id, b.probability * likelihoods.get(id).copied().unwrap_or(0.0)))
            .collect();
        let total: f64 = unnormalized.values().sum();
        if total <= 0.0 {
            return;
        }

        let posterior: Vec<(UseCaseId, f64)> = unnormalized
            .into_iter()
            .map(|(id, p)| (id.clone(), p / total))
            .collect();
        let excerpt: String = evidence.chars().take(EXCERPT_CHARS).collect();

        for (id, p) in posterior {
            let Some(belief) = self.beliefs.get_mut(&id) else {
                continue;
            };
            match p.partial_cmp(&belief.probability) {
                Some(Ordering::Greater) => belief.supporting_evidence.push(excerpt.clone()),
                Some(Ordering::Less) => belief.conflicting_evidence.push(excerpt.clone()),
                _ => {}
            }
            belief.probability = p;
        }
    }

    /// Overwrites the probability of known use cases. Values are taken as
    /// given, without normalization.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::UnknownUseCase` for an id outside the
    /// catalog; no belief is changed in that case.
    pub fn seed_beliefs(&mut self, seeds: &BTreeMap<UseCaseId, f64>) -> Result<(), ValidationError> {
        if let Some(unknown) = seeds.keys().find(|id| !self.beliefs.contains_key(*id)) {
            return Err(ValidationError::UnknownUseCase {
                id: unknown.to_string(),
            });
        }
        for (id, p) in seeds {
            if let Some(belief) = self.beliefs.get_mut(id) {
                belief.probability = *p;
            }
        }
        Ok(())
    }

    /// Restores priors and forgets all evidence.
    pub fn reset(&mut self) {
        self.beliefs = self
            .nodes
            .iter()
            .map(|(id, node)| {
                (
                    id.clone(),
                    Belief {
                        use_case: id.clone(),
                        probability: node.prior,
                        supporting_evidence: Vec::new(),
                        conflicting_evidence: Vec::new(),
                    },
                )
            })
            .collect();
        self.history.clear();
    }

    /// Current distribution.
    #[must_use]
    pub fn probabilities(&self) -> BTreeMap<UseCaseId, f64> {
        self.beliefs
            .iter()
            .map(|(id, b)| (id.clone(), b.probability))
            .collect()
    }

    /// Top `n` use cases, highest first.
    #[must_use]
    pub fn top_use_cases(&self, n: usize) -> Vec<(UseCaseId, f64)> {
        let mut ranked: Vec<_> = self.probabilities().into_iter().collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        ranked.truncate(n);
        ranked
    }

    /// True when the two leading beliefs are closer than the ambiguity
    /// threshold.
    #[must_use]
    pub fn is_ambiguous(&self) -> bool {
        match self.top_use_cases(2).as_slice() {
            [first, second] => (first.1 - second.1).abs() < self.config.ambiguity_threshold,
            _ => false,
        }
    }

    /// Returns the two leading use cases and the strong indicators that
    /// tell them apart, when the beliefs are ambiguous.
    #[must_use]
    pub fn disambiguation_info(&self) -> Option<DisambiguationInfo> {
        if !self.is_ambiguous() {
            return None;
        }
        let mut top = self.top_use_cases(2).into_iter();
        let first = top.next()?;
        let second = top.next()?;
        let a = self.nodes.get(&first.0)?;
        let b = self.nodes.get(&second.0)?;

        Some(DisambiguationInfo {
            first_only: a
                .strong_indicators
                .difference(&b.strong_indicators)
                .cloned()
                .collect(),
            second_only: b
                .strong_indicators
                .difference(&a.strong_indicators)
                .cloned()
                .collect(),
            confidence: first.1.max(second.1),
            entropy: self.entropy(),
            top_two: [first, second],
        })
    }

    /// Shannon entropy of the distribution, in bits.
    #[must_use]
    pub fn entropy(&self) -> f64 {
        self.beliefs
            .values()
            .map(|b| b.probability)
            .filter(|p| *p > 0.0)
            .map(|p| -p * p.log2())
            .sum()
    }

    /// Looks up a belief.
    #[must_use]
    pub fn belief(&self, use_case: &UseCaseId) -> Option<&Belief> {
        self.beliefs.get(use_case)
    }

    /// Looks up a node.
    #[must_use]
    pub fn node(&self, use_case: &UseCaseId) -> Option<&UseCaseNode> {
        self.nodes.get(use_case)
    }

    /// Evidence folded in since the last reset.
    #[must_use]
    pub fn history(&self) -> &[String] {
        &self.history
    }

    /// Human-readable summary of the three leading use cases.
    #[must_use]
    pub fn explain(&self) -> String {
        let mut out = String::from("Current use-case analysis:\n");
        for (id, p) in self.top_use_cases(3) {
            let name = self.nodes.get(&id).map_or("", |n| n.name.as_str());
            out.push_str(&format!("\n{name} ({id}): {:.2}% confidence\n", p * 100.0));
            if let Some(belief) = self.beliefs.get(&id) {
                if !belief.supporting_evidence.is_empty() {
                    let shown: Vec<&str> = belief
                        .supporting_evidence
                        .iter()
                        .take(3)
                        .map(String::as_str)
                        .collect();
                    out.push_str(&format!("  Supporting: {}\n", shown.join(", ")));
                }
                if !belief.conflicting_evidence.is_empty() {
                    let shown: Vec<&str> = belief
                        .conflicting_evidence
                        .iter()
                        .take(3)
                        .map(String::as_str)
                        .collect();
                    out.push_str(&format!("  Conflicting: {}\n", shown.join(", ")));
                }
            }
        }
        if self.is_ambiguous() {
            out.push_str("\nAmbiguous: disambiguation needed");
        }
        out
    }

    /// Tuning in effect.
    #[must_use]
    pub const fn config(&self) -> &NetworkConfig {
        &self.config
    }
}
