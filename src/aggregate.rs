//! Confidence aggregation across agents.
//!
//! Agents report confidence on different scales and with different
//! reliability. The aggregator picks a combination strategy from the spread
//! of the readings, folds them into one number and derives two action flags:
//! whether the caller should ask the user, and whether a conflict may be
//! settled automatically.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// One agent's confidence reading for a round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfidence {
    /// Reporting agent.
    pub agent_id: String,
    /// Reported confidence in [0, 1].
    pub confidence: f64,
    /// Expertise weight of the agent.
    pub expertise_weight: f64,
    /// How many proposals back the reading.
    pub evidence_count: usize,
    /// Set when the agent flagged its own reading as doubtful.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uncertainty_reason: Option<String>,
}

impl AgentConfidence {
    /// Creates a reading with no uncertainty reason.
    #[must_use]
    pub fn new(agent_id: impl Into<String>, confidence: f64, expertise_weight: f64) -> Self {
        Self {
            agent_id: agent_id.into(),
            confidence,
            expertise_weight,
            evidence_count: 0,
            uncertainty_reason: None,
        }
    }

    /// Sets the evidence count.
    #[must_use]
    pub fn with_evidence(mut self, count: usize) -> Self {
        self.evidence_count = count;
        self
    }

    /// Flags the reading as uncertain.
    #[must_use]
    pub fn with_uncertainty(mut self, reason: impl Into<String>) -> Self {
        self.uncertainty_reason = Some(reason.into());
        self
    }
}

/// Caller-supplied context for one aggregation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationContext {
    /// Forces majority voting.
    pub is_critical: bool,
}

impl AggregationContext {
    /// Context for a critical decision.
    #[must_use]
    pub const fn critical() -> Self {
        Self { is_critical: true }
    }
}

/// How readings are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationStrategy {
    /// Expertise-weighted mean.
    Weighted,
    /// Lowest reading.
    Minimum,
    /// Product of weighted odds.
    Bayesian,
    /// Performance-weighted blend of the others.
    Adaptive,
    /// Share of agents above the voting threshold.
    Voting,
}

impl AggregationStrategy {
    /// Every strategy.
    pub const ALL: [Self; 5] = [
        Self::Weighted,
        Self::Minimum,
        Self::Bayesian,
        Self::Adaptive,
        Self::Voting,
    ];
}

impl fmt::Display for AggregationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Weighted => "weighted",
            Self::Minimum => "minimum",
            Self::Bayesian => "bayesian",
            Self::Adaptive => "adaptive",
            Self::Voting => "voting",
        };
        f.write_str(s)
    }
}

/// Result of an aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedConfidence {
    /// Combined confidence in [0, 1].
    pub final_confidence: f64,
    /// Strategy that produced it.
    pub strategy_used: AggregationStrategy,
    /// Agents whose readings were considered.
    pub contributing_agents: Vec<String>,
    /// Reading per agent.
    pub breakdown: BTreeMap<String, f64>,
    /// Short reason.
    pub explanation: String,
    /// The caller should ask the user.
    pub requires_disambiguation: bool,
    /// A pending conflict may be settled automatically.
    pub auto_resolve_eligible: bool,
}

impl AggregatedConfidence {
    fn low(reason: impl Into<String>) -> Self {
        Self {
            final_confidence: 0.0,
            strategy_used: AggregationStrategy::Minimum,
            contributing_agents: Vec::new(),
            breakdown: BTreeMap::new(),
            explanation: reason.into(),
            requires_disambiguation: true,
            auto_resolve_eligible: false,
        }
    }

    fn from_readings(
        final_confidence: f64,
        strategy_used: AggregationStrategy,
        readings: &[AgentConfidence],
        explanation: impl Into<String>,
    ) -> Self {
        Self {
            final_confidence: final_confidence.clamp(0.0, 1.0),
            strategy_used,
            contributing_agents: readings.iter().map(|r| r.agent_id.clone()).collect(),
            breakdown: readings
                .iter()
                .map(|r| (r.agent_id.clone(), r.confidence))
                .collect(),
            explanation: explanation.into(),
            requires_disambiguation: false,
            auto_resolve_eligible: false,
        }
    }
}

/// Thresholds used by [`ConfidenceAggregator`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// Readings at or above this count as a confident vote.
    pub voting_threshold: f64,
    /// Voting result when no strict majority is confident.
    pub voting_floor: f64,
    /// Spread below which agents agree.
    pub agreement_stdev: f64,
    /// Spread above which agents conflict.
    pub conflict_stdev: f64,
    /// Mean below which readings are treated as uncertain.
    pub uncertain_mean: f64,
    /// Results below this always ask the user.
    pub require_user_below: f64,
    /// Results above this may auto-resolve.
    pub auto_resolve_above: f64,
    /// Two-agent difference that allows auto-resolution.
    pub auto_resolve_diff: f64,
    /// EMA learning rate for strategy performance.
    pub learning_rate: f64,
    /// Weight for agents reporting a non-positive weight.
    pub fallback_weight: f64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            voting_threshold: 0.6,
            voting_floor: 0.3,
            agreement_stdev: 0.1,
            conflict_stdev: 0.3,
            uncertain_mean: 0.6,
            require_user_below: 0.5,
            auto_resolve_above: 0.8,
            auto_resolve_diff: 0.3,
            learning_rate: 0.1,
            fallback_weight: 0.33,
        }
    }
}

/// Combines per-agent confidence readings.
///
/// # Examples
///
/// ```
/// use reconcile::aggregate::{AgentConfidence, AggregationContext, AggregationStrategy, ConfidenceAggregator};
///
/// let aggregator = ConfidenceAggregator::new();
/// let readings = [
///     AgentConfidence::new("io_expert", 0.85, 0.4),
///     AgentConfidence::new("system_expert", 0.82, 0.35),
///     AgentConfidence::new("communication_expert", 0.88, 0.25),
/// ];
/// let result = aggregator.aggregate(&readings, AggregationContext::default());
/// assert_eq!(result.strategy_used, AggregationStrategy::Weighted);
/// assert!(result.auto_resolve_eligible);
/// ```
#[derive(Debug, Clone)]
pub struct ConfidenceAggregator {
    config: AggregatorConfig,
    performance: BTreeMap<AggregationStrategy, f64>,
}

impl Default for ConfidenceAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfidenceAggregator {
    /// Creates an aggregator with default thresholds.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(AggregatorConfig::default())
    }

    /// Creates an aggregator with explicit thresholds.
    #[must_use]
    pub fn with_config(config: AggregatorConfig) -> Self {
        Self {
            config,
            performance: AggregationStrategy::ALL.iter().map(|s| (*s, 1.0)).collect(),
        }
    }

    /// Combines `readings` into one confidence.
    ///
    /// An empty input yields 0.0 under `Minimum` and always asks the user.
    /// Readings whose confidence is outside [0, 1] (or NaN) are ignored, and
    /// a result that is not finite falls back to the same low answer.
    #[must_use]
    pub fn aggregate(
        &self,
        readings: &[AgentConfidence],
        context: AggregationContext,
    ) -> AggregatedConfidence {
        if readings.is_empty() {
            return AggregatedConfidence::low("No agent inputs");
        }
        let valid: Vec<AgentConfidence> = readings
            .iter()
            .filter(|r| (0.0..=1.0).contains(&r.confidence))
            .cloned()
            .collect();
        if valid.len() < readings.len() {
            debug!(
                dropped = readings.len() - valid.len(),
                "confidence readings outside [0, 1] ignored"
            );
        }
        if valid.is_empty() {
            return AggregatedConfidence::low("No valid agent inputs");
        }
        let readings = valid.as_slice();

        let (mean, stdev) = spread(readings);
        let strategy = self.select_strategy(mean, stdev, context);
        let mut result = match strategy {
            AggregationStrategy::Weighted => self.weighted(readings),
            AggregationStrategy::Minimum => minimum(readings),
            AggregationStrategy::Bayesian => self.bayesian(readings),
            AggregationStrategy::Voting => self.voting(readings),
            AggregationStrategy::Adaptive => self.adaptive(readings),
        };
        if !result.final_confidence.is_finite() {
            result = AggregatedConfidence::low(format!("{strategy} combination did not converge"));
        }

        result.requires_disambiguation = result.final_confidence < self.config.require_user_below
            || stdev > self.config.conflict_stdev
            || readings.iter().any(|r| r.uncertainty_reason.is_some());
        result.auto_resolve_eligible = result.final_confidence > self.config.auto_resolve_above
            || matches!(readings, [a, b] if (a.confidence - b.confidence).abs() > self.config.auto_resolve_diff);

        debug!(
            strategy = %result.strategy_used,
            agents = readings.len(),
            mean,
            stdev,
            final_confidence = result.final_confidence,
            "aggregated confidence"
        );
        result
    }

    fn select_strategy(&self, mean: f64, stdev: f64, context: AggregationContext) -> AggregationStrategy {
        if context.is_critical {
            AggregationStrategy::Voting
        } else if stdev < self.config.agreement_stdev {
            AggregationStrategy::Weighted
        } else if stdev > self.config.conflict_stdev {
            AggregationStrategy::Minimum
        } else if mean < self.config.uncertain_mean {
            AggregationStrategy::Bayesian
        } else {
            AggregationStrategy::Adaptive
        }
    }

    fn weight(&self, reading: &AgentConfidence) -> f64 {
        if reading.expertise_weight.is_finite() && reading.expertise_weight > 0.0 {
            reading.expertise_weight
        } else {
            self.config.fallback_weight
        }
    }

    fn weighted(&self, readings: &[AgentConfidence]) -> AggregatedConfidence {
        let (sum, total) = readings.iter().fold((0.0, 0.0), |(sum, total), r| {
            let w = self.weight(r);
            (sum + r.confidence * w, total + w)
        });
        let value = if total > 0.0 { sum / total } else { 0.0 };
        let weights: Vec<String> = readings
            .iter()
            .map(|r| format!("{}({:.0}%)", r.agent_id, self.weight(r) * 100.0))
            .collect();
        AggregatedConfidence::from_readings(
            value,
            AggregationStrategy::Weighted,
            readings,
            format!("Weighted average: {}", weights.join(", ")),
        )
    }

    fn bayesian(&self, readings: &[AgentConfidence]) -> AggregatedConfidence {
        let usable: Vec<&AgentConfidence> = readings
            .iter()
            .filter(|r| r.confidence > 0.0 && r.confidence < 1.0)
            .collect();
        if usable.is_empty() {
            return AggregatedConfidence::low("Invalid confidences for Bayesian combination");
        }

        // Summed in log-odds space; a product of raw odds overflows for
        // large weights.
        let log_odds: f64 = usable
            .iter()
            .map(|r| self.weight(r) * (r.confidence / (1.0 - r.confidence)).ln())
            .sum();
        let combined = 1.0 / (1.0 + (-log_odds).exp());
        if !combined.is_finite() {
            return AggregatedConfidence::low("Bayesian log-odds diverged");
        }
        let mut result = AggregatedConfidence::from_readings(
            combined,
            AggregationStrategy::Bayesian,
            readings,
            "Bayesian combination of weighted odds",
        );
        result.breakdown = usable
            .iter()
            .map(|r| (r.agent_id.clone(), r.confidence))
            .collect();
        result
    }

    fn voting(&self, readings: &[AgentConfidence]) -> AggregatedConfidence {
        let confident = readings
            .iter()
            .filter(|r| r.confidence >= self.config.voting_threshold)
            .count();
        #[allow(clippy::cast_precision_loss)]
        let ratio = confident as f64 / readings.len() as f64;
        let value = if ratio > 0.5 { ratio } else { self.config.voting_floor };
        AggregatedConfidence::from_readings(
            value,
            AggregationStrategy::Voting,
            readings,
            format!("Voting: {confident}/{} agents confident", readings.len()),
        )
    }

    fn adaptive(&self, readings: &[AgentConfidence]) -> AggregatedConfidence {
        let candidates = [
            self.weighted(readings),
            minimum(readings),
            self.bayesian(readings),
        ];
        let (sum, total) = candidates.iter().fold((0.0, 0.0), |(sum, total), c| {
            let w = self.performance(c.strategy_used);
            (sum + c.final_confidence * w, total + w)
        });
        let value = if total > 0.0 { sum / total } else { 0.0 };
        AggregatedConfidence::from_readings(
            value,
            AggregationStrategy::Adaptive,
            readings,
            "Adaptive: strategies blended by past performance",
        )
    }

    /// Records whether a strategy's result turned out right.
    pub fn update_strategy_performance(&mut self, strategy: AggregationStrategy, success: bool) {
        let alpha = self.config.learning_rate;
        let current = self.performance.entry(strategy).or_insert(1.0);
        if success {
            *current += alpha * (1.0 - *current);
        } else {
            *current -= alpha * *current;
        }
    }

    /// Historical performance of a strategy, 1.0 until updated.
    #[must_use]
    pub fn performance(&self, strategy: AggregationStrategy) -> f64 {
        self.performance.get(&strategy).copied().unwrap_or(1.0)
    }

    /// Human-readable breakdown of a result.
    #[must_use]
    pub fn explain(&self, result: &AggregatedConfidence) -> String {
        let mut out = format!(
            "Confidence analysis ({} strategy):\nFinal confidence: {:.2}%\n\nAgent contributions:\n",
            result.strategy_used,
            result.final_confidence * 100.0
        );
        for (agent, confidence) in &result.breakdown {
            out.push_str(&format!("  {agent}: {:.2}%\n", confidence * 100.0));
        }
        if result.requires_disambiguation {
            out.push_str("\nDisambiguation required: confidence too low or conflicting\n");
        } else if result.auto_resolve_eligible {
            out.push_str("\nAuto-resolution eligible\n");
        }
        out.push_str("Reasoning: ");
        out.push_str(&result.explanation);
        out
    }

    /// Thresholds in effect.
    #[must_use]
    pub const fn config(&self) -> &AggregatorConfig {
        &self.config
    }
}

fn minimum(readings: &[AgentConfidence]) -> AggregatedConfidence {
    let lowest = readings
        .iter()
        .min_by(|a, b| a.confidence.total_cmp(&b.confidence));
    let (value, explanation) = lowest.map_or((0.0, String::new()), |r| {
        (
            r.confidence,
            format!(
                "Conservative: minimum from {} due to {}",
                r.agent_id,
                r.uncertainty_reason.as_deref().unwrap_or("uncertainty")
            ),
        )
    });
    AggregatedConfidence::from_readings(value, AggregationStrategy::Minimum, readings, explanation)
}

/// Mean and population standard deviation of the readings.
#[allow(clippy::cast_precision_loss)]
fn spread(readings: &[AgentConfidence]) -> (f64, f64) {
    let n = readings.len() as f64;
    let mean = readings.iter().map(|r| r.confidence).sum::<f64>() / n;
    let variance = readings
        .iter()
        .map(|r| (r.confidence - mean).powi(2))
        .sum::<f64>()
        / n;
    (mean, variance.sqrt())
}
