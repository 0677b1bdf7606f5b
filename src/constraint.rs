//! Constraint types: the unit of reconciliation.
//!
//! A constraint is a requirement identifier (e.g. `CNST_POWER_MAX_10W`) with a
//! strength tier, a write timestamp, the agent that proposed it, and that
//! agent's confidence. The store keeps at most one live constraint per id.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ValidationError;
use crate::value::ConstraintValue;

/// Identifier of a constraint in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConstraintId(String);

impl ConstraintId {
    /// Creates an id. The string is used verbatim.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConstraintId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConstraintId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ConstraintId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Identifier of a candidate use case (application profile).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UseCaseId(String);

impl UseCaseId {
    /// Creates an id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UseCaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UseCaseId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for UseCaseId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Priority tier of a constraint.
///
/// The order is explicit: `Recommended < Mandatory`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strength {
    /// Nice to have; loses to a mandatory partner.
    Recommended,
    /// Must hold.
    Mandatory,
}

impl Strength {
    const fn rank(self) -> u8 {
        match self {
            Self::Recommended => 0,
            Self::Mandatory => 1,
        }
    }

    /// Parses a strength from its name or the legacy numeric score
    /// (`10` mandatory, `4` recommended).
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::UnknownStrength` for anything else.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "mandatory" | "10" => Ok(Self::Mandatory),
            "recommended" | "4" => Ok(Self::Recommended),
            _ => Err(ValidationError::UnknownStrength {
                raw: raw.to_string(),
            }),
        }
    }

    /// Returns true for `Mandatory`.
    #[must_use]
    pub const fn is_mandatory(self) -> bool {
        matches!(self, Self::Mandatory)
    }
}

impl Default for Strength {
    fn default() -> Self {
        Self::Mandatory
    }
}

impl PartialOrd for Strength {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Strength {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl fmt::Display for Strength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Recommended => write!(f, "recommended"),
            Self::Mandatory => write!(f, "mandatory"),
        }
    }
}

impl<'de> Deserialize<'de> for Strength {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Name(String),
            Score(i64),
        }

        let raw = match Raw::deserialize(deserializer)? {
            Raw::Name(s) => s,
            Raw::Score(n) => n.to_string(),
        };
        Strength::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// A requirement proposed by an agent.
///
/// Equality and hashing use `id` only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Constraint {
    /// Catalog identifier.
    pub id: ConstraintId,

    /// Optional payload.
    #[serde(default)]
    pub value: ConstraintValue,

    /// Priority tier.
    pub strength: Strength,

    /// When the constraint was written. Drives LWW and the recency rule.
    pub timestamp: DateTime<Utc>,

    /// Agent that proposed it.
    pub source_agent: String,

    /// Agent confidence in [0.0, 1.0].
    pub confidence: f32,
}

impl Constraint {
    /// Starts a builder for the given id.
    pub fn builder(id: impl Into<ConstraintId>) -> ConstraintBuilder {
        ConstraintBuilder::new(id)
    }
}

impl PartialEq for Constraint {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Constraint {}

impl std::hash::Hash for Constraint {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Builder for [`Constraint`].
///
/// Defaults: `Mandatory`, confidence 1.0, timestamp now, null value,
/// source agent `"unknown"`.
#[derive(Debug)]
pub struct ConstraintBuilder {
    id: ConstraintId,
    value: ConstraintValue,
    strength: Strength,
    timestamp: Option<DateTime<Utc>>,
    source_agent: String,
    confidence: f32,
}

impl ConstraintBuilder {
    /// Creates a builder.
    #[must_use]
    pub fn new(id: impl Into<ConstraintId>) -> Self {
        Self {
            id: id.into(),
            value: ConstraintValue::Null,
            strength: Strength::Mandatory,
            timestamp: None,
            source_agent: "unknown".to_string(),
            confidence: 1.0,
        }
    }

    /// Sets the payload.
    #[must_use]
    pub fn value(mut self, value: impl Into<ConstraintValue>) -> Self {
        self.value = value.into();
        self
    }

    /// Sets the strength tier.
    #[must_use]
    pub fn strength(mut self, strength: Strength) -> Self {
        self.strength = strength;
        self
    }

    /// Sets the write timestamp.
    #[must_use]
    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Sets the proposing agent.
    #[must_use]
    pub fn source_agent(mut self, agent: impl Into<String>) -> Self {
        self.source_agent = agent.into();
        self
    }

    /// Sets the agent confidence.
    #[must_use]
    pub fn confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }

    /// Builds the constraint.
    ///
    /// # Errors
    ///
    /// Returns a `ValidationError` for an empty id or a confidence outside
    /// [0.0, 1.0] (NaN included).
    pub fn build(self) -> Result<Constraint, ValidationError> {
        if self.id.as_str().trim().is_empty() {
            return Err(ValidationError::EmptyIdentifier {
                field: "id".to_string(),
            });
        }
        validate_confidence(self.confidence)?;
        Ok(Constraint {
            id: self.id,
            value: self.value,
            strength: self.strength,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            source_agent: self.source_agent,
            confidence: self.confidence,
        })
    }
}

/// Checks that a confidence is a finite value in [0.0, 1.0].
///
/// # Errors
///
/// Returns `ValidationError::ConfidenceOutOfRange` otherwise.
pub fn validate_confidence(value: f32) -> Result<(), ValidationError> {
    if value.is_nan() || !(0.0..=1.0).contains(&value) {
        return Err(ValidationError::ConfidenceOutOfRange { value });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strength_total_order() {
        assert!(Strength::Mandatory > Strength::Recommended);
        let mut tiers = vec![Strength::Mandatory, Strength::Recommended, Strength::Mandatory];
        tiers.sort();
        assert_eq!(tiers[0], Strength::Recommended);
    }

    #[test]
    fn strength_accepts_legacy_scores() {
        let s: Strength = serde_json::from_str("10").unwrap();
        assert_eq!(s, Strength::Mandatory);
        let s: Strength = serde_json::from_str("4").unwrap();
        assert_eq!(s, Strength::Recommended);
        let s: Strength = serde_json::from_str("\"MANDATORY\"").unwrap();
        assert_eq!(s, Strength::Mandatory);
        assert!(serde_json::from_str::<Strength>("7").is_err());
    }

    #[test]
    fn builder_defaults() {
        let c = Constraint::builder("CNST_FANLESS").build().unwrap();
        assert_eq!(c.strength, Strength::Mandatory);
        assert!((c.confidence - 1.0).abs() < f32::EPSILON);
        assert!(c.value.is_null());
    }

    #[test]
    fn builder_rejects_bad_confidence() {
        let err = Constraint::builder("CNST_FANLESS")
            .confidence(1.2)
            .build()
            .unwrap_err();
        assert!(matches!(err, ValidationError::ConfidenceOutOfRange { .. }));
        assert!(Constraint::builder("x").confidence(f32::NAN).build().is_err());
    }

    #[test]
    fn builder_rejects_empty_id() {
        let err = Constraint::builder("  ").build().unwrap_err();
        assert!(matches!(err, ValidationError::EmptyIdentifier { .. }));
    }

    #[test]
    fn equality_is_by_id() {
        let a = Constraint::builder("CNST_WIFI").confidence(0.2).build().unwrap();
        let b = Constraint::builder("CNST_WIFI").confidence(0.9).build().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn serialization_roundtrip_keeps_fields() {
        let c = Constraint::builder("CNST_POWER_MAX_10W")
            .value(10_i64)
            .strength(Strength::Recommended)
            .source_agent("elicitor")
            .confidence(0.8)
            .build()
            .unwrap();
        let json = serde_json::to_string(&c).unwrap();
        assert!(json.contains("\"recommended\""));
        let back: Constraint = serde_json::from_str(&json).unwrap();
        assert_eq!(back.value, ConstraintValue::Int(10));
        assert_eq!(back.source_agent, "elicitor");
    }
}
