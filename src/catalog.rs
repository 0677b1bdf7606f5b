//! Constraint catalog: use cases, mutex rules, constraint definitions and
//! relationship edges.
//!
//! The catalog is plain JSON. A missing or malformed file is not fatal:
//! [`Catalog::load_or_default`] logs a warning and returns the built-in
//! catalog so a session can still run in degraded mode.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::constraint::{ConstraintId, UseCaseId};
use crate::error::CatalogError;

/// Prior used for a use case that neither declares one nor appears in the
/// frequency table.
pub const DEFAULT_PRIOR: f64 = 0.05;

/// A candidate application profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UseCaseDef {
    /// Display name. Also drives indicator derivation.
    pub name: String,

    /// Prior probability. Falls back to [`default_prior`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prior: Option<f64>,

    /// Tokens that strongly suggest this use case.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strong_indicators: Option<Vec<String>>,

    /// Tokens that weakly suggest this use case.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weak_indicators: Option<Vec<String>>,
}

impl UseCaseDef {
    /// Creates a definition with derived prior and indicators.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prior: None,
            strong_indicators: None,
            weak_indicators: None,
        }
    }

    /// Returns the strong and weak indicator lists, lowercased. Missing
    /// lists are derived from the name.
    #[must_use]
    pub fn indicators(&self) -> (Vec<String>, Vec<String>) {
        let (derived_strong, derived_weak) = derived_indicators(&self.name);
        let lower = |v: &Vec<String>| -> Vec<String> {
            v.iter().map(|s| s.trim().to_lowercase()).collect()
        };
        (
            self.strong_indicators.as_ref().map_or(derived_strong, lower),
            self.weak_indicators.as_ref().map_or(derived_weak, lower),
        )
    }
}

/// One mutex rule inside a category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutexRule {
    /// First side of the pair.
    pub constraint_a: ConstraintId,
    /// Second side of the pair.
    pub constraint_b: ConstraintId,
    /// Free-form hint on how to settle the pair.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
}

/// Static definition of a constraint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConstraintDef {
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Grouping used to suggest alternatives.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Upper threshold, if the constraint caps a quantity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value: Option<f64>,
    /// Lower threshold, if the constraint floors a quantity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_value: Option<f64>,
}

/// Directed relationship edges plus extra mutex pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationships {
    /// `a` cannot be satisfied without each target.
    #[serde(default)]
    pub requires: BTreeMap<ConstraintId, Vec<ConstraintId>>,

    /// `a` brings each target along.
    #[serde(default)]
    pub implies: BTreeMap<ConstraintId, Vec<ConstraintId>>,

    /// `a` restricts each target. Used for hints only.
    #[serde(default)]
    pub limits: BTreeMap<ConstraintId, Vec<ConstraintId>>,

    /// Soft conflicts. Informational.
    #[serde(default)]
    pub conflicts: BTreeMap<ConstraintId, Vec<ConstraintId>>,

    /// `a` works better alongside each target. Informational.
    #[serde(default)]
    pub enhances: BTreeMap<ConstraintId, Vec<ConstraintId>>,

    /// Mutex pairs declared outside any category.
    #[serde(default, alias = "MUTEX_pairs")]
    pub mutex_pairs: Vec<(ConstraintId, ConstraintId)>,
}

/// The full catalog.
///
/// # Examples
///
/// ```
/// use reconcile::catalog::Catalog;
///
/// let catalog = Catalog::from_json(r#"{
///     "use_cases": {"UC3": {"name": "Industrial Automation"}},
///     "mutex_constraints": {
///         "cooling": [{"constraint_a": "CNST_FANLESS", "constraint_b": "CNST_GPU_REQUIRED"}]
///     }
/// }"#).unwrap();
/// assert_eq!(catalog.mutex_pairs().len(), 1);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    /// Candidate use cases.
    #[serde(default)]
    pub use_cases: BTreeMap<UseCaseId, UseCaseDef>,

    /// Mutex rules grouped by category.
    #[serde(default)]
    pub mutex_constraints: BTreeMap<String, Vec<MutexRule>>,

    /// Constraint definitions.
    #[serde(default)]
    pub constraints: BTreeMap<ConstraintId, ConstraintDef>,

    /// Relationship edges.
    #[serde(default, alias = "constraint_relationships")]
    pub relationships: Relationships,
}

impl Catalog {
    /// Parses and validates a catalog.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::Parse` for malformed JSON and
    /// `CatalogError::Invalid` for semantic problems.
    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let catalog: Self = serde_json::from_str(json)?;
        catalog.validate()?;
        Ok(catalog)
    }

    /// Reads a catalog file.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::Io` if the file cannot be read, otherwise as
    /// [`Catalog::from_json`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    /// Reads a catalog file, falling back to [`Catalog::builtin`] on any
    /// error.
    #[must_use]
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match Self::load(path) {
            Ok(catalog) => catalog,
            Err(error) => {
                warn!(
                    path = %path.display(),
                    %error,
                    "catalog unavailable; degraded mode with built-in catalog"
                );
                Self::builtin()
            }
        }
    }

    fn validate(&self) -> Result<(), CatalogError> {
        for (a, b) in self.mutex_pairs() {
            if a == b {
                return Err(CatalogError::Invalid {
                    reason: format!("constraint {a} is declared mutex with itself"),
                });
            }
        }
        for (id, uc) in &self.use_cases {
            if let Some(prior) = uc.prior {
                if !(0.0..=1.0).contains(&prior) {
                    return Err(CatalogError::Invalid {
                        reason: format!("prior {prior} of use case {id} is outside [0, 1]"),
                    });
                }
            }
        }
        Ok(())
    }

    /// Returns every mutex pair once, in catalog order: category rules
    /// first (categories sorted by name), then `relationships.mutex_pairs`.
    #[must_use]
    pub fn mutex_pairs(&self) -> Vec<(ConstraintId, ConstraintId)> {
        let mut seen = HashSet::new();
        let category_pairs = self
            .mutex_constraints
            .values()
            .flatten()
            .map(|rule| (&rule.constraint_a, &rule.constraint_b));
        let extra_pairs = self.relationships.mutex_pairs.iter().map(|(a, b)| (a, b));

        category_pairs
            .chain(extra_pairs)
            .filter(|&(a, b)| seen.insert(canonical(a, b)))
            .map(|(a, b)| (a.clone(), b.clone()))
            .collect()
    }

    /// Returns the prior for a use case: declared, else from the table.
    #[must_use]
    pub fn prior(&self, id: &UseCaseId) -> f64 {
        self.use_cases
            .get(id)
            .and_then(|uc| uc.prior)
            .unwrap_or_else(|| default_prior(id))
    }

    /// Returns the category of a constraint, `"general"` if undeclared.
    #[must_use]
    pub fn category(&self, id: &ConstraintId) -> &str {
        self.constraints
            .get(id)
            .and_then(|def| def.category.as_deref())
            .unwrap_or("general")
    }

    /// The built-in catalog used when no file is available.
    #[must_use]
    pub fn builtin() -> Self {
        let mut catalog = Self::default();

        for (id, name) in [
            ("UC3", "Industrial Automation"),
            ("UC5", "Motion Control"),
            ("UC6", "Water Treatment"),
        ] {
            catalog
                .use_cases
                .insert(UseCaseId::new(id), UseCaseDef::named(name));
        }

        let rules: [(&str, &[(&str, &str)]); 4] = [
            (
                "power_performance",
                &[
                    ("CNST_POWER_MAX_10W", "CNST_PROCESSOR_MIN_I7"),
                    ("CNST_POWER_MAX_10W", "CNST_GPU_REQUIRED"),
                    ("CNST_FANLESS", "CNST_GPU_REQUIRED"),
                    ("CNST_BATTERY_POWERED", "CNST_HIGH_COMPUTE"),
                ],
            ),
            (
                "form_factor",
                &[
                    ("CNST_COMPACT_FORM", "CNST_DIGITAL_IO_MIN_64"),
                    ("CNST_COMPACT_FORM", "CNST_DIGITAL_IO_MIN_128"),
                ],
            ),
            (
                "environment",
                &[
                    ("CNST_INDOOR_USE", "CNST_IP69K"),
                    ("CNST_PRECISION_TEMP", "CNST_HARSH_ENV"),
                ],
            ),
            (
                "latency_connectivity",
                &[("CNST_LATENCY_MAX_1MS", "CNST_WIFI")],
            ),
        ];
        for (category, pairs) in rules {
            let entries = pairs
                .iter()
                .map(|(a, b)| MutexRule {
                    constraint_a: ConstraintId::new(*a),
                    constraint_b: ConstraintId::new(*b),
                    resolution: None,
                })
                .collect();
            catalog
                .mutex_constraints
                .insert(category.to_string(), entries);
        }

        let definitions: [(&str, &[&str]); 8] = [
            (
                "power",
                &[
                    "CNST_POWER_MAX_10W",
                    "CNST_POWER_MAX_20W",
                    "CNST_POWER_MIN_35W",
                    "CNST_POWER_MIN_100W",
                    "CNST_BATTERY_POWERED",
                ],
            ),
            (
                "processing",
                &[
                    "CNST_PROCESSOR_MIN_I7",
                    "CNST_GPU_REQUIRED",
                    "CNST_HIGH_COMPUTE",
                    "CNST_MEMORY_MIN_8GB",
                    "CNST_PERFORMANCE_LIMITED",
                ],
            ),
            ("cooling", &["CNST_FANLESS", "CNST_COOLING_ACTIVE"]),
            (
                "form_factor",
                &["CNST_COMPACT_FORM", "CNST_MODULAR", "CNST_LARGE_FORM"],
            ),
            (
                "io",
                &[
                    "CNST_DIGITAL_IO_MIN_64",
                    "CNST_DIGITAL_IO_MIN_128",
                    "CNST_EXPANSION_SLOTS",
                    "CNST_IO_LIMITED",
                ],
            ),
            (
                "environment",
                &[
                    "CNST_INDOOR_USE",
                    "CNST_OUTDOOR",
                    "CNST_IP69K",
                    "CNST_HARSH_ENV",
                    "CNST_PRECISION_TEMP",
                    "CNST_TEMP_EXTENDED",
                    "CNST_WEATHER_RESISTANT",
                ],
            ),
            (
                "connectivity",
                &["CNST_WIFI", "CNST_ETHERNET", "CNST_LATENCY_MAX_1MS"],
            ),
            (
                "realtime",
                &["CNST_REALTIME_1MS", "CNST_RTOS", "CNST_DETERMINISTIC"],
            ),
        ];
        for (category, ids) in definitions {
            for id in ids {
                catalog.constraints.insert(
                    ConstraintId::new(*id),
                    ConstraintDef {
                        name: None,
                        category: Some(category.to_string()),
                        max_value: None,
                        min_value: None,
                    },
                );
            }
        }

        catalog.relationships.requires = edge_table(&[
            (
                "CNST_GPU_REQUIRED",
                &["CNST_COOLING_ACTIVE", "CNST_POWER_MIN_100W"],
            ),
            (
                "CNST_PROCESSOR_MIN_I7",
                &["CNST_MEMORY_MIN_8GB", "CNST_POWER_MIN_35W"],
            ),
            (
                "CNST_DIGITAL_IO_MIN_128",
                &["CNST_EXPANSION_SLOTS", "CNST_LARGE_FORM"],
            ),
            ("CNST_REALTIME_1MS", &["CNST_RTOS", "CNST_DETERMINISTIC"]),
            (
                "CNST_IP69K",
                &["CNST_SEALED_ENCLOSURE", "CNST_INDUSTRIAL_CONNECTORS"],
            ),
        ]);
        catalog.relationships.implies = edge_table(&[
            (
                "CNST_OUTDOOR",
                &["CNST_WEATHER_RESISTANT", "CNST_TEMP_EXTENDED"],
            ),
            (
                "CNST_MEDICAL",
                &["CNST_SAFETY_CERTIFIED", "CNST_EMC_COMPLIANT"],
            ),
            (
                "CNST_AUTOMOTIVE",
                &["CNST_VIBRATION_RESISTANT", "CNST_TEMP_AUTOMOTIVE"],
            ),
        ]);
        catalog.relationships.limits = edge_table(&[
            ("CNST_BUDGET_1000", &["CNST_FEATURES_BASIC"]),
            ("CNST_COMPACT_FORM", &["CNST_IO_LIMITED"]),
            ("CNST_BATTERY_POWERED", &["CNST_PERFORMANCE_LIMITED"]),
        ]);

        catalog
    }
}

fn edge_table(table: &[(&str, &[&str])]) -> BTreeMap<ConstraintId, Vec<ConstraintId>> {
    table
        .iter()
        .map(|(from, to)| {
            (
                ConstraintId::new(*from),
                to.iter().map(|t| ConstraintId::new(*t)).collect(),
            )
        })
        .collect()
}

/// Orders a pair so `(a, b)` and `(b, a)` compare equal.
#[must_use]
pub fn canonical<'a>(a: &'a ConstraintId, b: &'a ConstraintId) -> (&'a ConstraintId, &'a ConstraintId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Prior from the use-case frequency table.
#[must_use]
pub fn default_prior(id: &UseCaseId) -> f64 {
    match id.as_str() {
        "UC3" => 0.25,
        "UC5" => 0.15,
        "UC6" => 0.12,
        "UC2" => 0.10,
        "UC7" | "UC12" => 0.08,
        _ => DEFAULT_PRIOR,
    }
}

/// Derives strong and weak indicators from keyword families in a use-case
/// name.
#[must_use]
pub fn derived_indicators(name: &str) -> (Vec<String>, Vec<String>) {
    const FAMILIES: [(&str, &[&str], &[&str]); 4] = [
        (
            "industrial",
            &["plc", "scada", "industrial"],
            &["control", "automation"],
        ),
        (
            "solar",
            &["solar", "photovoltaic", "mppt"],
            &["energy", "power"],
        ),
        (
            "motion",
            &["servo", "motion", "trajectory"],
            &["motor", "position"],
        ),
        (
            "water",
            &["pump", "flow", "ph", "treatment"],
            &["water", "tank"],
        ),
    ];

    let name = name.to_lowercase();
    let mut strong = Vec::new();
    let mut weak = Vec::new();
    for (keyword, family_strong, family_weak) in FAMILIES {
        if name.contains(keyword) {
            strong.extend(family_strong.iter().map(|s| (*s).to_string()));
            weak.extend(family_weak.iter().map(|s| (*s).to_string()));
        }
    }
    (strong, weak)
}
