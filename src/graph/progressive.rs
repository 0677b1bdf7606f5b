//! Accumulation conflict detection.
//!
//! The scan is order-sensitive: it reports the first conflict exposed while
//! walking the sequence left to right, so two orderings of the same final set
//! can yield different verdicts.

use std::collections::BTreeSet;

use crate::conflict::{ConflictKind, ConflictPath};
use crate::constraint::ConstraintId;
use crate::graph::DependencyGraph;

const COMPACT_FORM: &str = "CNST_COMPACT_FORM";
const MODULAR: &str = "CNST_MODULAR";
const IO_64: &str = "CNST_DIGITAL_IO_MIN_64";
const IO_128: &str = "CNST_DIGITAL_IO_MIN_128";
const POWER_10W: &str = "CNST_POWER_MAX_10W";
const POWER_20W: &str = "CNST_POWER_MAX_20W";
const GPU: &str = "CNST_GPU_REQUIRED";
const I7: &str = "CNST_PROCESSOR_MIN_I7";

const SPACE_IDS: [&str; 4] = [COMPACT_FORM, MODULAR, IO_64, IO_128];
const POWER_IDS: [&str; 4] = [POWER_10W, POWER_20W, GPU, I7];

impl DependencyGraph {
    /// Scans `sequence` in order and returns the first accumulation
    /// conflict, if any.
    ///
    /// For each new id the checks run in this order: direct mutex against an
    /// accumulated id, mutex between requirement closures, then the
    /// space/power threshold rules over the accumulated set plus the new id.
    ///
    /// # Examples
    ///
    /// ```
    /// use reconcile::catalog::Catalog;
    /// use reconcile::constraint::ConstraintId;
    /// use reconcile::graph::DependencyGraph;
    ///
    /// let graph = DependencyGraph::from_catalog(&Catalog::builtin());
    /// let seq: Vec<ConstraintId> = ["CNST_COMPACT_FORM", "CNST_MODULAR", "CNST_DIGITAL_IO_MIN_128"]
    ///     .into_iter()
    ///     .map(ConstraintId::new)
    ///     .collect();
    /// let conflict = graph.detect_progressive_conflict(&seq).unwrap();
    /// assert!(conflict.involves(&ConstraintId::new("CNST_COMPACT_FORM")));
    /// ```
    #[must_use]
    pub fn detect_progressive_conflict(&self, sequence: &[ConstraintId]) -> Option<ConflictPath> {
        if sequence.len() < 2 {
            return None;
        }

        let mut accumulated: Vec<ConstraintId> = Vec::with_capacity(sequence.len());
        for (i, new) in sequence.iter().enumerate() {
            if accumulated.contains(new) {
                continue;
            }
            let path = &sequence[..=i];

            if let Some(conflict) = self.direct_mutex(&accumulated, new, path) {
                return Some(conflict);
            }
            if let Some(conflict) = self.closure_conflict(&accumulated, new, path) {
                return Some(conflict);
            }

            accumulated.push(new.clone());
            if let Some(conflict) = threshold_violation(&accumulated) {
                return Some(conflict);
            }
        }
        None
    }

    fn direct_mutex(
        &self,
        accumulated: &[ConstraintId],
        new: &ConstraintId,
        path: &[ConstraintId],
    ) -> Option<ConflictPath> {
        let existing = accumulated.iter().find(|c| self.is_mutex(c, new))?;
        Some(
            ConflictPath::new(
                ConflictKind::DirectMutex,
                vec![existing.clone(), new.clone()],
                path.to_vec(),
                1.0,
                format!("{new} conflicts with previously set {existing}"),
            )
            .with_hints([
                format!("Remove {existing} to allow {new}"),
                format!("Skip {new} to keep {existing}"),
                "Find alternative that satisfies both needs".to_string(),
            ]),
        )
    }

    fn closure_conflict(
        &self,
        accumulated: &[ConstraintId],
        new: &ConstraintId,
        path: &[ConstraintId],
    ) -> Option<ConflictPath> {
        if accumulated.is_empty() {
            return None;
        }
        let new_closure = self.requirement_closure(new);
        let accumulated_closure: BTreeSet<ConstraintId> = accumulated
            .iter()
            .flat_map(|c| self.requirement_closure(c))
            .collect();

        for new_req in &new_closure {
            for acc_req in &accumulated_closure {
                if !self.is_mutex(new_req, acc_req) {
                    continue;
                }
                let mut participants = vec![new.clone()];
                participants.extend(accumulated.iter().cloned());
                return Some(
                    ConflictPath::new(
                        ConflictKind::TransitiveConflict,
                        participants,
                        path.to_vec(),
                        0.8,
                        format!("{new} requires {new_req} which conflicts with {acc_req}"),
                    )
                    .with_hints([
                        format!("Choose between {new} and constraints requiring {acc_req}"),
                        "Consider partial implementation".to_string(),
                        "Look for alternative solutions".to_string(),
                    ]),
                );
            }
        }
        None
    }
}

/// Applies the space and power threshold rules to a set of ids.
///
/// Rules fire on co-occurrence regardless of the mutex table. Participants
/// and path are the sorted members of the rule's id family that are present.
#[must_use]
pub fn threshold_violation(active: &[ConstraintId]) -> Option<ConflictPath> {
    let has = |id: &str| active.iter().any(|c| c.as_str() == id);
    let present = |family: &[&str]| -> Vec<ConstraintId> {
        let set: BTreeSet<&ConstraintId> = active
            .iter()
            .filter(|c| family.iter().any(|f| *f == c.as_str()))
            .collect();
        set.into_iter().cloned().collect()
    };

    if has(COMPACT_FORM) && has(IO_128) {
        let ids = present(&SPACE_IDS[..]);
        return Some(
            ConflictPath::new(
                ConflictKind::SpaceViolation,
                ids.clone(),
                ids,
                0.9,
                "Compact form factor cannot physically accommodate 128+ I/O points",
            )
            .with_hints([
                "Use larger form factor",
                "Reduce I/O count",
                "Use distributed I/O modules",
            ]),
        );
    }

    if has(COMPACT_FORM) && has(MODULAR) && has(IO_64) {
        let ids = present(&SPACE_IDS[..]);
        return Some(
            ConflictPath::new(
                ConflictKind::SpaceWarning,
                ids.clone(),
                ids,
                0.6,
                "Compact modular design with 64+ I/O will be challenging",
            )
            .with_hints([
                "Consider stackable modules",
                "Use high-density connectors",
            ]),
        );
    }

    if has(POWER_10W) && (has(GPU) || has(I7)) {
        let ids = present(&POWER_IDS[..]);
        return Some(
            ConflictPath::new(
                ConflictKind::PowerViolation,
                ids.clone(),
                ids,
                1.0,
                "10W power budget insufficient for high-performance components",
            )
            .with_hints([
                "Increase power budget",
                "Use low-power alternatives",
                "Consider edge AI accelerators",
            ]),
        );
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;

    fn ids(list: &[&str]) -> Vec<ConstraintId> {
        list.iter().map(|s| ConstraintId::new(*s)).collect()
    }

    fn graph() -> DependencyGraph {
        DependencyGraph::from_catalog(&Catalog::builtin())
    }

    #[test]
    fn short_sequences_have_no_conflict() {
        let g = graph();
        assert!(g.detect_progressive_conflict(&[]).is_none());
        assert!(g.detect_progressive_conflict(&ids(&[COMPACT_FORM])).is_none());
    }

    #[test]
    fn compact_modular_then_128_io() {
        let g = graph();
        let conflict = g
            .detect_progressive_conflict(&ids(&[COMPACT_FORM, MODULAR, IO_128]))
            .unwrap();
        assert_eq!(conflict.conflict_type, ConflictKind::DirectMutex);
        assert!(conflict.involves(&ConstraintId::new(COMPACT_FORM)));
        assert!(conflict.involves(&ConstraintId::new(IO_128)));
        assert_eq!(conflict.path.len(), 3);
        assert_eq!(conflict.resolution_hints.len(), 3);
        assert!((conflict.severity - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn threshold_rule_fires_without_mutex_table() {
        let g = DependencyGraph::from_catalog(&Catalog::default());
        let conflict = g
            .detect_progressive_conflict(&ids(&[IO_128, "CNST_WIFI", COMPACT_FORM]))
            .unwrap();
        assert_eq!(conflict.conflict_type, ConflictKind::SpaceViolation);
        assert_eq!(conflict.participants, ids(&[COMPACT_FORM, IO_128]));
        assert!((conflict.severity - 0.9).abs() < f32::EPSILON);
    }

    #[test]
    fn space_warning_and_power_violation() {
        let empty = DependencyGraph::from_catalog(&Catalog::default());
        let warning = empty
            .detect_progressive_conflict(&ids(&[COMPACT_FORM, MODULAR, IO_64]))
            .unwrap();
        assert_eq!(warning.conflict_type, ConflictKind::SpaceWarning);
        assert!(!warning.conflict_type.is_violation());

        let power = empty
            .detect_progressive_conflict(&ids(&[POWER_10W, I7]))
            .unwrap();
        assert_eq!(power.conflict_type, ConflictKind::PowerViolation);
        assert_eq!(power.participants, ids(&[POWER_10W, I7]));
    }

    #[test]
    fn closure_collision_is_transitive() {
        let catalog = Catalog::from_json(
            r#"{"relationships": {
                "requires": {"CNST_VISION": ["CNST_GPU_REQUIRED"], "CNST_SILENT": ["CNST_FANLESS"]},
                "mutex_pairs": [["CNST_GPU_REQUIRED", "CNST_FANLESS"]]
            }}"#,
        )
        .unwrap();
        let g = DependencyGraph::from_catalog(&catalog);
        let conflict = g
            .detect_progressive_conflict(&ids(&["CNST_SILENT", "CNST_VISION"]))
            .unwrap();
        assert_eq!(conflict.conflict_type, ConflictKind::TransitiveConflict);
        assert_eq!(conflict.participants, ids(&["CNST_VISION", "CNST_SILENT"]));
        assert_eq!(
            conflict.explanation,
            "CNST_VISION requires CNST_GPU_REQUIRED which conflicts with CNST_FANLESS"
        );
    }

    #[test]
    fn verdict_depends_on_order() {
        let g = graph();
        let forward = g
            .detect_progressive_conflict(&ids(&[POWER_10W, GPU, COMPACT_FORM, IO_128]))
            .unwrap();
        let backward = g
            .detect_progressive_conflict(&ids(&[IO_128, COMPACT_FORM, GPU, POWER_10W]))
            .unwrap();
        assert!(forward.involves(&ConstraintId::new(POWER_10W)));
        assert!(backward.involves(&ConstraintId::new(IO_128)));
        assert_ne!(forward.participants, backward.participants);
    }
}
