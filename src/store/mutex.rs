use std::collections::{HashMap, HashSet};

use crate::catalog::Catalog;
use crate::constraint::ConstraintId;

/// Symmetric mutex lookup used by the store.
///
/// Partners are kept in catalog order so that, when several partners of a
/// new constraint are present, the same one is always picked first.
#[derive(Debug, Clone, Default)]
pub struct MutexTable {
    partners: HashMap<ConstraintId, Vec<ConstraintId>>,
    pairs: HashSet<(ConstraintId, ConstraintId)>,
}

impl MutexTable {
    /// Builds the table from ordered pairs. Duplicates and reversed
    /// duplicates collapse.
    #[must_use]
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (ConstraintId, ConstraintId)>,
    {
        let mut table = Self::default();
        for (a, b) in pairs {
            if a == b {
                continue;
            }
            let key = if a <= b {
                (a.clone(), b.clone())
            } else {
                (b.clone(), a.clone())
            };
            if !table.pairs.insert(key) {
                continue;
            }
            table.partners.entry(a.clone()).or_default().push(b.clone());
            table.partners.entry(b).or_default().push(a);
        }
        table
    }

    /// Builds the table from every mutex pair the catalog declares.
    #[must_use]
    pub fn from_catalog(catalog: &Catalog) -> Self {
        Self::from_pairs(catalog.mutex_pairs())
    }

    /// Returns true if `a` and `b` are mutually exclusive.
    #[must_use]
    pub fn is_mutex(&self, a: &ConstraintId, b: &ConstraintId) -> bool {
        let key = if a <= b {
            (a.clone(), b.clone())
        } else {
            (b.clone(), a.clone())
        };
        self.pairs.contains(&key)
    }

    /// Returns the partners of `id`, in catalog order.
    #[must_use]
    pub fn partners(&self, id: &ConstraintId) -> &[ConstraintId] {
        self.partners.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Returns the first partner of `id` for which `present` holds.
    pub fn first_present<F>(&self, id: &ConstraintId, present: F) -> Option<&ConstraintId>
    where
        F: Fn(&ConstraintId) -> bool,
    {
        self.partners(id).iter().find(|p| present(p))
    }

    /// Number of distinct pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Returns true if no pairs are declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> ConstraintId {
        ConstraintId::new(s)
    }

    #[test]
    fn symmetric_lookup() {
        let table = MutexTable::from_pairs([(id("A"), id("B"))]);
        assert!(table.is_mutex(&id("A"), &id("B")));
        assert!(table.is_mutex(&id("B"), &id("A")));
        assert!(!table.is_mutex(&id("A"), &id("C")));
    }

    #[test]
    fn partners_keep_catalog_order() {
        let table = MutexTable::from_pairs([
            (id("P10W"), id("I7")),
            (id("P10W"), id("GPU")),
            (id("GPU"), id("P10W")),
        ]);
        assert_eq!(table.partners(&id("P10W")), &[id("I7"), id("GPU")]);
        assert_eq!(table.len(), 2);

        let first = table.first_present(&id("P10W"), |p| p.as_str() == "GPU");
        assert_eq!(first, Some(&id("GPU")));
        assert!(table.first_present(&id("X"), |_| true).is_none());
    }

    #[test]
    fn self_pairs_are_ignored() {
        let table = MutexTable::from_pairs([(id("A"), id("A"))]);
        assert!(table.is_empty());
    }

    #[test]
    fn builtin_catalog_table() {
        let table = MutexTable::from_catalog(&Catalog::builtin());
        assert!(table.is_mutex(&id("CNST_WIFI"), &id("CNST_LATENCY_MAX_1MS")));
        assert_eq!(table.len(), 9);
    }
}
