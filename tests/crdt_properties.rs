use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use proptest::prelude::*;

use reconcile::store::{MutexTable, UseCaseBeliefTracker};
use reconcile::{
    AgentConfidence, AggregationContext, BeliefNetwork, Catalog, ConfidenceAggregator,
    Constraint, ConstraintId, ConstraintStore, Strength, UseCaseId,
};

const IDS: [&str; 8] = [
    "CNST_FANLESS",
    "CNST_GPU_REQUIRED",
    "CNST_POWER_MAX_10W",
    "CNST_PROCESSOR_MIN_I7",
    "CNST_COMPACT_FORM",
    "CNST_DIGITAL_IO_MIN_64",
    "CNST_WIFI",
    "CNST_LATENCY_MAX_1MS",
];

const WORDS: [&str; 12] = [
    "plc", "scada", "servo", "pump", "flow", "ph", "tank", "motor", "water", "control",
    "solar", "cabinet",
];

fn base() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap_or_else(|| panic!("bad epoch"))
}

fn strength() -> impl Strategy<Value = Strength> {
    prop_oneof![Just(Strength::Mandatory), Just(Strength::Recommended)]
}

/// Writes over the first `n` ids with distinct timestamps, so LWW has no
/// ties to break.
fn writes_over(n: usize) -> impl Strategy<Value = Vec<Constraint>> {
    prop::collection::vec((0..n, 0.0f32..=1.0, strength()), 1..16).prop_map(|specs| {
        specs
            .into_iter()
            .enumerate()
            .map(|(i, (idx, confidence, strength))| {
                Constraint::builder(IDS[idx])
                    .timestamp(base() + Duration::seconds(i64::try_from(i).unwrap_or(0)))
                    .confidence(confidence)
                    .strength(strength)
                    .source_agent("prop")
                    .build()
                    .unwrap_or_else(|e| panic!("invalid constraint: {e}"))
            })
            .collect()
    })
}

fn writes() -> impl Strategy<Value = Vec<Constraint>> {
    writes_over(IDS.len())
}

fn live(store: &ConstraintStore) -> BTreeMap<ConstraintId, (DateTime<Utc>, f32)> {
    store
        .active_constraints()
        .into_iter()
        .map(|c| (c.id, (c.timestamp, c.confidence)))
        .collect()
}

fn votes() -> impl Strategy<Value = Vec<(usize, usize, f32)>> {
    prop::collection::vec((0..3usize, 0..3usize, 0.0f32..=1.0), 0..24)
}

fn tracker_from(votes: &[(usize, usize, f32)]) -> UseCaseBeliefTracker {
    let mut tracker = UseCaseBeliefTracker::new();
    for (uc, agent, confidence) in votes {
        tracker.vote(
            &UseCaseId::new(format!("UC{uc}")),
            &format!("agent-{agent}"),
            *confidence,
        );
    }
    tracker
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]

    #[test]
    fn lww_converges_regardless_of_delivery_order(
        (ordered, shuffled) in writes().prop_flat_map(|w| (Just(w.clone()), Just(w).prop_shuffle()))
    ) {
        let catalog = Catalog::default();
        let a = ConstraintStore::new("a", &catalog);
        let b = ConstraintStore::new("b", &catalog);
        for c in ordered {
            let _ = a.add(c);
        }
        for c in shuffled {
            let _ = b.add(c);
        }
        prop_assert_eq!(live(&a), live(&b));
    }

    #[test]
    fn store_never_holds_both_sides_of_a_mutex(writes in writes_over(2)) {
        let catalog = Catalog::builtin();
        let store = ConstraintStore::new("m", &catalog);
        for c in writes {
            let _ = store.add(c);
        }
        let table = MutexTable::from_catalog(&catalog);
        let ids: Vec<ConstraintId> = live(&store).into_keys().collect();
        for (i, x) in ids.iter().enumerate() {
            for y in &ids[i + 1..] {
                prop_assert!(!table.is_mutex(x, y), "{} and {} both live", x, y);
            }
        }
    }

    #[test]
    fn mutex_lookup_is_symmetric(a in 0..IDS.len(), b in 0..IDS.len()) {
        let table = MutexTable::from_catalog(&Catalog::builtin());
        let (x, y) = (ConstraintId::new(IDS[a]), ConstraintId::new(IDS[b]));
        prop_assert_eq!(table.is_mutex(&x, &y), table.is_mutex(&y, &x));
    }

    #[test]
    fn vote_cells_never_decrease(votes in votes()) {
        let mut tracker = UseCaseBeliefTracker::new();
        for (uc, agent, confidence) in votes {
            let use_case = UseCaseId::new(format!("UC{uc}"));
            let agent = format!("agent-{agent}");
            let before = tracker.cell(&use_case, &agent).unwrap_or(0.0);
            tracker.vote(&use_case, &agent, confidence);
            let after = tracker.cell(&use_case, &agent).unwrap_or(0.0);
            prop_assert!(after >= before);
        }
    }

    #[test]
    fn vote_merge_is_commutative_and_idempotent(x in votes(), y in votes()) {
        let mut xy = tracker_from(&x);
        xy.merge(tracker_from(&y).cells());
        let mut yx = tracker_from(&y);
        yx.merge(tracker_from(&x).cells());
        prop_assert_eq!(xy.cells(), yx.cells());

        let once = xy.clone();
        xy.merge(once.cells());
        prop_assert_eq!(xy.cells(), once.cells());
    }

    #[test]
    fn posterior_stays_normalized(
        inputs in prop::collection::vec(prop::collection::vec(0..WORDS.len(), 0..6), 1..6)
    ) {
        let mut network = BeliefNetwork::from_catalog(&Catalog::builtin())
            .unwrap_or_else(|e| panic!("catalog: {e}"));
        for words in inputs {
            let text: Vec<&str> = words.into_iter().map(|w| WORDS[w]).collect();
            let posterior = network.update(&text.join(" "));
            let total: f64 = posterior.values().sum();
            prop_assert!((total - 1.0).abs() < 1e-9, "total {}", total);
            prop_assert!(posterior.values().all(|p| (0.0..=1.0).contains(p)));
        }
    }

    #[test]
    fn aggregate_stays_in_unit_interval(
        readings in prop::collection::vec((0.0f64..=1.0, -0.5f64..=1.0), 1..8),
        critical in any::<bool>(),
    ) {
        let readings: Vec<AgentConfidence> = readings
            .into_iter()
            .enumerate()
            .map(|(i, (c, w))| AgentConfidence::new(format!("agent-{i}"), c, w))
            .collect();
        let context = if critical {
            AggregationContext::critical()
        } else {
            AggregationContext::default()
        };
        let result = ConfidenceAggregator::new().aggregate(&readings, context);
        prop_assert!((0.0..=1.0).contains(&result.final_confidence));
        prop_assert!(result.contributing_agents.len() <= readings.len());
    }

    #[test]
    fn aggregate_stays_bounded_under_extreme_weights(
        readings in prop::collection::vec((0.0f64..=1.0, extreme_weight()), 1..8),
    ) {
        let readings: Vec<AgentConfidence> = readings
            .into_iter()
            .enumerate()
            .map(|(i, (c, w))| AgentConfidence::new(format!("agent-{i}"), c, w))
            .collect();
        let result = ConfidenceAggregator::new().aggregate(&readings, AggregationContext::default());
        prop_assert!(result.final_confidence.is_finite());
        prop_assert!((0.0..=1.0).contains(&result.final_confidence));
    }
}

fn extreme_weight() -> impl Strategy<Value = f64> {
    prop_oneof![
        -1.0e6f64..=1.0e6,
        1.0e300f64..=f64::MAX,
        Just(f64::INFINITY),
        Just(f64::NEG_INFINITY),
        Just(f64::NAN),
    ]
}
