//! Specification completeness rubric.

use crate::constraint::Strength;
use crate::store::StateSnapshot;

const USE_CASE_WEIGHT: f64 = 0.2;
const MANDATORY_WEIGHT: f64 = 0.5;
const RECOMMENDED_WEIGHT: f64 = 0.2;
const CONFLICT_FREE_WEIGHT: f64 = 0.1;

/// Scores how complete a specification is, in [0, 1].
///
/// A use case above 0.8 earns 20%, five or more mandatory constraints 50%
/// (half of that at three), three or more recommended constraints 20%, and
/// having no unresolved conflict the last 10%.
#[must_use]
pub fn completeness_score(snapshot: &StateSnapshot, unresolved_conflicts: usize) -> f64 {
    let mut score = 0.0;

    if snapshot.best_use_case_confidence() > 0.8 {
        score += USE_CASE_WEIGHT;
    }

    let mandatory = snapshot.count_with_strength(Strength::Mandatory);
    if mandatory >= 5 {
        score += MANDATORY_WEIGHT;
    } else if mandatory >= 3 {
        score += MANDATORY_WEIGHT * 0.5;
    }

    if snapshot.count_with_strength(Strength::Recommended) >= 3 {
        score += RECOMMENDED_WEIGHT;
    }

    if unresolved_conflicts == 0 {
        score += CONFLICT_FREE_WEIGHT;
    }

    f64::min(score, 1.0)
}
