//! Matcher
//!
//! Pure compatibility scoring over a registry snapshot. Performs no
//! mutation, so it can run concurrently and speculatively without
//! coordination; the assignment engine applies the result.
//!
//! An empty candidate set is a normal outcome (`None`), not an error: the
//! caller holds the lead in `Submitted` and retries on the next sweep.

use lr_common::{Lead, MatchCandidate, MatchWeights, Professional};

/// Compatibility score of one professional for one lead.
///
/// `specialization overlap × w + region match × w + response rate × w
///  − active count × load penalty`
pub fn score(lead: &Lead, professional: &Professional, weights: &MatchWeights) -> f64 {
    let overlap = if professional.specializations.contains(&lead.service_tag) {
        1.0
    } else {
        0.0
    };
    let region_exact = if professional.regions.contains(&lead.region_tag) {
        1.0
    } else {
        0.0
    };

    weights.specialization_overlap * overlap
        + weights.region_exact * region_exact
        + weights.response_rate * professional.response_rate_score
        - weights.load_penalty * professional.active_count as f64
}

/// Select the best-fit candidate for a lead.
///
/// Highest score wins. Ties break by lowest `active_count` (load
/// balancing), then earliest `verified_at` (seniority), then lexicographic
/// id. The order is total, so identical inputs always produce the same
/// candidate.
pub fn find_best_match(
    lead: &Lead,
    candidates: &[Professional],
    weights: &MatchWeights,
) -> Option<MatchCandidate> {
    let mut best: Option<(&Professional, f64)> = None;

    for candidate in candidates {
        let candidate_score = score(lead, candidate, weights);
        best = match best {
            None => Some((candidate, candidate_score)),
            Some((current, current_score)) => {
                if prefers(candidate, candidate_score, current, current_score) {
                    Some((candidate, candidate_score))
                } else {
                    Some((current, current_score))
                }
            }
        };
    }

    best.map(|(p, s)| MatchCandidate {
        professional_id: p.id.clone(),
        score: s,
        active_count: p.active_count,
        verified_at: p.verified_at,
    })
}

/// Whether `challenger` beats `incumbent` under the tie-break chain.
fn prefers(
    challenger: &Professional,
    challenger_score: f64,
    incumbent: &Professional,
    incumbent_score: f64,
) -> bool {
    if challenger_score.total_cmp(&incumbent_score) != std::cmp::Ordering::Equal {
        return challenger_score > incumbent_score;
    }

    if challenger.active_count != incumbent.active_count {
        return challenger.active_count < incumbent.active_count;
    }

    // All matchable candidates carry a verified_at stamp; None sorts last
    // as a safety net.
    match (challenger.verified_at, incumbent.verified_at) {
        (Some(a), Some(b)) if a != b => return a < b,
        (Some(_), None) => return true,
        (None, Some(_)) => return false,
        _ => {}
    }

    challenger.id < incumbent.id
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use lr_common::{LeadStatus, VerificationState};
    use std::collections::BTreeSet;

    fn tags(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    fn lead() -> Lead {
        Lead {
            id: "lead-1".to_string(),
            reference_code: "REF1".to_string(),
            contact_secret: "secret".to_string(),
            account_id: "acct".to_string(),
            service_tag: "visa-uk".to_string(),
            region_tag: "uk".to_string(),
            submitted_at: Utc::now(),
            status: LeadStatus::Submitted,
            assigned_professional_id: None,
            attempt_history: Vec::new(),
            offer_deadline: None,
        }
    }

    fn professional(id: &str, active: u32, rate: f64) -> Professional {
        Professional {
            id: id.to_string(),
            display_name: id.to_string(),
            specializations: tags(&["visa-uk"]),
            regions: tags(&["uk"]),
            verification: VerificationState::Verified,
            verified_at: Some(Utc::now()),
            capacity: 5,
            active_count: active,
            response_rate_score: rate,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_higher_response_rate_wins() {
        let lead = lead();
        let a = professional("a", 0, 0.5);
        let b = professional("b", 0, 0.9);
        let best = find_best_match(&lead, &[a, b], &MatchWeights::default()).unwrap();
        assert_eq!(best.professional_id, "b");
    }

    #[test]
    fn test_load_penalty_prefers_idle_professional() {
        let lead = lead();
        // Same rate; 3 active leads cost 0.3 under the default penalty
        let busy = professional("busy", 3, 0.7);
        let idle = professional("idle", 0, 0.7);
        let best = find_best_match(&lead, &[busy, idle], &MatchWeights::default()).unwrap();
        assert_eq!(best.professional_id, "idle");
    }

    #[test]
    fn test_tie_breaks_by_seniority_then_id() {
        let lead = lead();
        let now = Utc::now();

        let mut senior = professional("zeta", 0, 0.7);
        senior.verified_at = Some(now - Duration::days(30));
        let mut junior = professional("alpha", 0, 0.7);
        junior.verified_at = Some(now);

        let best =
            find_best_match(&lead, &[junior.clone(), senior.clone()], &MatchWeights::default())
                .unwrap();
        assert_eq!(best.professional_id, "zeta");

        // Identical seniority falls through to lexicographic id
        junior.verified_at = senior.verified_at;
        let best = find_best_match(&lead, &[senior, junior], &MatchWeights::default()).unwrap();
        assert_eq!(best.professional_id, "alpha");
    }

    #[test]
    fn test_empty_candidate_set_is_none() {
        assert!(find_best_match(&lead(), &[], &MatchWeights::default()).is_none());
    }

    #[test]
    fn test_determinism_over_input_order() {
        let lead = lead();
        let now = Utc::now();
        let mut pool = Vec::new();
        for (i, rate) in [0.4, 0.9, 0.9, 0.6, 0.9].iter().enumerate() {
            let mut p = professional(&format!("p{i}"), (i % 3) as u32, *rate);
            p.verified_at = Some(now - Duration::days(i as i64));
            pool.push(p);
        }

        let forward = find_best_match(&lead, &pool, &MatchWeights::default()).unwrap();
        pool.reverse();
        let backward = find_best_match(&lead, &pool, &MatchWeights::default()).unwrap();
        assert_eq!(forward.professional_id, backward.professional_id);
    }
}
