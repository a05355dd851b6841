use std::collections::HashMap;

use crate::model::Candidate;

use super::icd::IcdNormalizer;

/// Canonicalizes codes and keeps one candidate per code, the higher score
/// winning. Candidates without a code are dropped. Survivors keep their
/// original relative order; callers sort afterwards.
pub fn dedupe_by_code(codes: &IcdNormalizer, candidates: Vec<Candidate>) -> Vec<Candidate> {
    let mut best = HashMap::<String, (usize, Candidate)>::new();

    for (order, mut candidate) in candidates.into_iter().enumerate() {
        let code = codes.canonical(&candidate.icd10_code);
        if code.is_empty() {
            continue;
        }
        candidate.icd10_code = code.clone();

        match best.get_mut(&code) {
            Some(existing) if candidate.score > existing.1.score => {
                *existing = (order, candidate);
            }
            Some(_) => {}
            None => {
                best.insert(code, (order, candidate));
            }
        }
    }

    let mut kept = best.into_values().collect::<Vec<(usize, Candidate)>>();
    kept.sort_by_key(|(order, _)| *order);
    kept.into_iter().map(|(_, candidate)| candidate).collect()
}

/// Stable descending sort: equal scores keep retrieval order.
pub fn sort_by_score(candidates: &mut [Candidate]) {
    candidates.sort_by(|left, right| right.score.total_cmp(&left.score));
}

pub fn rank_candidates(
    codes: &IcdNormalizer,
    candidates: Vec<Candidate>,
    top_n: usize,
) -> Vec<Candidate> {
    let mut ranked = dedupe_by_code(codes, candidates);
    sort_by_score(&mut ranked);
    ranked.truncate(top_n);
    ranked
}

/// `confidence = score / max_score`, rounded to two decimals. A zero maximum
/// (or an empty set) divides by 1 instead.
pub fn normalize_confidence(candidates: &mut [Candidate]) {
    let max_score = candidates
        .iter()
        .map(|candidate| candidate.score)
        .fold(f64::NEG_INFINITY, f64::max);
    let divisor = if max_score == 0.0 || !max_score.is_finite() {
        1.0
    } else {
        max_score
    };

    for candidate in candidates {
        candidate.confidence = Some(round2(candidate.score / divisor));
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
