//! Derived scores for an analysis record.
//!
//! Every score is a base value adjusted by bounded penalties and bonuses, then
//! clamped to `[0, 100]`. A missing partition yields the neutral value so a
//! failed analyzer never drops a score from the record.

use crate::{Partitions, Scores, Severity};

pub const NEUTRAL_SECURITY: f64 = 70.0;
pub const BASE_PERFORMANCE: f64 = 80.0;
pub const BASE_QUALITY: f64 = 75.0;

const LARGE_CODEBASE_LINES: u64 = 50_000;
const LINES_PER_PENALTY_POINT: u64 = 2_000;
const MAX_SIZE_PENALTY: f64 = 20.0;
const UNPINNED_PENALTY: f64 = 2.0;
const MAX_UNPINNED_PENALTY: f64 = 20.0;

pub fn compute_scores(partitions: &Partitions) -> Scores {
    Scores {
        security: security_score(partitions),
        performance: performance_score(partitions),
        quality: quality_score(partitions),
    }
}

fn severity_weight(severity: Severity) -> f64 {
    match severity {
        Severity::Critical => 20.0,
        Severity::High => 10.0,
        Severity::Medium => 5.0,
        Severity::Low => 1.0,
    }
}

pub fn security_score(partitions: &Partitions) -> f64 {
    let Some(report) = partitions.security() else {
        return NEUTRAL_SECURITY;
    };
    let penalty: f64 = report
        .findings
        .iter()
        .map(|f| severity_weight(f.severity))
        .sum();
    clamp(100.0 - penalty)
}

pub fn performance_score(partitions: &Partitions) -> f64 {
    let mut score = BASE_PERFORMANCE;
    if let Some(structure) = partitions.structure() {
        let excess = structure.total_lines.saturating_sub(LARGE_CODEBASE_LINES);
        score -= ((excess / LINES_PER_PENALTY_POINT) as f64).min(MAX_SIZE_PENALTY);
    }
    if let Some(deps) = partitions.dependencies() {
        score -= (deps.unpinned_dependencies() as f64 * UNPINNED_PENALTY).min(MAX_UNPINNED_PENALTY);
    }
    clamp(score)
}

pub fn quality_score(partitions: &Partitions) -> f64 {
    let mut score = BASE_QUALITY;
    match partitions.structure() {
        Some(structure) => {
            if structure.has_tests {
                score += 10.0;
            }
            if structure.has_docs {
                score += 10.0;
            }
            if structure.has_ci {
                score += 5.0;
            }
        }
        None => score -= 5.0,
    }
    if partitions
        .patterns()
        .is_some_and(|p| p.has_pattern_type("testing"))
    {
        score += 5.0;
    }
    clamp(score)
}

fn clamp(score: f64) -> f64 {
    score.clamp(0.0, 100.0)
}
