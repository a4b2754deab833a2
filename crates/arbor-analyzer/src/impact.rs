//! Impact summary over a processed change list

use serde::{Deserialize, Serialize};

use crate::detect::{FileChange, FileChangeKind};

/// Risk weights per change class.
const WEIGHT_REMOVAL: f64 = 0.8;
const WEIGHT_STRUCTURAL_MODIFY: f64 = 0.5;
const WEIGHT_PLAIN_MODIFY: f64 = 0.1;
const WEIGHT_ADD: f64 = 0.1;

/// One processed change with the diff-level facts the summary needs.
#[derive(Debug, Clone)]
pub struct ProcessedChange {
    pub change: FileChange,
    /// Whether the tree shape changed (false for non-structural edits and
    /// for adds/removes, which are scored by their own class).
    pub structural: bool,
    pub symbols_touched: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ImpactSummary {
    pub total_changes: usize,
    pub files_affected: usize,
    pub symbols_affected: usize,
    /// Removals plus structural modifications.
    pub high_impact_changes: usize,
    pub risk_score: f64,
    pub recommendations: Vec<String>,
}

pub fn summarize(processed: &[ProcessedChange], dependents_estimate: usize) -> ImpactSummary {
    let mut files = std::collections::BTreeSet::new();
    let mut symbols_affected = 0;
    let mut high_impact = 0;
    let mut risk = 0.0;

    for item in processed {
        files.insert(item.change.path.clone());
        symbols_affected += item.symbols_touched;
        match &item.change.kind {
            FileChangeKind::Removed => {
                high_impact += 1;
                risk += WEIGHT_REMOVAL;
            }
            FileChangeKind::Modified => {
                if item.structural {
                    high_impact += 1;
                    risk += WEIGHT_STRUCTURAL_MODIFY;
                } else {
                    risk += WEIGHT_PLAIN_MODIFY;
                }
            }
            FileChangeKind::Added => risk += WEIGHT_ADD,
            FileChangeKind::Renamed { from } => {
                files.insert(from.clone());
                risk += WEIGHT_PLAIN_MODIFY;
            }
        }
    }

    let risk_score = risk.clamp(0.0, 1.0);

    let mut recommendations = Vec::new();
    if risk_score >= 0.7 {
        recommendations.push("high-risk change batch; run the full test suite".to_string());
    }
    if high_impact > 0 {
        recommendations.push(format!(
            "{} high-impact change(s); inspect dependent modules",
            high_impact
        ));
    }
    if dependents_estimate > 0 {
        recommendations.push(format!(
            "about {} dependent file(s) sit downstream of this batch",
            dependents_estimate
        ));
    }

    ImpactSummary {
        total_changes: processed.len(),
        files_affected: files.len(),
        symbols_affected,
        high_impact_changes: high_impact,
        risk_score,
        recommendations,
    }
}
