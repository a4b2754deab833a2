//! Symbol-level change classification and rename fusion

use arbor_core::Symbol;
use serde::{Deserialize, Serialize};

/// Line tolerance when deciding whether two symbol locations overlap.
const RENAME_LINE_TOLERANCE: u32 = 2;

/// Minimum confidence for fusing a delete/add pair into a rename.
const RENAME_CONFIDENCE_FLOOR: f64 = 0.6;

/// Minimum shared-prefix ratio between the two signatures.
const RENAME_PREFIX_FLOOR: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolRename {
    pub old: Symbol,
    pub new: Symbol,
    pub confidence: f64,
}

/// Classified difference between two symbol snapshots of one file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SymbolChangeSet {
    pub added: Vec<Symbol>,
    pub deleted: Vec<Symbol>,
    /// (before, after) pairs matched by kind and name.
    pub modified: Vec<(Symbol, Symbol)>,
    pub renamed: Vec<SymbolRename>,
}

impl SymbolChangeSet {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.deleted.is_empty()
            && self.modified.is_empty()
            && self.renamed.is_empty()
    }

    pub fn change_count(&self) -> usize {
        self.added.len() + self.deleted.len() + self.modified.len() + self.renamed.len()
    }
}

/// Compare two extraction snapshots. Symbols pair up by kind and name;
/// leftover delete/add pairs are then offered to rename fusion.
pub fn classify_symbols(old: &[Symbol], new: &[Symbol]) -> SymbolChangeSet {
    let mut result = SymbolChangeSet::default();

    let mut unmatched_new: Vec<&Symbol> = new.iter().collect();
    let mut deleted: Vec<Symbol> = Vec::new();

    for old_symbol in old {
        let position = unmatched_new
            .iter()
            .position(|candidate| candidate.kind == old_symbol.kind && candidate.name == old_symbol.name);
        match position {
            Some(index) => {
                let matched = unmatched_new.remove(index);
                if !symbols_equivalent(old_symbol, matched) {
                    result.modified.push((old_symbol.clone(), matched.clone()));
                }
            }
            None => deleted.push(old_symbol.clone()),
        }
    }

    let mut added: Vec<Symbol> = unmatched_new.into_iter().cloned().collect();

    // Rename fusion: a deletion and an addition of the same kind at an
    // overlapping location with coinciding signature prefixes.
    let mut remaining_deleted = Vec::new();
    for old_symbol in deleted {
        let best = added
            .iter()
            .enumerate()
            .filter_map(|(index, candidate)| {
                rename_confidence(&old_symbol, candidate).map(|score| (index, score))
            })
            .max_by(|a, b| a.1.total_cmp(&b.1));
        match best {
            Some((index, confidence)) => {
                let new_symbol = added.remove(index);
                result.renamed.push(SymbolRename {
                    old: old_symbol,
                    new: new_symbol,
                    confidence,
                });
            }
            None => remaining_deleted.push(old_symbol),
        }
    }

    result.deleted = remaining_deleted;
    result.added = added;
    result
}

fn symbols_equivalent(a: &Symbol, b: &Symbol) -> bool {
    a.signature == b.signature
        && a.location == b.location
        && a.visibility == b.visibility
        && a.documentation == b.documentation
        && a.qualified_name == b.qualified_name
}

/// Confidence in [0,1] that `old` was renamed to `new`, or None when the
/// pair does not qualify.
fn rename_confidence(old: &Symbol, new: &Symbol) -> Option<f64> {
    if old.kind != new.kind {
        return None;
    }
    if !old.location.overlaps_within(&new.location, RENAME_LINE_TOLERANCE) {
        return None;
    }
    let prefix = signature_prefix_ratio(&old.signature, &new.signature, &old.name, &new.name);
    if prefix < RENAME_PREFIX_FLOOR {
        return None;
    }
    let location_score = if old.location.start_line == new.location.start_line {
        1.0
    } else {
        0.5
    };
    let confidence = 0.2 + 0.4 * prefix + 0.4 * location_score;
    (confidence >= RENAME_CONFIDENCE_FLOOR).then_some(confidence.min(1.0))
}

/// Shared-prefix ratio of the two signatures with the symbol names blanked
/// out, so the rename itself does not count against the comparison.
fn signature_prefix_ratio(old_sig: &str, new_sig: &str, old_name: &str, new_name: &str) -> f64 {
    let old_neutral = old_sig.replace(old_name, "\u{0}");
    let new_neutral = new_sig.replace(new_name, "\u{0}");
    if old_neutral.is_empty() && new_neutral.is_empty() {
        return 1.0;
    }
    let common = old_neutral
        .bytes()
        .zip(new_neutral.bytes())
        .take_while(|(a, b)| a == b)
        .count();
    let longest = old_neutral.len().max(new_neutral.len());
    if longest == 0 {
        1.0
    } else {
        common as f64 / longest as f64
    }
}
