//! Sequence alignment over node fingerprints
//!
//! The tree diff reduces each recursion step to aligning two sequences of
//! subtree hashes. Three interchangeable algorithms: myers (minimal edit
//! script), patience (unique-token anchoring), histogram (rare-token
//! anchoring). Patience and histogram fall back to myers between anchors.

use std::collections::HashMap;

use crate::config::DiffAlgorithm;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlignOp {
    Match { old: usize, new: usize },
    Delete { old: usize },
    Insert { new: usize },
}

pub fn align(old: &[u64], new: &[u64], algorithm: DiffAlgorithm) -> Vec<AlignOp> {
    match algorithm {
        DiffAlgorithm::Myers => myers(old, new, 0, 0),
        DiffAlgorithm::Patience => anchored(old, new, 0, 0, AnchorRule::Unique),
        DiffAlgorithm::Histogram => anchored(old, new, 0, 0, AnchorRule::Rare),
    }
}

/// Count of Match ops in an alignment.
pub fn matched_count(ops: &[AlignOp]) -> usize {
    ops.iter()
        .filter(|op| matches!(op, AlignOp::Match { .. }))
        .count()
}

// ── Myers ───────────────────────────────────────────────

/// Greedy O(ND) edit-script search with trace backtracking. Offsets shift
/// the reported indices so recursive callers can align sub-slices.
fn myers(a: &[u64], b: &[u64], a_offset: usize, b_offset: usize) -> Vec<AlignOp> {
    let n = a.len();
    let m = b.len();
    if n == 0 {
        return (0..m).map(|j| AlignOp::Insert { new: b_offset + j }).collect();
    }
    if m == 0 {
        return (0..n).map(|i| AlignOp::Delete { old: a_offset + i }).collect();
    }

    let max = n + m;
    let width = 2 * max + 1;
    let mut v = vec![0usize; width];
    let mut trace: Vec<Vec<usize>> = Vec::new();

    let mut found_d = None;
    'outer: for d in 0..=max {
        trace.push(v.clone());
        let d_i = d as isize;
        let mut k = -d_i;
        while k <= d_i {
            let idx = (k + max as isize) as usize;
            let mut x = if k == -d_i || (k != d_i && v[idx - 1] < v[idx + 1]) {
                v[idx + 1]
            } else {
                v[idx - 1] + 1
            };
            let mut y = (x as isize - k) as usize;
            while x < n && y < m && a[x] == b[y] {
                x += 1;
                y += 1;
            }
            v[idx] = x;
            if x >= n && y >= m {
                found_d = Some(d);
                break 'outer;
            }
            k += 2;
        }
    }

    let d_final = match found_d {
        Some(d) => d,
        // Unreachable: d = n + m always suffices.
        None => max,
    };

    // Backtrack through the stored rows. trace[d] is V before round d, so
    // it holds the endpoints round d stepped from.
    let idx = |k: isize| (k + max as isize) as usize;
    let mut ops_rev = Vec::new();
    let mut x = n;
    let mut y = m;
    for d in (1..=d_final).rev() {
        let row = &trace[d];
        let k = x as isize - y as isize;
        let d_i = d as isize;
        let went_down = k == -d_i || (k != d_i && row[idx(k - 1)] < row[idx(k + 1)]);
        let prev_k = if went_down { k + 1 } else { k - 1 };
        let prev_x = row[idx(prev_k)];
        let prev_y = (prev_x as isize - prev_k) as usize;

        // Snake back over the trailing matches of this round.
        while x > prev_x && y > prev_y {
            x -= 1;
            y -= 1;
            ops_rev.push(AlignOp::Match {
                old: a_offset + x,
                new: b_offset + y,
            });
        }
        if went_down {
            y -= 1;
            ops_rev.push(AlignOp::Insert { new: b_offset + y });
        } else {
            x -= 1;
            ops_rev.push(AlignOp::Delete { old: a_offset + x });
        }
    }
    // Leading snake from round zero.
    while x > 0 && y > 0 {
        x -= 1;
        y -= 1;
        ops_rev.push(AlignOp::Match {
            old: a_offset + x,
            new: b_offset + y,
        });
    }

    ops_rev.reverse();
    ops_rev
}

// ── Patience / histogram ────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AnchorRule {
    /// Tokens occurring exactly once on both sides.
    Unique,
    /// Tokens with the lowest occurrence count on the old side.
    Rare,
}

const HISTOGRAM_OCCURRENCE_LIMIT: usize = 4;

fn anchored(
    a: &[u64],
    b: &[u64],
    a_offset: usize,
    b_offset: usize,
    rule: AnchorRule,
) -> Vec<AlignOp> {
    if a.is_empty() || b.is_empty() {
        return myers(a, b, a_offset, b_offset);
    }

    let mut count_a: HashMap<u64, usize> = HashMap::new();
    let mut count_b: HashMap<u64, usize> = HashMap::new();
    for token in a {
        *count_a.entry(*token).or_insert(0) += 1;
    }
    for token in b {
        *count_b.entry(*token).or_insert(0) += 1;
    }

    // Candidate anchors: first-occurrence pairs of eligible tokens, in old
    // order.
    let mut first_b: HashMap<u64, usize> = HashMap::new();
    for (j, token) in b.iter().enumerate() {
        first_b.entry(*token).or_insert(j);
    }
    let mut seen = HashMap::new();
    let mut candidates: Vec<(usize, usize)> = Vec::new();
    for (i, token) in a.iter().enumerate() {
        if *seen.entry(*token).or_insert(0usize) > 0 {
            continue;
        }
        seen.insert(*token, 1);
        let ca = count_a.get(token).copied().unwrap_or(0);
        let cb = count_b.get(token).copied().unwrap_or(0);
        if cb == 0 {
            continue;
        }
        let eligible = match rule {
            AnchorRule::Unique => ca == 1 && cb == 1,
            AnchorRule::Rare => ca <= HISTOGRAM_OCCURRENCE_LIMIT && cb <= HISTOGRAM_OCCURRENCE_LIMIT,
        };
        if eligible {
            candidates.push((i, first_b[token]));
        }
    }

    let anchors = longest_increasing_by_second(&candidates);
    if anchors.is_empty() {
        return myers(a, b, a_offset, b_offset);
    }

    let mut ops = Vec::new();
    let mut prev_a = 0;
    let mut prev_b = 0;
    for (ai, bi) in anchors {
        ops.extend(anchored(
            &a[prev_a..ai],
            &b[prev_b..bi],
            a_offset + prev_a,
            b_offset + prev_b,
            rule,
        ));
        ops.push(AlignOp::Match {
            old: a_offset + ai,
            new: b_offset + bi,
        });
        prev_a = ai + 1;
        prev_b = bi + 1;
    }
    ops.extend(anchored(
        &a[prev_a..],
        &b[prev_b..],
        a_offset + prev_a,
        b_offset + prev_b,
        rule,
    ));
    ops
}

/// Longest subsequence of pairs (already sorted by first component) with
/// strictly increasing second component. Patience sorting with backpointers.
fn longest_increasing_by_second(pairs: &[(usize, usize)]) -> Vec<(usize, usize)> {
    if pairs.is_empty() {
        return Vec::new();
    }
    let mut piles: Vec<usize> = Vec::new();
    let mut back: Vec<Option<usize>> = vec![None; pairs.len()];

    for (idx, &(_, b)) in pairs.iter().enumerate() {
        let pos = piles.partition_point(|&top_idx| pairs[top_idx].1 < b);
        if pos > 0 {
            back[idx] = Some(piles[pos - 1]);
        }
        if pos == piles.len() {
            piles.push(idx);
        } else {
            piles[pos] = idx;
        }
    }

    let mut chain = Vec::new();
    let mut current = piles.last().copied();
    while let Some(idx) = current {
        chain.push(pairs[idx]);
        current = back[idx];
    }
    chain.reverse();
    chain
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check_alignment(ops: &[AlignOp], a: &[u64], b: &[u64]) {
        // Every index covered exactly once, matches actually match.
        let mut next_a = 0;
        let mut next_b = 0;
        for op in ops {
            match *op {
                AlignOp::Match { old, new } => {
                    assert_eq!(old, next_a);
                    assert_eq!(new, next_b);
                    assert_eq!(a[old], b[new]);
                    next_a += 1;
                    next_b += 1;
                }
                AlignOp::Delete { old } => {
                    assert_eq!(old, next_a);
                    next_a += 1;
                }
                AlignOp::Insert { new } => {
                    assert_eq!(new, next_b);
                    next_b += 1;
                }
            }
        }
        assert_eq!(next_a, a.len());
        assert_eq!(next_b, b.len());
    }

    #[test]
    fn identical_sequences_fully_match() {
        let seq = [1u64, 2, 3, 4];
        for algorithm in [
            DiffAlgorithm::Myers,
            DiffAlgorithm::Patience,
            DiffAlgorithm::Histogram,
        ] {
            let ops = align(&seq, &seq, algorithm);
            check_alignment(&ops, &seq, &seq);
            assert_eq!(matched_count(&ops), 4);
        }
    }

    #[test]
    fn myers_finds_minimal_script() {
        let a = [1u64, 2, 3];
        let b = [1u64, 9, 3];
        let ops = align(&a, &b, DiffAlgorithm::Myers);
        check_alignment(&ops, &a, &b);
        assert_eq!(matched_count(&ops), 2);
        // One delete and one insert for the substitution.
        assert_eq!(ops.len(), 4);
    }

    #[test]
    fn insert_into_empty() {
        let a: [u64; 0] = [];
        let b = [7u64, 8];
        for algorithm in [
            DiffAlgorithm::Myers,
            DiffAlgorithm::Patience,
            DiffAlgorithm::Histogram,
        ] {
            let ops = align(&a, &b, algorithm);
            check_alignment(&ops, &a, &b);
            assert_eq!(matched_count(&ops), 0);
        }
    }

    #[test]
    fn patience_anchors_on_unique_tokens() {
        // Repeated 1s cannot anchor; the unique 5 must.
        let a = [1u64, 1, 5, 1, 1];
        let b = [1u64, 5, 1, 1, 1];
        let ops = align(&a, &b, DiffAlgorithm::Patience);
        check_alignment(&ops, &a, &b);
        assert!(ops
            .iter()
            .any(|op| matches!(op, AlignOp::Match { old: 2, new: 1 })));
    }

    #[test]
    fn histogram_handles_moved_blocks() {
        let a = [1u64, 2, 3, 4, 5];
        let b = [4u64, 5, 1, 2, 3];
        let ops = align(&a, &b, DiffAlgorithm::Histogram);
        check_alignment(&ops, &a, &b);
        assert!(matched_count(&ops) >= 3);
    }

    #[test]
    fn all_algorithms_agree_on_match_validity() {
        let a = [10u64, 20, 30, 40, 50, 60];
        let b = [10u64, 25, 30, 40, 65, 60];
        for algorithm in [
            DiffAlgorithm::Myers,
            DiffAlgorithm::Patience,
            DiffAlgorithm::Histogram,
        ] {
            let ops = align(&a, &b, algorithm);
            check_alignment(&ops, &a, &b);
            assert!(matched_count(&ops) >= 3, "{:?}", algorithm);
        }
    }
}
