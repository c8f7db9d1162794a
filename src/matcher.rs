//! Fuzzy dropdown option matching.
//!
//! Similarity is the Ratcliff/Obershelp ratio `2*M / T`: `M` counts the
//! characters of the matching blocks found by repeatedly taking the longest
//! common substring and recursing on both sides, `T` is the combined length.

use std::collections::HashMap;

use crate::types::DropdownOption;

/// Index of the option whose text is most similar to `target`.
///
/// Only a strictly greater ratio replaces the current best, so exact ties go
/// to the earliest option. Recorded tasks replay against this choice.
/// Returns `None` when there is nothing to choose from.
pub fn best_match(options: &[DropdownOption], target: &str) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, option) in options.iter().enumerate() {
        let score = similarity(&option.text, target);
        if best.is_none_or(|(_, top)| score > top) {
            best = Some((i, score));
        }
    }
    best.map(|(i, _)| i)
}

/// Ratio in `[0, 1]`; two empty strings are identical.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    2.0 * matched_chars(&a, &b) as f64 / total as f64
}

fn matched_chars(a: &[char], b: &[char]) -> usize {
    let mut b2j: HashMap<char, Vec<usize>> = HashMap::new();
    for (j, c) in b.iter().enumerate() {
        b2j.entry(*c).or_default().push(j);
    }

    let mut matched = 0;
    let mut pending = vec![(0, a.len(), 0, b.len())];
    while let Some((alo, ahi, blo, bhi)) = pending.pop() {
        let (i, j, k) = longest_match(a, &b2j, alo, ahi, blo, bhi);
        if k == 0 {
            continue;
        }
        matched += k;
        if alo < i && blo < j {
            pending.push((alo, i, blo, j));
        }
        if i + k < ahi && j + k < bhi {
            pending.push((i + k, ahi, j + k, bhi));
        }
    }
    matched
}

/// Longest block `a[i..i+k] == b[j..j+k]` inside the given windows, preferring
/// the earliest `i`, then the earliest `j`.
fn longest_match(
    a: &[char],
    b2j: &HashMap<char, Vec<usize>>,
    alo: usize,
    ahi: usize,
    blo: usize,
    bhi: usize,
) -> (usize, usize, usize) {
    let (mut best_i, mut best_j, mut best_k) = (alo, blo, 0);
    // run length of the match ending at b[j], for the previous row of a
    let mut j2len: HashMap<usize, usize> = HashMap::new();
    for (i, c) in a.iter().enumerate().take(ahi).skip(alo) {
        let mut next = HashMap::new();
        if let Some(positions) = b2j.get(c) {
            for &j in positions {
                if j < blo {
                    continue;
                }
                if j >= bhi {
                    break;
                }
                let k = j
                    .checked_sub(1)
                    .and_then(|prev| j2len.get(&prev))
                    .copied()
                    .unwrap_or(0)
                    + 1;
                next.insert(j, k);
                if k > best_k {
                    (best_i, best_j, best_k) = (i + 1 - k, j + 1 - k, k);
                }
            }
        }
        j2len = next;
    }
    (best_i, best_j, best_k)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(texts: &[&str]) -> Vec<DropdownOption> {
        texts
            .iter()
            .map(|t| DropdownOption {
                value: t.to_lowercase(),
                text: t.to_string(),
            })
            .collect()
    }

    #[test]
    fn exact_match_beats_near_match() {
        let options = opts(&["Apple", "Banana", "Appel"]);
        assert_eq!(best_match(&options, "Apple"), Some(0));
        // same input, same answer
        assert_eq!(best_match(&options, "Apple"), Some(0));
    }

    #[test]
    fn closest_option_wins() {
        assert_eq!(best_match(&opts(&["Red", "Green", "Blue"]), "Gren"), Some(1));
    }

    #[test]
    fn ties_go_to_first_option() {
        assert_eq!(best_match(&opts(&["abc", "abc", "xyz"]), "abc"), Some(0));
        assert_eq!(best_match(&opts(&["x", "y"]), "zzz"), Some(0));
    }

    #[test]
    fn empty_options_have_no_match() {
        assert_eq!(best_match(&[], "anything"), None);
    }

    #[test]
    fn ratio_matches_known_values() {
        assert_eq!(similarity("", ""), 1.0);
        assert_eq!(similarity("abc", ""), 0.0);
        assert!((similarity("Green", "Gren") - 8.0 / 9.0).abs() < 1e-9);
        // difflib.SequenceMatcher(None, "abcd", "bcde").ratio() == 0.75
        assert!((similarity("abcd", "bcde") - 0.75).abs() < 1e-9);
    }
}
