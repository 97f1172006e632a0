//! Ranked "did you mean" candidates for a device name that was not found.
//!
//! Each candidate gets a blend of four similarity measures on 0..=100:
//! character ratio (0.4), best-window partial ratio (0.3), token-sorted ratio
//! (0.2) and token-set ratio (0.1). An exact case-insensitive match always
//! ranks first.

use std::cmp::Ordering;
use std::collections::BTreeSet;

const WEIGHT_RATIO: f64 = 0.4;
const WEIGHT_PARTIAL: f64 = 0.3;
const WEIGHT_TOKEN_SORT: f64 = 0.2;
const WEIGHT_TOKEN_SET: f64 = 0.1;

/// Perfect score.
pub const MAX_SCORE: f64 = 100.0;

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Suggestion {
    pub name: String,
    /// 1-based registry index.
    pub index: usize,
    pub score: f64,
    /// Case-insensitive equality with the requested name.
    pub exact: bool,
}

/// Top `top` candidates, best first, ties broken by name.
pub fn suggest(requested: &str, candidates: &[String], top: usize) -> Vec<Suggestion> {
    let wanted = requested.to_uppercase();
    let mut ranked: Vec<Suggestion> = candidates
        .iter()
        .enumerate()
        .map(|(position, name)| {
            let upper = name.to_uppercase();
            let exact = upper == wanted;
            Suggestion {
                name: name.clone(),
                index: position + 1,
                score: if exact { MAX_SCORE } else { score(&wanted, &upper) },
                exact,
            }
        })
        .collect();
    ranked.sort_by(compare);
    ranked.truncate(top);
    ranked
}

fn compare(a: &Suggestion, b: &Suggestion) -> Ordering {
    b.exact
        .cmp(&a.exact)
        .then_with(|| b.score.total_cmp(&a.score))
        .then_with(|| a.name.cmp(&b.name))
}

/// Weighted blend of the four measures.
pub fn score(a: &str, b: &str) -> f64 {
    WEIGHT_RATIO * ratio(a, b)
        + WEIGHT_PARTIAL * partial_ratio(a, b)
        + WEIGHT_TOKEN_SORT * token_sort_ratio(a, b)
        + WEIGHT_TOKEN_SET * token_set_ratio(a, b)
}

fn lcs_len(a: &[char], b: &[char]) -> usize {
    let mut previous = vec![0usize; b.len() + 1];
    let mut current = vec![0usize; b.len() + 1];
    for &ca in a {
        for (j, &cb) in b.iter().enumerate() {
            current[j + 1] = if ca == cb {
                previous[j] + 1
            } else {
                previous[j + 1].max(current[j])
            };
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

fn ratio_chars(a: &[char], b: &[char]) -> f64 {
    let total = a.len() + b.len();
    if total == 0 {
        return MAX_SCORE;
    }
    MAX_SCORE * 2.0 * lcs_len(a, b) as f64 / total as f64
}

/// Normalized common-subsequence similarity.
pub fn ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    ratio_chars(&a, &b)
}

/// Best ratio of the shorter string against every equally long window of the longer one.
pub fn partial_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let (short, long) = if a.len() <= b.len() { (&a, &b) } else { (&b, &a) };
    if short.is_empty() {
        return if long.is_empty() { MAX_SCORE } else { 0.0 };
    }
    long.windows(short.len())
        .map(|window| ratio_chars(short, window))
        .fold(0.0, f64::max)
}

/// Split at separators and at letter/digit boundaries: `ATMEGA328P` -> `ATMEGA 328 P`.
fn tokens(s: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut last_digit: Option<bool> = None;
    for ch in s.chars() {
        if !ch.is_alphanumeric() {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
            last_digit = None;
            continue;
        }
        let digit = ch.is_ascii_digit();
        if last_digit.is_some_and(|last| last != digit) && !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
        current.push(ch);
        last_digit = Some(digit);
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Ratio after sorting the tokens of both strings.
pub fn token_sort_ratio(a: &str, b: &str) -> f64 {
    let sorted = |s: &str| {
        let mut parts = tokens(s);
        parts.sort();
        parts.join(" ")
    };
    ratio(&sorted(a), &sorted(b))
}

/// Ratio over shared and distinct token sets; a token subset scores 100.
pub fn token_set_ratio(a: &str, b: &str) -> f64 {
    let left: BTreeSet<String> = tokens(a).into_iter().collect();
    let right: BTreeSet<String> = tokens(b).into_iter().collect();
    let shared: Vec<&str> = left.intersection(&right).map(String::as_str).collect();
    if !shared.is_empty() && (left.is_subset(&right) || right.is_subset(&left)) {
        return MAX_SCORE;
    }
    let join = |extra: Vec<&str>| {
        shared
            .iter()
            .copied()
            .chain(extra)
            .collect::<Vec<_>>()
            .join(" ")
    };
    let base = shared.join(" ");
    let with_left = join(left.difference(&right).map(String::as_str).collect());
    let with_right = join(right.difference(&left).map(String::as_str).collect());
    ratio(&base, &with_left)
        .max(ratio(&base, &with_right))
        .max(ratio(&with_left, &with_right))
}
