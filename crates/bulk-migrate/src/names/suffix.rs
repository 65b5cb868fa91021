//! Numeric suffix analysis of existing names.

use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

use regex::Regex;

static SUFFIXED_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.+)_(\d+)$").expect("valid regex"));

/// Suffixes further apart than this start a new range.
const RANGE_GAP: u64 = 100;

/// Ranges after the first one are ignored unless they are at least this big.
const MIN_LATER_RANGE: usize = 300;

/// Finds, per base name, the highest suffix of the last significant block of
/// `base_NNN` names.
///
/// The first block always counts. A later block only counts when it is large,
/// which skips over scattered one-off collisions such as `bob_1990` while
/// still continuing after deliberately suffixed blocks.
pub struct SuffixFinder;

impl SuffixFinder {
    pub fn find<'a, I>(names: I) -> HashMap<String, u64>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut by_base: BTreeMap<&str, Vec<u64>> = BTreeMap::new();
        for name in names {
            let Some(caps) = SUFFIXED_NAME.captures(name) else {
                continue;
            };
            let (Some(base), Some(digits)) = (caps.get(1), caps.get(2)) else {
                continue;
            };
            if let Ok(suffix) = digits.as_str().parse::<u64>() {
                by_base.entry(base.as_str()).or_default().push(suffix);
            }
        }

        by_base
            .into_iter()
            .filter_map(|(base, mut suffixes)| {
                suffixes.sort_unstable();
                suffixes.dedup();
                last_significant_max(&suffixes).map(|max| (base.to_string(), max))
            })
            .collect()
    }
}

fn last_significant_max(sorted: &[u64]) -> Option<u64> {
    let mut ranges: Vec<&[u64]> = Vec::new();
    let mut start = 0;
    for i in 1..sorted.len() {
        if sorted[i] - sorted[i - 1] >= RANGE_GAP {
            ranges.push(&sorted[start..i]);
            start = i;
        }
    }
    if !sorted.is_empty() {
        ranges.push(&sorted[start..]);
    }

    ranges
        .iter()
        .enumerate()
        .filter(|(idx, range)| *idx == 0 || range.len() >= MIN_LATER_RANGE)
        .last()
        .and_then(|(_, range)| range.last().copied())
}

/// Increment the trailing number of `name` (`abc9` -> `abc10`), or append
/// `1` when there is none.
pub fn next_name(name: &str) -> String {
    let digits_start = name
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit())
        .last()
        .map(|(idx, _)| idx)
        .unwrap_or(name.len());

    let (head, digits) = name.split_at(digits_start);
    if digits.is_empty() {
        return format!("{}1", head);
    }

    let mut bytes = digits.as_bytes().to_vec();
    let mut carry = true;
    for b in bytes.iter_mut().rev() {
        if !carry {
            break;
        }
        if *b == b'9' {
            *b = b'0';
        } else {
            *b += 1;
            carry = false;
        }
    }
    let mut incremented = String::from_utf8_lossy(&bytes).into_owned();
    if carry {
        incremented.insert(0, '1');
    }
    format!("{}{}", head, incremented)
}
