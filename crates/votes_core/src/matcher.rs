use crate::mandate::{MandateEntry, MandateIndex};
use time::Date;
use tracing::warn;

// A normalized input name with its uppercase form computed once.
pub struct NameKey {
    pub text: String,
    pub upper: String,
}

impl NameKey {
    pub fn new(normalized: &str) -> Self {
        Self {
            text: normalized.to_string(),
            upper: normalized.to_uppercase(),
        }
    }
}

type Strategy = fn(&MandateEntry, &NameKey) -> bool;

// Ordered fallback chain; the first step with candidates wins. Each rule is a
// pure predicate over one active mandate.
const CASCADE: &[(&str, Strategy)] = &[
    ("last-name-exact", last_name_exact),
    ("last-name-de-stripped", last_name_de_stripped),
    ("last-name-contains", last_name_contains),
    ("full-name-mc", full_name_mc),
    ("full-name-loose", full_name_loose),
];

fn last_name_exact(entry: &MandateEntry, key: &NameKey) -> bool {
    entry.last_name_upper == key.upper
}

// The feed sometimes drops the "de" article from Dutch/French surnames.
fn last_name_de_stripped(entry: &MandateEntry, key: &NameKey) -> bool {
    entry.last_name_upper == strip_de(&key.upper)
}

fn last_name_contains(entry: &MandateEntry, key: &NameKey) -> bool {
    entry.last_name.contains(key.upper.as_str())
}

// Gaelic surnames arrive fully upper-cased; the directory spells them "Mc".
fn full_name_mc(entry: &MandateEntry, key: &NameKey) -> bool {
    entry.full_name.contains(mc_capitalized(&key.upper).as_str())
}

fn full_name_loose(entry: &MandateEntry, key: &NameKey) -> bool {
    entry.full_name_upper.contains(key.upper.as_str())
}

fn strip_de(upper: &str) -> &str {
    upper.strip_prefix("DE ").unwrap_or(upper)
}

fn mc_capitalized(upper: &str) -> String {
    match upper.strip_prefix("MC") {
        Some(rest) => format!("Mc{rest}"),
        None => upper.to_string(),
    }
}

// Resolve a normalized name against mandates active on the vote date.
// Multi-candidate steps are lossy: the first representative in id order wins
// and the rest are discarded with a warning.
pub fn find_local(index: &MandateIndex, normalized: &str, date: Date) -> Option<i64> {
    let key = NameKey::new(normalized);
    for (label, matches) in CASCADE {
        let mut hits: Vec<&MandateEntry> = index
            .active_on(date)
            .filter(|entry| matches(entry, &key))
            .collect();
        // Overlapping mandates for one representative are a single candidate.
        hits.dedup_by_key(|entry| entry.representative_id);
        if let Some(first) = hits.first() {
            if hits.len() > 1 {
                warn!(
                    name = %key.text,
                    step = label,
                    candidates = hits.len(),
                    kept = first.representative_id,
                    "ambiguous match, discarding trailing candidates"
                );
            }
            return Some(first.representative_id);
        }
    }
    None
}
