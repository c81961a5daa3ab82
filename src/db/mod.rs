pub mod cache;
pub mod mem;
pub mod mysql;

use std::fmt;

use crate::error::Result;
use crate::parse::CompanyRow;

/// The reference tables a batch resolves names against, plus `company`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dict {
    Region,
    District,
    City,
    Category,
    Subcategory,
    Company,
}

impl Dict {
    pub fn table(self) -> &'static str {
        match self {
            Dict::Region => "region",
            Dict::District => "district",
            Dict::City => "city",
            Dict::Category => "category",
            Dict::Subcategory => "subcategory",
            Dict::Company => "company",
        }
    }
}

/// Preload order for the five dictionary tables. Every worker everywhere
/// must touch them in exactly this order, `region` first; a worker that
/// acquires locks in a different order reintroduces deadlock cycles.
pub const DICT_PRELOAD_ORDER: [Dict; 5] = [
    Dict::Region,
    Dict::District,
    Dict::City,
    Dict::Category,
    Dict::Subcategory,
];

/// Counters a loader accumulates over its lifetime, logged once per task.
#[derive(Debug, Clone, Default)]
pub struct Summary {
    /// Companies newly inserted by this loader (not merely re-seen).
    pub company: u64,
    /// Distinct companies that received at least one category link.
    pub category: usize,
    /// Size of the subcategory name cache.
    pub subcategory: usize,
    /// Distinct companies that received at least one subcategory link.
    pub subcategory_companies: usize,
    pub region: usize,
    pub district: usize,
    pub city: usize,
    /// Ordered diagnostics, including deadlock retry notices.
    pub errors: Vec<String>,
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "companies={} regions={} districts={} cities={} categorized={} \
             subcategories={} errors={}",
            self.company,
            self.region,
            self.district,
            self.city,
            self.category,
            self.subcategory,
            self.errors.len()
        )
    }
}

/// Destination of parsed batches. The MySQL implementation is the real one;
/// the in-memory implementation backs worker tests.
pub trait Store {
    /// Materializes one batch. Idempotent: feeding the same rows twice must
    /// leave the store unchanged.
    fn insert(&mut self, rows: &[CompanyRow]) -> Result<()>;

    fn summary(&self) -> Summary;
}

// Tail-cleanup thresholds, kept together so the heuristic can be tuned in
// one place. See `extract_categories`.
const TAIL_LONG_INPUT_CHARS: usize = 540;
const TAIL_SHORT_TOKEN_CHARS: usize = 4;
const TAIL_TRUNCATION_MARKS: [char; 3] = ['/', '-', ','];

/// Splits a comma-separated category list into trimmed tokens, discarding
/// the final token when it looks like an upstream truncation artifact:
/// the input is suspiciously long, the tail is a fragment of fewer than
/// four characters, or it ends mid-phrase in `/`, `-` or `,`.
pub fn extract_categories(raw: &str) -> Vec<String> {
    let tokens: Vec<String> = raw.split(',').map(|token| token.trim().to_string()).collect();
    if tokens.len() < 2 {
        return tokens;
    }

    let last = &tokens[tokens.len() - 1];
    let truncated = raw.chars().count() >= TAIL_LONG_INPUT_CHARS
        || (tokens.len() > 2 && last.chars().count() < TAIL_SHORT_TOKEN_CHARS)
        || last
            .chars()
            .last()
            .map_or(false, |mark| TAIL_TRUNCATION_MARKS.contains(&mark));

    if truncated {
        tokens[..tokens.len() - 1].to_vec()
    } else {
        tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    #[test]
    fn single_token_is_unchanged() {
        assert_eq!(extract_categories("Еда"), vec!["Еда"]);
        assert_eq!(extract_categories(""), vec![""]);
    }

    #[test]
    fn plain_list_splits_and_trims() {
        assert_eq!(extract_categories("Еда, Кафе"), vec!["Еда", "Кафе"]);
    }

    #[test]
    fn trailing_slash_discards_last_token() {
        assert_eq!(extract_categories("A, B, C, D/"), vec!["A", "B", "C"]);
    }

    #[test]
    fn short_tail_among_many_tokens_is_discarded() {
        assert_eq!(extract_categories("A, B, C, xy"), vec!["A", "B", "C"]);
    }

    #[test]
    fn short_tail_of_a_two_token_list_is_kept() {
        assert_eq!(extract_categories("Еда, xy"), vec!["Еда", "xy"]);
    }

    #[test]
    fn four_char_tail_is_kept() {
        assert_eq!(extract_categories("A, B, Кафе"), vec!["A", "B", "Кафе"]);
    }

    #[test]
    fn overlong_input_discards_last_token() {
        let long = format!("{}, хвост", "а".repeat(540));
        assert_eq!(extract_categories(&long), vec!["а".repeat(540)]);
    }

    #[test]
    fn trailing_dash_discards_last_token() {
        assert_eq!(extract_categories("Еда, Кафе-"), vec!["Еда"]);
    }

    #[quickcheck]
    fn at_most_one_token_is_ever_discarded(raw: String) -> bool {
        let split = raw.split(',').count();
        let kept = extract_categories(&raw).len();
        kept == split || kept + 1 == split
    }

    #[test]
    fn region_is_always_preloaded_first() {
        assert_eq!(DICT_PRELOAD_ORDER[0], Dict::Region);
    }
}
