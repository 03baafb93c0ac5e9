//! Combination generator: the Cartesian product of a group's option lists.
//!
//! Output is deterministic. Tuples are produced in odometer order (the
//! last field varies fastest) and each tuple is positionally aligned with
//! the input field order. Downstream reconciliation matches tuples by
//! value, never by position in this output.
//!
//! # Example
//!
//! ```rust
//! use pricegrid_core::combine::cartesian;
//!
//! let lists = vec![
//!     vec!["A".to_string(), "B".to_string()],
//!     vec!["1".to_string(), "2".to_string(), "3".to_string()],
//! ];
//! let combos = cartesian(&lists);
//! assert_eq!(combos.len(), 6);
//! assert_eq!(combos[0], vec!["A", "1"]);
//! assert_eq!(combos[5], vec!["B", "3"]);
//! ```

use crate::models::Field;

/// Every choice-tuple across `lists`.
///
/// Returns an empty vector (not a single empty tuple) when `lists` is
/// empty, and an empty vector when any list is empty.
pub fn cartesian(lists: &[Vec<String>]) -> Vec<Vec<String>> {
    if lists.is_empty() {
        return Vec::new();
    }

    let mut acc: Vec<Vec<String>> = vec![Vec::with_capacity(lists.len())];
    for list in lists {
        let mut next = Vec::with_capacity(acc.len().saturating_mul(list.len()));
        for prefix in &acc {
            for option in list {
                let mut tuple = prefix.clone();
                tuple.push(option.clone());
                next.push(tuple);
            }
        }
        acc = next;
    }
    acc
}

/// Option lists of the select fields in `fields`, in field order.
pub fn option_lists(fields: &[Field]) -> Vec<Vec<String>> {
    fields
        .iter()
        .filter(|f| f.is_select())
        .map(|f| {
            f.options
                .iter()
                .map(|o| o.trim())
                .filter(|o| !o.is_empty())
                .map(str::to_string)
                .collect()
        })
        .collect()
}

/// Number of tuples [`cartesian`] would produce, saturating at `usize::MAX`.
pub fn expected_count(lists: &[Vec<String>]) -> usize {
    if lists.is_empty() {
        return 0;
    }
    lists
        .iter()
        .fold(1usize, |n, list| n.saturating_mul(list.len()))
}
