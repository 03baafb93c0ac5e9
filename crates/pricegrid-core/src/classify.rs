//! Label-text classification of fields into print groups.
//!
//! Rules, applied in priority order to the lower-cased label:
//!
//! 1. contains `"black"` → [`PrintGroup::Black`] only
//! 2. contains `"full color"` or `"print color"` → [`PrintGroup::FullColor`] only
//! 3. otherwise → [`Assignment::Shared`], member of every group
//!
//! The shared branch is the default for fields that do not name a color
//! (paper size, quantity, finish). Such fields multiply into every group's
//! combination space rather than being dropped.

use crate::models::{Field, PrintGroup};

const BLACK_KEYWORDS: &[&str] = &["black"];
const FULL_COLOR_KEYWORDS: &[&str] = &["full color", "print color"];

/// Group membership of a single field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assignment {
    /// The label names exactly one group.
    Only(PrintGroup),
    /// No keyword matched; the field belongs to every group.
    Shared,
}

impl Assignment {
    /// The groups this assignment places a field in.
    pub fn groups(self) -> Vec<PrintGroup> {
        match self {
            Assignment::Only(group) => vec![group],
            Assignment::Shared => PrintGroup::ALL.to_vec(),
        }
    }

    pub fn includes(self, group: PrintGroup) -> bool {
        match self {
            Assignment::Only(g) => g == group,
            Assignment::Shared => true,
        }
    }
}

/// Classify a label. A pure function of the label text.
pub fn classify(label: &str) -> Assignment {
    let lower = label.to_lowercase();
    if BLACK_KEYWORDS.iter().any(|k| lower.contains(k)) {
        Assignment::Only(PrintGroup::Black)
    } else if FULL_COLOR_KEYWORDS.iter().any(|k| lower.contains(k)) {
        Assignment::Only(PrintGroup::FullColor)
    } else {
        Assignment::Shared
    }
}

/// Partition fields into `group`'s members, preserving discovery order.
pub fn fields_for(fields: &[Field], group: PrintGroup) -> Vec<Field> {
    fields
        .iter()
        .filter(|f| classify(&f.label).includes(group))
        .cloned()
        .collect()
}
