//! Core data models shared by the extractor, generator, and synchronizer.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Control type carried by `<select>` fields.
pub const SELECT_KIND: &str = "select";

/// Group name used when a product form is synchronized as a single partition.
pub const SINGLE_GROUP: &str = "All";

/// One dropdown (or other control) discovered in the source document.
///
/// Fields are rebuilt on every scrape and never merged; only the
/// combinations derived from them are reconciled against stored state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    /// `name` attribute of the control. Not unique across groups.
    pub name: String,
    /// Caption text, used for classification and display.
    pub label: String,
    /// `type` attribute, or the tag name when absent (`"select"`, `"textarea"`).
    pub kind: String,
    /// Trimmed, non-empty option texts in document order.
    #[serde(default)]
    pub options: Vec<String>,
}

impl Field {
    pub fn is_select(&self) -> bool {
        self.kind == SELECT_KIND
    }
}

/// The two print-color partitions recognised by label classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PrintGroup {
    #[serde(rename = "Full Color")]
    FullColor,
    #[serde(rename = "Black")]
    Black,
}

impl PrintGroup {
    /// Every group, in the order scrapes synchronize them.
    pub const ALL: [PrintGroup; 2] = [PrintGroup::FullColor, PrintGroup::Black];

    pub fn name(self) -> &'static str {
        match self {
            PrintGroup::FullColor => "Full Color",
            PrintGroup::Black => "Black",
        }
    }
}

impl fmt::Display for PrintGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Partition key of the combinations table: one product, one group.
///
/// Every stored combination carries its key as plain columns, so all
/// products share one uniform table instead of a table per form.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupKey {
    pub product: String,
    pub group: String,
}

impl GroupKey {
    pub fn new(product: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            product: product.into(),
            group: group.into(),
        }
    }

    /// Whether `selector` names this key, either by group name alone
    /// (`"Black"`) or in full (`"mailer/Black"`).
    pub fn matches(&self, selector: &str) -> bool {
        selector == self.group || selector == self.to_string()
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.product, self.group)
    }
}

/// A persisted combination: one option tuple of a group plus its price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Combination {
    /// Storage-assigned id. Not part of the combination's identity.
    pub id: String,
    pub product: String,
    pub group: String,
    /// Option values positionally aligned with the group's select fields.
    pub options: Vec<String>,
    /// Operator-edited price; `0` for newly discovered tuples.
    pub price: f64,
}

impl Combination {
    pub fn key(&self) -> GroupKey {
        GroupKey::new(self.product.clone(), self.group.clone())
    }

    /// Identity of this combination within its group.
    pub fn tuple_key(&self) -> String {
        tuple_key(&self.options)
    }
}

/// A combination that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCombination {
    pub product: String,
    pub group: String,
    pub options: Vec<String>,
    pub price: f64,
}

impl NewCombination {
    /// A freshly discovered tuple, priced at zero.
    pub fn unpriced(key: &GroupKey, options: Vec<String>) -> Self {
        Self {
            product: key.product.clone(),
            group: key.group.clone(),
            options,
            price: 0.0,
        }
    }
}

/// Serialize an option tuple into its identity key.
///
/// The key is the JSON array encoding of the tuple, so it is
/// order-sensitive and unambiguous for values containing separators:
/// `["A","X"]` and `["X","A"]` produce different keys.
pub fn tuple_key(options: &[String]) -> String {
    serde_json::to_string(options).unwrap_or_else(|_| options.join("\u{1f}"))
}
