//! Query predicates, cache keys and derived summaries.
//!
//! A [`Filter`] is a conjunction of field matchers evaluated over a record's
//! serialized field map, so the same filter type works for every
//! collection. Its canonical JSON is hashed into a [`QueryKey`] for the read
//! cache.

use std::collections::BTreeMap;
use std::fmt;

use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::error::ValidationError;
use crate::inventory::{InventoryItem, ItemStatus};
use crate::record::{Collection, Dataset, Money, Record};
use crate::sale::SaleRecord;

/// How a single field is matched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "op", content = "value", rename_all = "snake_case")]
pub enum Matcher {
    /// Exact string (or number rendered as string) equality.
    Equals(String),
    /// Case-insensitive substring match.
    Contains(String),
    /// Case-insensitive regular expression.
    Regex(String),
    /// Field missing or null.
    Absent,
}

/// One field condition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldFilter {
    /// Wire name of the field (`customerRef`, `status`, ...).
    pub field: String,
    pub matcher: Matcher,
}

/// A conjunction of field conditions. The empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Filter {
    pub conditions: Vec<FieldFilter>,
}

fn field_text(value: &Json) -> Option<String> {
    match value {
        Json::Null => None,
        Json::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

impl Filter {
    /// Matches everything.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    fn with(mut self, field: &str, matcher: Matcher) -> Self {
        self.conditions.push(FieldFilter {
            field: field.to_string(),
            matcher,
        });
        self
    }

    /// Adds an equality condition.
    #[must_use]
    pub fn equals(self, field: &str, value: impl Into<String>) -> Self {
        self.with(field, Matcher::Equals(value.into()))
    }

    /// Adds a case-insensitive substring condition.
    #[must_use]
    pub fn contains(self, field: &str, needle: impl Into<String>) -> Self {
        self.with(field, Matcher::Contains(needle.into()))
    }

    /// Adds a regular expression condition.
    #[must_use]
    pub fn regex(self, field: &str, pattern: impl Into<String>) -> Self {
        self.with(field, Matcher::Regex(pattern.into()))
    }

    /// Adds an absence condition.
    #[must_use]
    pub fn absent(self, field: &str) -> Self {
        self.with(field, Matcher::Absent)
    }

    /// Stable signature of this filter: blake3 of its canonical JSON.
    #[must_use]
    pub fn signature(&self) -> String {
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        blake3::hash(&canonical).to_hex()[..16].to_string()
    }

    /// Compiles the filter into a predicate over records.
    ///
    /// # Errors
    /// Returns `MalformedRecord` for an invalid regular expression; the
    /// collection is reported for context.
    pub fn compile<R: Record>(&self) -> Result<CompiledFilter, ValidationError> {
        let mut conditions = Vec::with_capacity(self.conditions.len());
        for cond in &self.conditions {
            let test = match &cond.matcher {
                Matcher::Equals(v) => Test::Equals(v.clone()),
                Matcher::Contains(v) => Test::Contains(v.to_lowercase()),
                Matcher::Regex(p) => Test::Regex(
                    RegexBuilder::new(p)
                        .case_insensitive(true)
                        .build()
                        .map_err(|e| ValidationError::MalformedRecord {
                            collection: R::COLLECTION,
                            index: 0,
                            reason: format!("invalid filter pattern: {e}"),
                        })?,
                ),
                Matcher::Absent => Test::Absent,
            };
            conditions.push((cond.field.clone(), test));
        }
        Ok(CompiledFilter { conditions })
    }
}

#[derive(Debug)]
enum Test {
    Equals(String),
    Contains(String),
    Regex(regex::Regex),
    Absent,
}

/// A filter ready for evaluation.
#[derive(Debug)]
pub struct CompiledFilter {
    conditions: Vec<(String, Test)>,
}

impl CompiledFilter {
    /// Evaluates the filter against one record.
    #[must_use]
    pub fn matches<R: Record>(&self, record: &R) -> bool {
        if self.conditions.is_empty() {
            return true;
        }
        let Ok(Json::Object(fields)) = serde_json::to_value(record) else {
            return false;
        };
        self.conditions.iter().all(|(field, test)| {
            let text = fields.get(field).and_then(field_text);
            match (test, text) {
                (Test::Absent, None) => true,
                (Test::Absent, Some(_)) | (_, None) => false,
                (Test::Equals(v), Some(t)) => *v == t,
                (Test::Contains(v), Some(t)) => t.to_lowercase().contains(v.as_str()),
                (Test::Regex(re), Some(t)) => re.is_match(&t),
            }
        })
    }
}

/// Cache key: the query kind plus the collections it reads.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKey {
    name: String,
    reads: Vec<Collection>,
}

impl QueryKey {
    /// Key for a filtered listing of one collection.
    #[must_use]
    pub fn filtered(collection: Collection, filter: &Filter) -> Self {
        Self {
            name: format!("{collection}:{}", filter.signature()),
            reads: vec![collection],
        }
    }

    /// Key for a derived query over several collections.
    #[must_use]
    pub fn derived(name: &str, reads: &[Collection]) -> Self {
        let mut reads = reads.to_vec();
        reads.sort();
        reads.dedup();
        Self {
            name: name.to_string(),
            reads,
        }
    }

    /// Collections whose generations the cached result depends on.
    #[must_use]
    pub fn reads(&self) -> &[Collection] {
        &self.reads
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Sales totals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SalesSummary {
    pub count: usize,
    pub gross: Money,
    pub commission: Money,
    pub net: Money,
}

/// Totals over all sale records; sums saturate at the `Money` bounds.
#[must_use]
pub fn sales_summary(sales: &[SaleRecord]) -> SalesSummary {
    sales.iter().fold(SalesSummary::default(), |mut acc, s| {
        acc.count += 1;
        acc.gross = acc.gross + s.listed_price;
        acc.commission = acc.commission + s.commission_amount();
        acc.net = acc.net + s.net_price;
        acc
    })
}

/// Item counts per status.
#[must_use]
pub fn status_counts(items: &[InventoryItem]) -> BTreeMap<ItemStatus, usize> {
    let mut counts = BTreeMap::new();
    for item in items {
        *counts.entry(item.status).or_insert(0) += 1;
    }
    counts
}

/// Customer names referenced by items or sales that match no customer.
#[must_use]
pub fn dangling_customer_refs(dataset: &Dataset) -> Vec<String> {
    let known: std::collections::HashSet<&str> =
        dataset.customers.iter().map(|c| c.name.as_str()).collect();
    let mut dangling: Vec<String> = dataset
        .inventory
        .iter()
        .filter_map(|item| item.customer_ref.as_deref())
        .chain(dataset.sales.iter().filter_map(|sale| sale.customer_ref.as_deref()))
        .filter(|name| !known.contains(name))
        .map(str::to_string)
        .collect();
    dangling.sort();
    dangling.dedup();
    dangling
}
