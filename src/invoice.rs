//! Invoices.
//!
//! Invoices are derived documents: once issued they are never edited in
//! place, only appended or removed.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::record::{Collection, Dataset, Money, Record, RecordId};

/// One billed line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub description: String,
    pub quantity: u32,
    pub unit_price: Money,
}

impl LineItem {
    /// Creates a line.
    #[must_use]
    pub fn new(description: impl Into<String>, quantity: u32, unit_price: Money) -> Self {
        Self {
            description: description.into(),
            quantity,
            unit_price,
        }
    }

    /// `quantity * unit_price`.
    #[must_use]
    pub fn amount(&self) -> Money {
        self.unit_price * self.quantity
    }
}

/// An issued invoice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invoice {
    pub id: RecordId,
    pub customer_ref: String,
    pub date_issued: NaiveDate,
    pub line_items: Vec<LineItem>,
    pub total: Money,
}

impl Invoice {
    /// Issues an invoice dated today; the total is the sum of the lines.
    #[must_use]
    pub fn new(customer_ref: impl Into<String>, line_items: Vec<LineItem>) -> Self {
        let total = line_items.iter().map(LineItem::amount).sum();
        Self {
            id: RecordId::new(),
            customer_ref: customer_ref.into(),
            date_issued: Utc::now().date_naive(),
            line_items,
            total,
        }
    }
}

impl Record for Invoice {
    const COLLECTION: Collection = Collection::Invoices;
    const APPEND_ONLY: bool = true;

    fn id(&self) -> RecordId {
        self.id
    }

    fn records(dataset: &Dataset) -> &Vec<Self> {
        &dataset.invoices
    }

    fn records_mut(dataset: &mut Dataset) -> &mut Vec<Self> {
        &mut dataset.invoices
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_sums_lines() {
        let invoice = Invoice::new(
            "Ada",
            vec![
                LineItem::new("chair", 2, Money::from_decimal(45.5)),
                LineItem::new("delivery", 1, Money::from_decimal(20.0)),
            ],
        );
        assert_eq!(invoice.total, Money::from_decimal(111.0));
    }
}
