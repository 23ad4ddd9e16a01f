//! Sale records and commission math.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::record::{Collection, Dataset, Money, Record, RecordId};

/// A completed sale.
///
/// `net_price = listed_price - commission_amount`, where the commission is
/// `commission_pct` percent of the listed price rounded to the cent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleRecord {
    pub id: RecordId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_ref: Option<RecordId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_ref: Option<String>,
    pub listed_price: Money,
    pub net_price: Money,
    pub commission_pct: f64,
    pub date_sold: NaiveDate,
}

impl SaleRecord {
    /// Creates a sale dated today, computing the net price.
    ///
    /// # Errors
    /// Returns `CommissionOutOfRange` unless `commission_pct` is in `[0, 100]`.
    pub fn new(listed_price: Money, commission_pct: f64) -> Result<Self, ValidationError> {
        if !(0.0..=100.0).contains(&commission_pct) {
            return Err(ValidationError::CommissionOutOfRange {
                value: commission_pct,
            });
        }
        Ok(Self {
            id: RecordId::new(),
            item_ref: None,
            customer_ref: None,
            listed_price,
            net_price: listed_price - listed_price.percent(commission_pct),
            commission_pct,
            date_sold: Utc::now().date_naive(),
        })
    }

    /// Links the sold item.
    #[must_use]
    pub fn for_item(mut self, item: RecordId) -> Self {
        self.item_ref = Some(item);
        self
    }

    /// Names the buyer.
    #[must_use]
    pub fn for_customer(mut self, name: impl Into<String>) -> Self {
        self.customer_ref = Some(name.into());
        self
    }

    /// Sets the sale date.
    #[must_use]
    pub fn sold_on(mut self, date: NaiveDate) -> Self {
        self.date_sold = date;
        self
    }

    /// The commission withheld from the listed price.
    #[must_use]
    pub fn commission_amount(&self) -> Money {
        self.listed_price - self.net_price
    }
}

impl Record for SaleRecord {
    const COLLECTION: Collection = Collection::Sales;

    fn id(&self) -> RecordId {
        self.id
    }

    fn records(dataset: &Dataset) -> &Vec<Self> {
        &dataset.sales
    }

    fn records_mut(dataset: &mut Dataset) -> &mut Vec<Self> {
        &mut dataset.sales
    }

    fn customer_ref(&self) -> Option<&str> {
        self.customer_ref.as_deref()
    }

    fn float_fields(&self) -> Vec<(&'static str, f64)> {
        vec![("commissionPct", self.commission_pct)]
    }
}
