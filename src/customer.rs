//! Customers.
//!
//! A customer's `name` is the de-facto join key: inventory items and sale
//! records refer to customers by name, not by id.

use serde::{Deserialize, Serialize};

use crate::record::{Collection, Dataset, Record, RecordId};

/// A customer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub id: RecordId,
    pub name: String,
    #[serde(default)]
    pub contact: String,
    #[serde(default)]
    pub location: String,
}

impl Customer {
    /// Creates a customer with a fresh id.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: RecordId::new(),
            name: name.into(),
            contact: String::new(),
            location: String::new(),
        }
    }

    /// Sets contact details.
    #[must_use]
    pub fn with_contact(mut self, contact: impl Into<String>) -> Self {
        self.contact = contact.into();
        self
    }

    /// Sets the location.
    #[must_use]
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }
}

impl Record for Customer {
    const COLLECTION: Collection = Collection::Customers;

    fn id(&self) -> RecordId {
        self.id
    }

    fn records(dataset: &Dataset) -> &Vec<Self> {
        &dataset.customers
    }

    fn records_mut(dataset: &mut Dataset) -> &mut Vec<Self> {
        &mut dataset.customers
    }

    /// Removing a customer also removes the items and sales that name them.
    fn cascade_remove(&self, dataset: &mut Dataset) -> Vec<Collection> {
        let name = self.name.as_str();
        let mut touched = Vec::new();

        let before = dataset.inventory.len();
        dataset.inventory.retain(|item| item.customer_ref.as_deref() != Some(name));
        if dataset.inventory.len() != before {
            touched.push(Collection::Inventory);
        }

        let before = dataset.sales.len();
        dataset.sales.retain(|sale| sale.customer_ref.as_deref() != Some(name));
        if dataset.sales.len() != before {
            touched.push(Collection::Sales);
        }

        touched
    }
}
