//! Inventory items: commissioned projects and stocked supplies.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::record::{Collection, Dataset, ImageBlob, Money, Record, RecordId};

/// Whether an item is commissioned work or a stocked supply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Project,
    Inventory,
}

/// Item lifecycle state.
///
/// Projects move `pending → in-progress → completed → sold`; stocked
/// supplies start at `inventory` and can only be sold. Transitions are
/// user-driven; the store does not reject backwards moves, but every
/// change is appended to the item's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ItemStatus {
    Pending,
    InProgress,
    Completed,
    Sold,
    Inventory,
}

impl ItemStatus {
    /// The next state on the default lifecycle; `None` once sold.
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Pending => Some(Self::InProgress),
            Self::InProgress => Some(Self::Completed),
            Self::Completed | Self::Inventory => Some(Self::Sold),
            Self::Sold => None,
        }
    }

    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in-progress",
            Self::Completed => "completed",
            Self::Sold => "sold",
            Self::Inventory => "inventory",
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of an item's status history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChange {
    pub status: ItemStatus,
    pub at: DateTime<Utc>,
}

/// A project or stocked supply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryItem {
    pub id: RecordId,
    pub kind: ItemKind,
    pub description: String,
    pub quantity: u32,
    pub price: Money,
    pub status: ItemStatus,
    #[serde(default)]
    pub status_history: Vec<StatusChange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
    #[serde(default)]
    pub notes: String,
    #[serde(default, rename = "imageBlobRef", skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageBlob>,
    pub created_at: DateTime<Utc>,
}

impl InventoryItem {
    fn with_status(kind: ItemKind, status: ItemStatus, description: impl Into<String>, price: Money) -> Self {
        let now = Utc::now();
        Self {
            id: RecordId::new(),
            kind,
            description: description.into(),
            quantity: 1,
            price,
            status,
            status_history: vec![StatusChange { status, at: now }],
            customer_ref: None,
            due_date: None,
            notes: String::new(),
            image: None,
            created_at: now,
        }
    }

    /// A commissioned project, starting at `pending`.
    #[must_use]
    pub fn new_project(description: impl Into<String>, price: Money) -> Self {
        Self::with_status(ItemKind::Project, ItemStatus::Pending, description, price)
    }

    /// A stocked supply, starting at `inventory`.
    #[must_use]
    pub fn new_stock(description: impl Into<String>, quantity: u32, price: Money) -> Self {
        let mut item = Self::with_status(ItemKind::Inventory, ItemStatus::Inventory, description, price);
        item.quantity = quantity;
        item
    }

    /// Sets the customer this item is made for.
    #[must_use]
    pub fn for_customer(mut self, name: impl Into<String>) -> Self {
        self.customer_ref = Some(name.into());
        self
    }

    /// Sets the due date.
    #[must_use]
    pub fn due(mut self, date: NaiveDate) -> Self {
        self.due_date = Some(date);
        self
    }

    /// Attaches an image payload.
    #[must_use]
    pub fn with_image(mut self, image: ImageBlob) -> Self {
        self.image = Some(image);
        self
    }

    /// Moves to `status`, recording the change.
    pub fn set_status(&mut self, status: ItemStatus) {
        if self.status == status {
            return;
        }
        self.status = status;
        self.status_history.push(StatusChange {
            status,
            at: Utc::now(),
        });
    }

    /// Moves one step along the default lifecycle.
    ///
    /// Returns the new status, or `None` if the item is already sold.
    pub fn advance_status(&mut self) -> Option<ItemStatus> {
        let next = self.status.next()?;
        self.set_status(next);
        Some(next)
    }
}

impl Record for InventoryItem {
    const COLLECTION: Collection = Collection::Inventory;

    fn id(&self) -> RecordId {
        self.id
    }

    fn records(dataset: &Dataset) -> &Vec<Self> {
        &dataset.inventory
    }

    fn records_mut(dataset: &mut Dataset) -> &mut Vec<Self> {
        &mut dataset.inventory
    }

    fn image_slot(&mut self) -> Option<&mut Option<ImageBlob>> {
        Some(&mut self.image)
    }

    fn customer_ref(&self) -> Option<&str> {
        self.customer_ref.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_lifecycle() {
        let mut item = InventoryItem::new_project("oak table", Money::from_decimal(450.0));
        assert_eq!(item.status, ItemStatus::Pending);
        assert_eq!(item.advance_status(), Some(ItemStatus::InProgress));
        assert_eq!(item.advance_status(), Some(ItemStatus::Completed));
        assert_eq!(item.advance_status(), Some(ItemStatus::Sold));
        assert_eq!(item.advance_status(), None);

        let history: Vec<_> = item.status_history.iter().map(|c| c.status).collect();
        assert_eq!(
            history,
            [ItemStatus::Pending, ItemStatus::InProgress, ItemStatus::Completed, ItemStatus::Sold]
        );
    }

    #[test]
    fn test_stock_goes_straight_to_sold() {
        let mut item = InventoryItem::new_stock("walnut oil", 12, Money::from_decimal(9.5));
        assert_eq!(item.kind, ItemKind::Inventory);
        assert_eq!(item.status, ItemStatus::Inventory);
        assert_eq!(item.advance_status(), Some(ItemStatus::Sold));
    }

    #[test]
    fn test_backwards_move_keeps_history() {
        let mut item = InventoryItem::new_project("chair", Money::from_decimal(120.0));
        item.advance_status();
        item.set_status(ItemStatus::Pending);
        assert_eq!(item.status_history.len(), 3);
    }

    #[test]
    fn test_wire_shape() {
        let item = InventoryItem::new_project("bench", Money::from_decimal(80.0)).for_customer("Ada");
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["status"], "pending");
        assert_eq!(json["customerRef"], "Ada");
        assert_eq!(json["kind"], "project");
        assert!(json.get("imageBlobRef").is_none());
    }
}
