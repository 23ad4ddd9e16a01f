//! Record identity, collections and the shared record contract.
//!
//! Every record in every collection carries a [`RecordId`] assigned at
//! creation. Ids are random UUIDs and are never reused.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::customer::Customer;
use crate::gallery::GalleryPhoto;
use crate::idea::Idea;
use crate::inventory::InventoryItem;
use crate::invoice::Invoice;
use crate::sale::SaleRecord;

/// Globally unique, stable record identifier.
///
/// # Examples
///
/// ```
/// use ledgerkeep::RecordId;
///
/// let id = RecordId::new();
/// assert!(!id.is_nil());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(Uuid);

impl RecordId {
    /// Creates a new random record ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a record ID from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Returns true if this is a nil (all zeros) UUID.
    #[must_use]
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }

    /// Creates a nil record ID. Rejected by the integrity validator.
    #[must_use]
    pub const fn nil() -> Self {
        Self(Uuid::nil())
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for RecordId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// The six top-level collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Inventory,
    Customers,
    Sales,
    Gallery,
    Invoices,
    Ideas,
}

impl Collection {
    /// All collections, in persistence order.
    pub const ALL: [Collection; 6] = [
        Collection::Inventory,
        Collection::Customers,
        Collection::Sales,
        Collection::Gallery,
        Collection::Invoices,
        Collection::Ideas,
    ];

    /// Stable wire name, used for remote endpoints and local keys.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Inventory => "inventory",
            Self::Customers => "customers",
            Self::Sales => "sales",
            Self::Gallery => "gallery",
            Self::Invoices => "invoices",
            Self::Ideas => "ideas",
        }
    }

    /// Position in [`Collection::ALL`].
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Inventory => 0,
            Self::Customers => 1,
            Self::Sales => 2,
            Self::Gallery => 3,
            Self::Invoices => 4,
            Self::Ideas => 5,
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixed-point currency amount in cents.
///
/// Serialized as a decimal number (`12.5`) for compatibility with the remote
/// service; deserialization rounds to the nearest cent and rejects amounts
/// beyond [`Money::MAX`]. Arithmetic saturates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Money(i64);

impl Money {
    /// Zero.
    pub const ZERO: Money = Money(0);

    /// Largest amount whose cents survive the decimal wire format exactly.
    pub const MAX: Money = Money(9_007_199_254_740_991);

    /// Creates an amount from whole cents.
    #[must_use]
    pub const fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    /// Creates an amount from a decimal value, rounding to the nearest cent.
    ///
    /// Values outside the `i64` cent range saturate; see
    /// [`checked_from_decimal`](Self::checked_from_decimal).
    #[must_use]
    pub fn from_decimal(value: f64) -> Self {
        #[allow(clippy::cast_possible_truncation)]
        Self((value * 100.0).round() as i64)
    }

    /// Like [`from_decimal`](Self::from_decimal), but `None` for non-finite
    /// values and amounts beyond `±MAX`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn checked_from_decimal(value: f64) -> Option<Self> {
        let cents = (value * 100.0).round();
        let limit = Self::MAX.0 as f64;
        (cents.is_finite() && (-limit..=limit).contains(&cents)).then(|| Self::from_decimal(value))
    }

    /// Returns the amount in cents.
    #[must_use]
    pub const fn cents(self) -> i64 {
        self.0
    }

    /// Returns the amount as a decimal value.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_decimal(self) -> f64 {
        self.0 as f64 / 100.0
    }

    /// Returns `pct` percent of this amount, rounded to the cent.
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    pub fn percent(self, pct: f64) -> Self {
        Self((self.0 as f64 * pct / 100.0).round() as i64)
    }
}

impl std::ops::Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Money {
        Money(self.0.saturating_add(rhs.0))
    }
}

impl std::ops::Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Money) -> Money {
        Money(self.0.saturating_sub(rhs.0))
    }
}

impl std::ops::Mul<u32> for Money {
    type Output = Money;

    fn mul(self, rhs: u32) -> Money {
        Money(self.0.saturating_mul(i64::from(rhs)))
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, |acc, m| acc + m)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

impl Serialize for Money {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.as_decimal())
    }
}

impl<'de> Deserialize<'de> for Money {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = f64::deserialize(deserializer)?;
        if !value.is_finite() {
            return Err(serde::de::Error::custom("money amount must be finite"));
        }
        Self::checked_from_decimal(value)
            .ok_or_else(|| serde::de::Error::custom(format!("money amount {value} out of range")))
    }
}

/// An encoded image payload (`data:image/<fmt>;base64,<bytes>`).
///
/// Stored verbatim; well-formedness is checked by the integrity validator,
/// not at construction, so corrupt values loaded from storage can be
/// detected and dropped.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageBlob(String);

impl ImageBlob {
    /// Wraps a raw data URL.
    #[must_use]
    pub fn new(data_url: impl Into<String>) -> Self {
        Self(data_url.into())
    }

    /// Returns the raw data URL.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Encoded length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Contract shared by the six record types.
///
/// Ties a record type to its collection and gives the store, the integrity
/// validator and the cleanup pass uniform access to ids, image slots and
/// soft references.
pub trait Record: Clone + fmt::Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// The collection this record type lives in.
    const COLLECTION: Collection;

    /// Records of append-only collections cannot be updated in place.
    const APPEND_ONLY: bool = false;

    /// Stable identity.
    fn id(&self) -> RecordId;

    /// The records of this type inside a dataset.
    fn records(dataset: &Dataset) -> &Vec<Self>;

    /// Mutable access to the records of this type inside a dataset.
    fn records_mut(dataset: &mut Dataset) -> &mut Vec<Self>;

    /// Mutable image slot, for record types that carry one.
    fn image_slot(&mut self) -> Option<&mut Option<ImageBlob>> {
        None
    }

    /// Soft reference to a customer by name.
    fn customer_ref(&self) -> Option<&str> {
        None
    }

    /// Floating point fields that must stay finite.
    fn float_fields(&self) -> Vec<(&'static str, f64)> {
        Vec::new()
    }

    /// Side effects of removing this record from `dataset`.
    ///
    /// Returns the collections touched besides the record's own.
    fn cascade_remove(&self, _dataset: &mut Dataset) -> Vec<Collection> {
        Vec::new()
    }
}

/// Snapshot of all six collections.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub inventory: Vec<InventoryItem>,
    pub customers: Vec<Customer>,
    pub sales: Vec<SaleRecord>,
    pub gallery: Vec<GalleryPhoto>,
    pub invoices: Vec<Invoice>,
    pub ideas: Vec<Idea>,
}

impl Dataset {
    /// Creates an empty dataset.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records in one collection.
    #[must_use]
    pub fn len_of(&self, collection: Collection) -> usize {
        match collection {
            Collection::Inventory => self.inventory.len(),
            Collection::Customers => self.customers.len(),
            Collection::Sales => self.sales.len(),
            Collection::Gallery => self.gallery.len(),
            Collection::Invoices => self.invoices.len(),
            Collection::Ideas => self.ideas.len(),
        }
    }

    /// Record counts for every collection.
    #[must_use]
    pub fn counts(&self) -> BTreeMap<Collection, usize> {
        Collection::ALL.iter().map(|c| (*c, self.len_of(*c))).collect()
    }

    /// Returns true if every collection is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        Collection::ALL.iter().all(|c| self.len_of(*c) == 0)
    }

    /// Serializes one collection as a JSON array.
    ///
    /// # Errors
    /// Returns the serializer error if a record cannot be encoded.
    pub fn collection_json(&self, collection: Collection) -> serde_json::Result<String> {
        match collection {
            Collection::Inventory => serde_json::to_string(&self.inventory),
            Collection::Customers => serde_json::to_string(&self.customers),
            Collection::Sales => serde_json::to_string(&self.sales),
            Collection::Gallery => serde_json::to_string(&self.gallery),
            Collection::Invoices => serde_json::to_string(&self.invoices),
            Collection::Ideas => serde_json::to_string(&self.ideas),
        }
    }
}
