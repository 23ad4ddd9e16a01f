//! Integrity validation before every durable save and on every load.
//!
//! Two families of checks:
//!
//! - **Structural** (fatal): a collection missing or not a sequence, a record
//!   that does not decode, nil or duplicate ids, non-finite numbers. These
//!   block the save (or the restore) with a [`ValidationError`].
//! - **Per-field** (degrading): an image payload that is not a well-formed
//!   encoded image is dropped from its record and reported as a
//!   [`IssueKind::CorruptBlob`]; a customer reference that names no customer
//!   is reported as [`IssueKind::DanglingCustomerRef`]. Neither blocks.

use std::collections::HashSet;
use std::sync::OnceLock;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use regex::Regex;
use serde::Serialize;
use serde_json::Value as Json;

use crate::error::ValidationError;
use crate::record::{Collection, Dataset, ImageBlob, Record, RecordId};

/// Kind of a non-fatal finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// An image payload was malformed and has been dropped.
    CorruptBlob,
    /// A soft customer reference matches no customer.
    DanglingCustomerRef,
}

/// A non-fatal finding attached to one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntegrityIssue {
    pub kind: IssueKind,
    pub collection: Collection,
    pub record: RecordId,
    pub detail: String,
}

/// Outcome of a successful validation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IntegrityReport {
    pub issues: Vec<IntegrityIssue>,
}

impl IntegrityReport {
    /// Number of image payloads that were dropped.
    #[must_use]
    pub fn dropped_blobs(&self) -> usize {
        self.issues
            .iter()
            .filter(|i| i.kind == IssueKind::CorruptBlob)
            .count()
    }

    /// Returns true when nothing was found.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

fn data_url_pattern() -> Result<&'static Regex, String> {
    static PATTERN: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^data:image/(png|jpeg|jpg|gif|webp|bmp);base64,([A-Za-z0-9+/=\r\n]+)$"))
        .as_ref()
        .map_err(|e| format!("data URL pattern unavailable: {e}"))
}

fn magic_matches(format: &str, bytes: &[u8]) -> bool {
    match format {
        "png" => bytes.starts_with(&[0x89, b'P', b'N', b'G']),
        "jpeg" | "jpg" => bytes.starts_with(&[0xFF, 0xD8, 0xFF]),
        "gif" => bytes.starts_with(b"GIF8"),
        "webp" => bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP",
        _ => true,
    }
}

/// Checks that `blob` is a well-formed, non-empty encoded image.
///
/// # Errors
/// Returns a human-readable reason when the payload is malformed.
pub fn check_blob(blob: &ImageBlob) -> Result<(), String> {
    let caps = data_url_pattern()?
        .captures(blob.as_str())
        .ok_or_else(|| "not an image data URL".to_string())?;
    let format = caps.get(1).map_or("", |m| m.as_str());
    let payload: String = caps
        .get(2)
        .map_or("", |m| m.as_str())
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    let bytes = STANDARD
        .decode(payload.as_bytes())
        .map_err(|e| format!("base64 payload does not decode: {e}"))?;
    if bytes.is_empty() {
        return Err("empty image payload".to_string());
    }
    if !magic_matches(format, &bytes) {
        return Err(format!("payload is not a {format} image"));
    }
    Ok(())
}

/// Validates datasets before they are persisted or adopted.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntegrityValidator;

impl IntegrityValidator {
    /// Creates a validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a typed dataset in place.
    ///
    /// Corrupt image payloads are removed from `dataset`; every removal and
    /// every dangling customer reference is returned as an issue.
    ///
    /// # Errors
    /// Returns the first structural problem found; `dataset` may have had
    /// blobs stripped before the error was detected.
    pub fn validate(&self, dataset: &mut Dataset) -> Result<IntegrityReport, ValidationError> {
        let mut report = IntegrityReport::default();
        check_collection(&mut dataset.inventory, &mut report)?;
        check_collection(&mut dataset.customers, &mut report)?;
        check_collection(&mut dataset.sales, &mut report)?;
        check_collection(&mut dataset.gallery, &mut report)?;
        check_collection(&mut dataset.invoices, &mut report)?;
        check_collection(&mut dataset.ideas, &mut report)?;
        check_references(dataset, &mut report);
        Ok(report)
    }

    /// Validates a raw JSON payload and decodes it into a dataset.
    ///
    /// The payload must be an object holding all six collections as arrays
    /// of records. After decoding, the typed checks of
    /// [`IntegrityValidator::validate`] run as well.
    ///
    /// # Errors
    /// Returns the first structural problem found.
    pub fn validate_raw(&self, payload: &Json) -> Result<(Dataset, IntegrityReport), ValidationError> {
        let Json::Object(map) = payload else {
            return Err(ValidationError::NotAnObject {
                reason: format!("found {}", json_kind(payload)),
            });
        };

        let mut dataset = Dataset::new();
        for collection in Collection::ALL {
            let value = map
                .get(collection.as_str())
                .ok_or(ValidationError::MissingCollection { collection })?;
            decode_into(collection, value, &mut dataset)?;
        }

        let report = self.validate(&mut dataset)?;
        Ok((dataset, report))
    }

    /// Decodes a single collection payload (as returned by the remote service).
    ///
    /// # Errors
    /// Returns `NotASequence` or `MalformedRecord` on shape problems.
    pub fn decode_collection(
        &self,
        collection: Collection,
        value: &Json,
        into: &mut Dataset,
    ) -> Result<(), ValidationError> {
        decode_into(collection, value, into)
    }
}

fn json_kind(value: &Json) -> &'static str {
    match value {
        Json::Null => "null",
        Json::Bool(_) => "boolean",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}

fn decode_records<R: Record>(value: &Json) -> Result<Vec<R>, ValidationError> {
    let Json::Array(items) = value else {
        return Err(ValidationError::NotASequence {
            collection: R::COLLECTION,
            found: json_kind(value).to_string(),
        });
    };
    items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            if !item.is_object() {
                return Err(ValidationError::MalformedRecord {
                    collection: R::COLLECTION,
                    index,
                    reason: format!("expected object, found {}", json_kind(item)),
                });
            }
            <R as serde::Deserialize>::deserialize(item).map_err(|e| ValidationError::MalformedRecord {
                collection: R::COLLECTION,
                index,
                reason: e.to_string(),
            })
        })
        .collect()
}

fn decode_into(collection: Collection, value: &Json, dataset: &mut Dataset) -> Result<(), ValidationError> {
    match collection {
        Collection::Inventory => dataset.inventory = decode_records(value)?,
        Collection::Customers => dataset.customers = decode_records(value)?,
        Collection::Sales => dataset.sales = decode_records(value)?,
        Collection::Gallery => dataset.gallery = decode_records(value)?,
        Collection::Invoices => dataset.invoices = decode_records(value)?,
        Collection::Ideas => dataset.ideas = decode_records(value)?,
    }
    Ok(())
}

fn check_collection<R: Record>(records: &mut [R], report: &mut IntegrityReport) -> Result<(), ValidationError> {
    let mut seen = HashSet::with_capacity(records.len());
    for record in records.iter_mut() {
        let id = record.id();
        if id.is_nil() {
            return Err(ValidationError::NilId {
                collection: R::COLLECTION,
            });
        }
        if !seen.insert(id) {
            return Err(ValidationError::DuplicateId {
                collection: R::COLLECTION,
                id,
            });
        }
        if let Some((field, _)) = record.float_fields().into_iter().find(|(_, v)| !v.is_finite()) {
            return Err(ValidationError::NonFiniteNumber {
                collection: R::COLLECTION,
                id,
                field,
            });
        }
        if let Some(slot) = record.image_slot() {
            let reason = slot.as_ref().and_then(|blob| check_blob(blob).err());
            if let Some(reason) = reason {
                *slot = None;
                report.issues.push(IntegrityIssue {
                    kind: IssueKind::CorruptBlob,
                    collection: R::COLLECTION,
                    record: id,
                    detail: reason,
                });
            }
        }
    }
    Ok(())
}

fn check_references(dataset: &Dataset, report: &mut IntegrityReport) {
    let known: HashSet<&str> = dataset.customers.iter().map(|c| c.name.as_str()).collect();
    let refs = dataset
        .inventory
        .iter()
        .map(|r| (Collection::Inventory, r.id, r.customer_ref.as_deref()))
        .chain(
            dataset
                .sales
                .iter()
                .map(|r| (Collection::Sales, r.id, r.customer_ref.as_deref())),
        );
    for (collection, record, name) in refs {
        let Some(name) = name else { continue };
        if !known.contains(name) {
            report.issues.push(IntegrityIssue {
                kind: IssueKind::DanglingCustomerRef,
                collection,
                record,
                detail: format!("customer '{name}' does not exist"),
            });
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// A 1x1 transparent PNG.
    pub(crate) const PNG_DATA_URL: &str = "data:image/png;base64,iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==";

    pub(crate) fn png() -> ImageBlob {
        ImageBlob::new(PNG_DATA_URL)
    }

    /// A PNG-signed payload padded to roughly `bytes` decoded bytes.
    pub(crate) fn large_png(bytes: usize) -> ImageBlob {
        let mut raw = vec![0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1A, b'\n'];
        raw.resize(bytes.max(raw.len()), 0);
        ImageBlob::new(format!("data:image/png;base64,{}", STANDARD.encode(raw)))
    }
}
