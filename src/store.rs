//! The Entity Store: owner of the six in-memory collections.
//!
//! All mutation goes through [`EntityStore::mutate`] so the per-collection
//! generation counters stay accurate. Every successful mutation bumps the
//! generation of each collection it touched; the read cache and the sync
//! monitor use those counters to detect staleness without comparing data.
//!
//! Mutations hold the write lock for their whole duration, so readers never
//! observe a half-applied change.

use std::collections::BTreeMap;
use std::sync::RwLock;

use tracing::debug;

use crate::error::StoreError;
use crate::record::{Collection, Dataset, Record, RecordId};

/// A mutation against one collection.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation<R> {
    /// Append a new record.
    Insert(R),
    /// Replace the record with the given id.
    UpdateAt(RecordId, R),
    /// Remove the record with the given id.
    RemoveAt(RecordId),
    /// Replace the whole collection.
    ReplaceAll(Vec<R>),
}

/// State of the affected record(s) before a mutation, for undo and audit.
#[derive(Debug, Clone, PartialEq)]
pub enum Prior<R> {
    /// Nothing existed before (insert).
    Absent,
    /// The single record that was updated or removed.
    Record(R),
    /// The whole collection before a `ReplaceAll`.
    Collection(Vec<R>),
}

impl<R> Prior<R> {
    /// Returns the prior record for `UpdateAt` / `RemoveAt`.
    #[must_use]
    pub fn into_record(self) -> Option<R> {
        match self {
            Self::Record(r) => Some(r),
            Self::Absent | Self::Collection(_) => None,
        }
    }
}

/// Generation counters for a set of collections.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GenerationVector(BTreeMap<Collection, u64>);

impl GenerationVector {
    /// Generation of one collection, if it is part of this vector.
    #[must_use]
    pub fn get(&self, collection: Collection) -> Option<u64> {
        self.0.get(&collection).copied()
    }

    /// Collections covered by this vector.
    pub fn collections(&self) -> impl Iterator<Item = Collection> + '_ {
        self.0.keys().copied()
    }

    /// Restricts the vector to `collections`.
    #[must_use]
    pub fn restrict(&self, collections: &[Collection]) -> Self {
        Self(
            self.0
                .iter()
                .filter(|(c, _)| collections.contains(c))
                .map(|(c, g)| (*c, *g))
                .collect(),
        )
    }
}

/// A consistent copy of all collections with the generations it was taken at.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub dataset: Dataset,
    pub generations: GenerationVector,
}

#[derive(Debug, Default)]
struct StoreState {
    dataset: Dataset,
    generations: [u64; 6],
}

impl StoreState {
    fn bump(&mut self, collection: Collection) {
        self.generations[collection.index()] += 1;
    }

    fn vector(&self, collections: &[Collection]) -> GenerationVector {
        GenerationVector(
            collections
                .iter()
                .map(|c| (*c, self.generations[c.index()]))
                .collect(),
        )
    }
}

fn position<R: Record>(records: &[R], id: RecordId) -> Result<usize, StoreError> {
    records
        .iter()
        .position(|r| r.id() == id)
        .ok_or(StoreError::NotFound {
            collection: R::COLLECTION,
            id,
        })
}

/// Holds the six collections and their generation counters.
#[derive(Debug, Default)]
pub struct EntityStore {
    state: RwLock<StoreState>,
}

impl EntityStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with `dataset` (all generations at zero).
    #[must_use]
    pub fn with_dataset(dataset: Dataset) -> Self {
        Self {
            state: RwLock::new(StoreState {
                dataset,
                generations: [0; 6],
            }),
        }
    }

    /// Applies a mutation to the collection of `R`.
    ///
    /// Returns the pre-mutation state of the affected record(s).
    ///
    /// # Errors
    /// - `DuplicateId` if an inserted record's id already exists
    /// - `NotFound` if an update or removal targets an unknown id
    /// - `IdMismatch` if an update carries a different id than its target
    /// - `AppendOnly` if an update targets an append-only collection
    pub fn mutate<R: Record>(&self, mutation: Mutation<R>) -> Result<Prior<R>, StoreError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| StoreError::Poisoned { context: "store.mutate" })?;

        let (prior, touched) = match mutation {
            Mutation::Insert(record) => {
                let records = R::records_mut(&mut state.dataset);
                let id = record.id();
                if records.iter().any(|r| r.id() == id) {
                    return Err(StoreError::DuplicateId {
                        collection: R::COLLECTION,
                        id,
                    });
                }
                records.push(record);
                (Prior::Absent, Vec::new())
            }
            Mutation::UpdateAt(id, record) => {
                if R::APPEND_ONLY {
                    return Err(StoreError::AppendOnly {
                        collection: R::COLLECTION,
                    });
                }
                if record.id() != id {
                    return Err(StoreError::IdMismatch {
                        target: id,
                        actual: record.id(),
                    });
                }
                let records = R::records_mut(&mut state.dataset);
                let idx = position(records, id)?;
                let old = std::mem::replace(&mut records[idx], record);
                (Prior::Record(old), Vec::new())
            }
            Mutation::RemoveAt(id) => {
                let records = R::records_mut(&mut state.dataset);
                let idx = position(records, id)?;
                let old = records.remove(idx);
                let touched = old.cascade_remove(&mut state.dataset);
                (Prior::Record(old), touched)
            }
            Mutation::ReplaceAll(records) => {
                let old = std::mem::replace(R::records_mut(&mut state.dataset), records);
                (Prior::Collection(old), Vec::new())
            }
        };

        state.bump(R::COLLECTION);
        for collection in &touched {
            state.bump(*collection);
        }
        debug!(
            collection = %R::COLLECTION,
            generation = state.generations[R::COLLECTION.index()],
            cascaded = touched.len(),
            "mutation applied"
        );
        Ok(prior)
    }

    /// Applies `f` to a copy of the record with `id` and stores the result.
    ///
    /// Convenience over [`Mutation::UpdateAt`]; returns the prior record.
    ///
    /// # Errors
    /// Same as [`EntityStore::mutate`].
    pub fn update<R: Record>(&self, id: RecordId, f: impl FnOnce(&mut R)) -> Result<R, StoreError> {
        let mut record = self.get::<R>(id)?.ok_or(StoreError::NotFound {
            collection: R::COLLECTION,
            id,
        })?;
        f(&mut record);
        let prior = self.mutate(Mutation::UpdateAt(id, record))?;
        prior.into_record().ok_or(StoreError::NotFound {
            collection: R::COLLECTION,
            id,
        })
    }

    /// Returns a copy of the collection of `R`, in insertion order.
    ///
    /// # Errors
    /// Returns `Poisoned` if the lock was poisoned.
    pub fn list<R: Record>(&self) -> Result<Vec<R>, StoreError> {
        let state = self
            .state
            .read()
            .map_err(|_| StoreError::Poisoned { context: "store.list" })?;
        Ok(R::records(&state.dataset).clone())
    }

    /// Returns a copy of one record.
    ///
    /// # Errors
    /// Returns `Poisoned` if the lock was poisoned.
    pub fn get<R: Record>(&self, id: RecordId) -> Result<Option<R>, StoreError> {
        let state = self
            .state
            .read()
            .map_err(|_| StoreError::Poisoned { context: "store.get" })?;
        Ok(R::records(&state.dataset).iter().find(|r| r.id() == id).cloned())
    }

    /// Runs `f` over the collection of `R` without copying it.
    ///
    /// # Errors
    /// Returns `Poisoned` if the lock was poisoned.
    pub fn read<R: Record, T>(&self, f: impl FnOnce(&[R]) -> T) -> Result<T, StoreError> {
        let state = self
            .state
            .read()
            .map_err(|_| StoreError::Poisoned { context: "store.read" })?;
        Ok(f(R::records(&state.dataset)))
    }

    /// Runs `f` over the whole dataset together with the generations of `collections`.
    ///
    /// # Errors
    /// Returns `Poisoned` if the lock was poisoned.
    pub fn read_all<T>(
        &self,
        collections: &[Collection],
        f: impl FnOnce(&Dataset) -> T,
    ) -> Result<(T, GenerationVector), StoreError> {
        let state = self
            .state
            .read()
            .map_err(|_| StoreError::Poisoned { context: "store.read_all" })?;
        Ok((f(&state.dataset), state.vector(collections)))
    }

    /// Current generation vector for `collections`.
    ///
    /// # Errors
    /// Returns `Poisoned` if the lock was poisoned.
    pub fn generations(&self, collections: &[Collection]) -> Result<GenerationVector, StoreError> {
        let state = self
            .state
            .read()
            .map_err(|_| StoreError::Poisoned { context: "store.generations" })?;
        Ok(state.vector(collections))
    }

    /// A consistent copy of all six collections.
    ///
    /// # Errors
    /// Returns `Poisoned` if the lock was poisoned.
    pub fn snapshot(&self) -> Result<Snapshot, StoreError> {
        let state = self
            .state
            .read()
            .map_err(|_| StoreError::Poisoned { context: "store.snapshot" })?;
        Ok(Snapshot {
            dataset: state.dataset.clone(),
            generations: state.vector(&Collection::ALL),
        })
    }

    /// Replaces all six collections at once, bumping every generation.
    ///
    /// Returns the dataset that was replaced.
    ///
    /// # Errors
    /// Returns `Poisoned` if the lock was poisoned.
    pub fn replace_dataset(&self, dataset: Dataset) -> Result<Dataset, StoreError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| StoreError::Poisoned { context: "store.replace_dataset" })?;
        let old = std::mem::replace(&mut state.dataset, dataset);
        for collection in Collection::ALL {
            state.bump(collection);
        }
        debug!("dataset replaced");
        Ok(old)
    }
}
