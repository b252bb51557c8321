//! Field-level updates that keep "leave alone" distinct from "clear".

use chrono::{DateTime, Utc};
use mongodb::bson::{self, doc, Bson, Document};
use serde::Serialize;

/// One field of a patch.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldUpdate<T> {
    Unchanged,
    Set(T),
    Clear,
}

impl<T> Default for FieldUpdate<T> {
    fn default() -> Self {
        FieldUpdate::Unchanged
    }
}

/// `None` means "no new value", never "clear".
impl<T> From<Option<T>> for FieldUpdate<T> {
    fn from(value: Option<T>) -> Self {
        value.map_or(FieldUpdate::Unchanged, FieldUpdate::Set)
    }
}

impl<T: Clone> FieldUpdate<T> {
    pub fn is_unchanged(&self) -> bool {
        matches!(self, FieldUpdate::Unchanged)
    }

    /// Apply to an optional slot.
    pub fn apply_to(&self, slot: &mut Option<T>) {
        match self {
            FieldUpdate::Unchanged => {}
            FieldUpdate::Set(value) => *slot = Some(value.clone()),
            FieldUpdate::Clear => *slot = None,
        }
    }

    /// Apply to a required slot; `Clear` has nothing to clear and is a no-op.
    pub fn apply_to_required(&self, slot: &mut T) {
        if let FieldUpdate::Set(value) = self {
            *slot = value.clone();
        }
    }
}

/// Builds a MongoDB `$set`/`$unset` update out of field updates.
#[derive(Debug, Default)]
pub struct UpdateDocument {
    set: Document,
    unset: Document,
}

impl UpdateDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field<T: Serialize>(
        &mut self,
        name: &str,
        update: &FieldUpdate<T>,
    ) -> Result<&mut Self, bson::ser::Error> {
        match update {
            FieldUpdate::Unchanged => {}
            FieldUpdate::Set(value) => {
                self.set.insert(name, bson::to_bson(value)?);
            }
            FieldUpdate::Clear => {
                self.unset.insert(name, Bson::String(String::new()));
            }
        }
        Ok(self)
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.unset.is_empty()
    }

    /// Finish the update, stamping `updated_at`.
    pub fn finish(mut self, now: DateTime<Utc>) -> Result<Document, bson::ser::Error> {
        self.set.insert("updated_at", bson::to_bson(&now)?);
        let mut update = doc! { "$set": self.set };
        if !self.unset.is_empty() {
            update.insert("$unset", self.unset);
        }
        Ok(update)
    }
}
