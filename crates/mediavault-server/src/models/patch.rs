//! Explicit-presence field updates.
//!
//! A partial update distinguishes "leave as is", "set to null" and "set to a
//! value". In JSON an absent key is `Unchanged`, `null` is `Clear` and any
//! other value is `Set`; struct fields must carry `#[serde(default)]` for the
//! absent case to work.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// One optional field of a partial update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field<T> {
    /// Leave the stored value untouched.
    Unchanged,
    /// Set the stored value to null.
    Clear,
    /// Replace the stored value.
    Set(T),
}

impl<T> Default for Field<T> {
    fn default() -> Self {
        Field::Unchanged
    }
}

impl<T> Field<T> {
    pub fn is_unchanged(&self) -> bool {
        matches!(self, Field::Unchanged)
    }

    /// Applies the update to a nullable slot.
    pub fn apply_to(&self, slot: &mut Option<T>)
    where
        T: Clone,
    {
        match self {
            Field::Unchanged => {}
            Field::Clear => *slot = None,
            Field::Set(value) => *slot = Some(value.clone()),
        }
    }

    /// Transforms the carried value.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Field<U> {
        match self {
            Field::Unchanged => Field::Unchanged,
            Field::Clear => Field::Clear,
            Field::Set(value) => Field::Set(f(value)),
        }
    }
}

/// `None` leaves the value untouched; it never clears.
impl<T> From<Option<T>> for Field<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => Field::Set(value),
            None => Field::Unchanged,
        }
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Field<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match Option::<T>::deserialize(deserializer)? {
            Some(value) => Field::Set(value),
            None => Field::Clear,
        })
    }
}

impl<T: Serialize> Serialize for Field<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Field::Set(value) => serializer.serialize_some(value),
            Field::Unchanged | Field::Clear => serializer.serialize_none(),
        }
    }
}
