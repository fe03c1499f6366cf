use std::fmt::{Debug, Display};
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use crossbeam::atomic::AtomicCell;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub type IdType = u64;
pub static ID_COUNTER: AtomicCell<IdType> = AtomicCell::new(1);

/// A process-unique identifier, typed by what it identifies.
pub struct Id<T> {
    value: IdType,
    kind: PhantomData<T>,
}

impl<T> Id<T> {
    /// Allocates the next id.
    pub fn new() -> Self {
        Self {
            value: ID_COUNTER.fetch_add(1),
            kind: PhantomData,
        }
    }

    /// Rebuilds an id received from the outside, such as a client echoing its connection id.
    pub fn from_value(value: IdType) -> Self {
        Self {
            value,
            kind: PhantomData,
        }
    }

    pub fn value(&self) -> IdType {
        self.value
    }
}

impl<T> Default for Id<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Debug for Id<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.value)
    }
}

impl<T> Display for Id<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.value)
    }
}

impl<T> PartialEq for Id<T> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl<T> Hash for Id<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value.hash(state)
    }
}

impl<T> Clone for Id<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Id<T> {}
impl<T> Eq for Id<T> {}

impl<T> Serialize for Id<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.value)
    }
}

impl<'de, T> Deserialize<'de> for Id<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        IdType::deserialize(deserializer).map(Self::from_value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Marker;

    #[test]
    fn test_ids_are_unique() {
        let a = Id::<Marker>::new();
        let b = Id::<Marker>::new();

        assert_ne!(a, b, "two allocated ids differ");
        assert_eq!(
            Id::<Marker>::from_value(a.value()),
            a,
            "an id rebuilt from its value is equal"
        );
    }
}
