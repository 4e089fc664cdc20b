//! Collection and case identification types.

/// Unique identifier for a collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct CollectionId(pub String);

impl CollectionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CollectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CollectionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Unique identifier for a case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct CaseId(pub String);

impl CaseId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CaseId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// An independently schedulable group of cases.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Collection {
    /// Collection ID.
    pub id: CollectionId,
    /// Human-readable name, used by orderers and diagnostics.
    pub display_name: String,
}

impl Collection {
    /// Create a collection whose display name matches its ID.
    pub fn named(name: &str) -> Self {
        Self {
            id: CollectionId::new(name),
            display_name: name.to_string(),
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name)
    }
}

/// The smallest unit of scheduled work.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Case {
    /// Case ID.
    pub id: CaseId,
    /// Human-readable name, used by orderers and diagnostics.
    pub display_name: String,
    /// The collection this case belongs to.
    pub collection: CollectionId,
}

impl Case {
    /// Create a case in `collection` whose display name matches its ID.
    pub fn named(collection: &CollectionId, name: &str) -> Self {
        Self {
            id: CaseId::new(format!("{collection}::{name}")),
            display_name: name.to_string(),
            collection: collection.clone(),
        }
    }
}

impl std::fmt::Display for Case {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name)
    }
}

/// A collection paired with the cases discovered for it.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CollectionPlan {
    pub collection: Collection,
    pub cases: Vec<Case>,
}

impl CollectionPlan {
    pub fn new(collection: Collection, cases: Vec<Case>) -> Self {
        Self { collection, cases }
    }

    /// Build a plan from a collection name and case names.
    pub fn named(collection: &str, cases: &[&str]) -> Self {
        let collection = Collection::named(collection);
        let cases = cases
            .iter()
            .map(|name| Case::named(&collection.id, name))
            .collect();
        Self { collection, cases }
    }
}
