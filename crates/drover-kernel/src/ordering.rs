//! Case and collection orderers.
//!
//! An orderer is a pure permutation: it may rearrange what it is given but
//! never add, drop, or duplicate members. Orderers are looked up by name in
//! an `OrdererRegistry` once per run. Any failure (unknown name, failing
//! factory, error or panic while ordering, changed member set) produces one
//! diagnostic and falls back to discovery order.

use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use drover_types::{Case, CaseId, Collection, CollectionId};

use crate::diagnostics::{DiagnosticMessage, MessageSink};
use crate::error::{OrdererError, OrdererKind};
use crate::tracker::panic_message;

/// Name of a registered orderer, as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrdererRef(pub String);

impl OrdererRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrdererRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OrdererRef {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Orders the cases of one collection.
pub trait CaseOrderer: Send + Sync {
    fn name(&self) -> &str;

    fn order_cases(&self, cases: Vec<Case>) -> anyhow::Result<Vec<Case>>;
}

/// Orders the collections of a run.
pub trait CollectionOrderer: Send + Sync {
    fn name(&self) -> &str;

    fn order_collections(&self, collections: Vec<Collection>) -> anyhow::Result<Vec<Collection>>;
}

/// Keeps discovery order.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscoveryOrderer;

impl CaseOrderer for DiscoveryOrderer {
    fn name(&self) -> &str {
        "discovery"
    }

    fn order_cases(&self, cases: Vec<Case>) -> anyhow::Result<Vec<Case>> {
        Ok(cases)
    }
}

impl CollectionOrderer for DiscoveryOrderer {
    fn name(&self) -> &str {
        "discovery"
    }

    fn order_collections(&self, collections: Vec<Collection>) -> anyhow::Result<Vec<Collection>> {
        Ok(collections)
    }
}

/// Sorts by display name, ignoring case. Ties keep discovery order.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlphabeticalOrderer;

impl CaseOrderer for AlphabeticalOrderer {
    fn name(&self) -> &str {
        "alphabetical"
    }

    fn order_cases(&self, mut cases: Vec<Case>) -> anyhow::Result<Vec<Case>> {
        cases.sort_by_cached_key(|case| case.display_name.to_lowercase());
        Ok(cases)
    }
}

impl CollectionOrderer for AlphabeticalOrderer {
    fn name(&self) -> &str {
        "alphabetical"
    }

    fn order_collections(&self, mut collections: Vec<Collection>) -> anyhow::Result<Vec<Collection>> {
        collections.sort_by_cached_key(|collection| collection.display_name.to_lowercase());
        Ok(collections)
    }
}

type CaseOrdererFactory = Arc<dyn Fn() -> anyhow::Result<Arc<dyn CaseOrderer>> + Send + Sync>;
type CollectionOrdererFactory =
    Arc<dyn Fn() -> anyhow::Result<Arc<dyn CollectionOrderer>> + Send + Sync>;

/// Named orderer factories.
///
/// `Default` registers `discovery` and `alphabetical` for both kinds.
#[derive(Clone)]
pub struct OrdererRegistry {
    cases: HashMap<String, CaseOrdererFactory>,
    collections: HashMap<String, CollectionOrdererFactory>,
}

impl fmt::Debug for OrdererRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut cases: Vec<_> = self.cases.keys().collect();
        let mut collections: Vec<_> = self.collections.keys().collect();
        cases.sort();
        collections.sort();
        f.debug_struct("OrdererRegistry")
            .field("cases", &cases)
            .field("collections", &collections)
            .finish()
    }
}

impl Default for OrdererRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register_case_orderer("discovery", || Ok(Arc::new(DiscoveryOrderer)));
        registry.register_case_orderer("alphabetical", || Ok(Arc::new(AlphabeticalOrderer)));
        registry.register_collection_orderer("discovery", || Ok(Arc::new(DiscoveryOrderer)));
        registry
            .register_collection_orderer("alphabetical", || Ok(Arc::new(AlphabeticalOrderer)));
        registry
    }
}

impl OrdererRegistry {
    /// A registry with nothing registered.
    pub fn empty() -> Self {
        Self {
            cases: HashMap::new(),
            collections: HashMap::new(),
        }
    }

    /// Register (or replace) a case orderer factory.
    pub fn register_case_orderer<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> anyhow::Result<Arc<dyn CaseOrderer>> + Send + Sync + 'static,
    {
        self.cases.insert(name.into(), Arc::new(factory));
    }

    /// Register (or replace) a collection orderer factory.
    pub fn register_collection_orderer<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> anyhow::Result<Arc<dyn CollectionOrderer>> + Send + Sync + 'static,
    {
        self.collections.insert(name.into(), Arc::new(factory));
    }

    /// Construct the case orderer registered under `orderer`.
    pub fn resolve_case_orderer(
        &self,
        orderer: &OrdererRef,
    ) -> Result<Arc<dyn CaseOrderer>, OrdererError> {
        let factory = self.cases.get(orderer.name()).ok_or_else(|| OrdererError::NotFound {
            kind: OrdererKind::Case,
            name: orderer.to_string(),
        })?;
        construct(OrdererKind::Case, orderer, || factory())
    }

    /// Construct the collection orderer registered under `orderer`.
    pub fn resolve_collection_orderer(
        &self,
        orderer: &OrdererRef,
    ) -> Result<Arc<dyn CollectionOrderer>, OrdererError> {
        let factory = self
            .collections
            .get(orderer.name())
            .ok_or_else(|| OrdererError::NotFound {
                kind: OrdererKind::Collection,
                name: orderer.to_string(),
            })?;
        construct(OrdererKind::Collection, orderer, || factory())
    }
}

fn construct<T>(
    kind: OrdererKind,
    orderer: &OrdererRef,
    factory: impl FnOnce() -> anyhow::Result<T>,
) -> Result<T, OrdererError> {
    let constructed = std::panic::catch_unwind(AssertUnwindSafe(factory))
        .unwrap_or_else(|payload| Err(anyhow::anyhow!("{}", panic_message(payload.as_ref()))));
    constructed.map_err(|source| OrdererError::Construction {
        kind,
        name: orderer.to_string(),
        source,
    })
}

/// Report an orderer problem: one diagnostic, one warning.
pub(crate) fn report(sink: &dyn MessageSink, err: &OrdererError) {
    tracing::warn!(error = %err, "falling back to discovery order");
    sink.on_message(DiagnosticMessage::new(err.to_string()));
}

/// Apply `orderer` to the cases of `collection`, falling back to the given
/// order on any failure.
pub(crate) fn order_cases(
    orderer: &dyn CaseOrderer,
    collection: &Collection,
    cases: Vec<Case>,
    sink: &dyn MessageSink,
) -> Vec<Case> {
    let target = format!("collection '{}'", collection.display_name);
    let fallback = cases.clone();
    let ordered = std::panic::catch_unwind(AssertUnwindSafe(|| orderer.order_cases(cases)));
    match checked(OrdererKind::Case, orderer.name(), &target, &fallback, ordered, case_key) {
        Ok(ordered) => ordered,
        Err(err) => {
            report(sink, &err);
            fallback
        }
    }
}

/// Apply `orderer` to the run's collections, falling back to the given order
/// on any failure.
pub(crate) fn order_collections(
    orderer: &dyn CollectionOrderer,
    collections: Vec<Collection>,
    sink: &dyn MessageSink,
) -> Vec<Collection> {
    let fallback = collections.clone();
    let ordered =
        std::panic::catch_unwind(AssertUnwindSafe(|| orderer.order_collections(collections)));
    match checked(
        OrdererKind::Collection,
        orderer.name(),
        "the run",
        &fallback,
        ordered,
        collection_key,
    ) {
        Ok(ordered) => ordered,
        Err(err) => {
            report(sink, &err);
            fallback
        }
    }
}

fn checked<T, K, F>(
    kind: OrdererKind,
    name: &str,
    target: &str,
    original: &[T],
    ordered: std::thread::Result<anyhow::Result<Vec<T>>>,
    key: F,
) -> Result<Vec<T>, OrdererError>
where
    K: Ord + ?Sized,
    F: Fn(&T) -> &K,
{
    let ordered = match ordered {
        Ok(Ok(ordered)) => ordered,
        Ok(Err(source)) => {
            return Err(OrdererError::Ordering {
                kind,
                name: name.to_string(),
                target: target.to_string(),
                source,
            });
        }
        Err(payload) => {
            return Err(OrdererError::Panicked {
                kind,
                name: name.to_string(),
                target: target.to_string(),
                message: panic_message(payload.as_ref()),
            });
        }
    };

    let mut expected: Vec<&K> = original.iter().map(&key).collect();
    let mut actual: Vec<&K> = ordered.iter().map(&key).collect();
    expected.sort();
    actual.sort();
    if expected != actual {
        return Err(OrdererError::MembershipChanged {
            kind,
            name: name.to_string(),
            target: target.to_string(),
            expected: original.len(),
            actual: ordered.len(),
        });
    }
    Ok(ordered)
}

fn case_key(case: &Case) -> &CaseId {
    &case.id
}

fn collection_key(collection: &Collection) -> &CollectionId {
    &collection.id
}
