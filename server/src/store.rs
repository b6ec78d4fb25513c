//! User store contract and an in-memory implementation.
//!
//! A [`UserStore`] answers single-document queries restricted to a
//! [`Projection`] and exposes a live change feed over a tokio broadcast
//! channel. [`MemoryUserStore`] keeps documents in a map and broadcasts every
//! write.
//!
//! # Example
//!
//! ```rust
//! use astronomer_server::store::{MemoryUserStore, Projection};
//! use serde_json::json;
//!
//! let store = MemoryUserStore::new();
//! let mut rx = store.subscribe();
//!
//! let doc = json!({ "emails": [{ "address": "a@b.c" }], "profile": { "name": "A" } });
//! store.insert("u1", doc.as_object().unwrap().clone());
//!
//! assert_eq!(rx.try_recv().unwrap().id(), "u1");
//!
//! let projected = Projection::for_user(&[]).apply(&store.get("u1").unwrap());
//! assert!(projected.get("profile").is_none());
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::{PoisonError, RwLock};

use serde_json::Value;
use tokio::sync::broadcast::{self, Receiver, Sender};
use tracing::{debug, trace};

use crate::error::StoreError;
use crate::types::{Document, UserChange};

/// Default change feed capacity.
///
/// Subscribers that fall further behind receive `RecvError::Lagged` and must
/// re-query.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Field that always carries a user's email addresses.
const EMAILS_FIELD: &str = "emails";

/// A set of dotted field paths to keep from a document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Projection {
    fields: Vec<String>,
}

impl Projection {
    #[must_use]
    pub fn new(fields: Vec<String>) -> Self {
        Self { fields }
    }

    /// The email fields of a user document.
    ///
    /// Always `emails`, plus `services.<provider>.email` for each provider in
    /// registration order.
    #[must_use]
    pub fn for_user(providers: &[String]) -> Self {
        let fields = std::iter::once(EMAILS_FIELD.to_string())
            .chain(
                providers
                    .iter()
                    .map(|provider| format!("services.{provider}.email")),
            )
            .collect();
        Self { fields }
    }

    #[must_use]
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Copies the projected fields of `document` into a new document.
    ///
    /// Nested paths are rebuilt as nested objects. Paths that are missing, or
    /// that cross a non-object value, are skipped.
    #[must_use]
    pub fn apply(&self, document: &Document) -> Document {
        let mut projected = Document::new();
        for field in &self.fields {
            let path: Vec<&str> = field.split('.').collect();
            if let Some(value) = lookup(document, &path) {
                insert_path(&mut projected, &path, value.clone());
            }
        }
        projected
    }
}

fn lookup<'a>(document: &'a Document, path: &[&str]) -> Option<&'a Value> {
    let (last, parents) = path.split_last()?;
    parents
        .iter()
        .try_fold(document, |doc, segment| doc.get(*segment).and_then(Value::as_object))?
        .get(*last)
}

fn insert_path(target: &mut Document, path: &[&str], value: Value) {
    match path {
        [] => {}
        [last] => {
            target.insert((*last).to_string(), value);
        }
        [head, rest @ ..] => {
            let entry = target
                .entry((*head).to_string())
                .or_insert_with(|| Value::Object(Document::new()));
            if let Value::Object(next) = entry {
                insert_path(next, rest, value);
            }
        }
    }
}

/// Read access to user documents and their changes.
pub trait UserStore: Send + Sync {
    /// Finds the user with `id`, restricted to `projection`.
    fn find_one(
        &self,
        id: &str,
        projection: &Projection,
    ) -> impl Future<Output = Result<Option<Document>, StoreError>> + Send;

    /// Subscribes to every subsequent change in the store.
    fn watch(&self) -> Receiver<UserChange>;
}

/// In-memory user store with a broadcast change feed.
#[derive(Debug)]
pub struct MemoryUserStore {
    users: RwLock<HashMap<String, Document>>,
    changes: Sender<UserChange>,
}

impl MemoryUserStore {
    /// Creates an empty store with [`DEFAULT_CHANNEL_CAPACITY`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Creates an empty store whose change feed holds `capacity` changes.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (changes, _) = broadcast::channel(capacity);
        debug!(capacity, "Created memory user store");
        Self {
            users: RwLock::new(HashMap::new()),
            changes,
        }
    }

    /// Inserts or replaces the document for `id` and broadcasts the change.
    pub fn insert(&self, id: impl Into<String>, document: Document) {
        let id = id.into();
        self.users
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), document.clone());
        self.broadcast(UserChange::Upserted { id, document });
    }

    /// Removes the document for `id`, broadcasting if it existed.
    pub fn remove(&self, id: &str) -> Option<Document> {
        let removed = self
            .users
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
        if removed.is_some() {
            self.broadcast(UserChange::Removed { id: id.to_string() });
        }
        removed
    }

    /// Returns the full stored document for `id`.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Document> {
        self.users
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Subscribes to the change feed.
    #[must_use]
    pub fn subscribe(&self) -> Receiver<UserChange> {
        self.changes.subscribe()
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.changes.receiver_count()
    }

    fn broadcast(&self, change: UserChange) {
        trace!(user_id = %change.id(), "Broadcasting user change");
        // No receivers is normal when nobody is subscribed.
        let _ = self.changes.send(change);
    }
}

impl Default for MemoryUserStore {
    fn default() -> Self {
        Self::new()
    }
}

impl UserStore for MemoryUserStore {
    async fn find_one(
        &self,
        id: &str,
        projection: &Projection,
    ) -> Result<Option<Document>, StoreError> {
        Ok(self.get(id).map(|document| projection.apply(&document)))
    }

    fn watch(&self) -> Receiver<UserChange> {
        self.subscribe()
    }
}
