//! Per-connection publication of the current user's email fields.
//!
//! Each connection gets one [`Publication`] that moves through:
//!
//! | State | Meaning |
//! |-------|---------|
//! | `Init` | Created, nothing sent |
//! | `Computing` | Deciding what to publish and building the projection |
//! | `Publishing` | Initial document being queried and sent |
//! | `Ready` | Initial set sent, `ready` delivered |
//! | `Streaming` | Forwarding live changes for the user |
//! | `Closed` | Connection gone, change feed released |
//!
//! A connection without a user id, or any connection while user tracking is
//! disabled, is made ready immediately with an empty set. Otherwise the
//! user's document is queried with a [`Projection`] of `emails` plus
//! `services.<provider>.email` for every registered provider and published
//! into [`USER_COLLECTION`].
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use astronomer_server::config::Config;
//! use astronomer_server::publication::{PublicationState, UserProjectionPublisher};
//! use astronomer_server::store::MemoryUserStore;
//! use astronomer_server::types::PublicationMessage;
//! use serde_json::json;
//!
//! # tokio_test_block_on(async {
//! let store = Arc::new(MemoryUserStore::new());
//! store.insert("u1", json!({ "emails": [] }).as_object().unwrap().clone());
//!
//! let publisher = UserProjectionPublisher::new(store, Config::default());
//! let mut publication = publisher.open(Some("u1".to_string()), Vec::<PublicationMessage>::new());
//! publication.start().await.unwrap();
//!
//! assert_eq!(publication.state(), PublicationState::Ready);
//! assert_eq!(publication.output().last(), Some(&PublicationMessage::Ready));
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::Receiver;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, trace, warn};

use crate::config::Config;
use crate::error::Result;
use crate::store::{Projection, UserStore};
use crate::types::{Document, PublicationMessage, UserChange, USER_COLLECTION};

/// Lifecycle of a [`Publication`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublicationState {
    Init,
    Computing,
    Publishing,
    Ready,
    Streaming,
    Closed,
}

impl fmt::Display for PublicationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::Computing => "computing",
            Self::Publishing => "publishing",
            Self::Ready => "ready",
            Self::Streaming => "streaming",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Where a publication's messages go.
pub trait PublicationOutput: Send {
    fn added(&mut self, collection: &str, id: &str, fields: Document);

    /// `fields` holds new or updated top-level fields, `cleared` the removed ones.
    fn changed(&mut self, collection: &str, id: &str, fields: Document, cleared: Vec<String>);

    fn removed(&mut self, collection: &str, id: &str);

    /// Marks the initial set as complete.
    fn ready(&mut self);
}

/// Records messages in order.
impl PublicationOutput for Vec<PublicationMessage> {
    fn added(&mut self, collection: &str, id: &str, fields: Document) {
        self.push(PublicationMessage::Added {
            collection: collection.to_string(),
            id: id.to_string(),
            fields,
        });
    }

    fn changed(&mut self, collection: &str, id: &str, fields: Document, cleared: Vec<String>) {
        self.push(PublicationMessage::Changed {
            collection: collection.to_string(),
            id: id.to_string(),
            fields,
            cleared,
        });
    }

    fn removed(&mut self, collection: &str, id: &str) {
        self.push(PublicationMessage::Removed {
            collection: collection.to_string(),
            id: id.to_string(),
        });
    }

    fn ready(&mut self) {
        self.push(PublicationMessage::Ready);
    }
}

/// Forwards messages to a connection task.
///
/// Messages sent after the receiver is gone are dropped.
impl PublicationOutput for UnboundedSender<PublicationMessage> {
    fn added(&mut self, collection: &str, id: &str, fields: Document) {
        forward(
            self,
            PublicationMessage::Added {
                collection: collection.to_string(),
                id: id.to_string(),
                fields,
            },
        );
    }

    fn changed(&mut self, collection: &str, id: &str, fields: Document, cleared: Vec<String>) {
        forward(
            self,
            PublicationMessage::Changed {
                collection: collection.to_string(),
                id: id.to_string(),
                fields,
                cleared,
            },
        );
    }

    fn removed(&mut self, collection: &str, id: &str) {
        forward(
            self,
            PublicationMessage::Removed {
                collection: collection.to_string(),
                id: id.to_string(),
            },
        );
    }

    fn ready(&mut self) {
        forward(self, PublicationMessage::Ready);
    }
}

fn forward(sender: &UnboundedSender<PublicationMessage>, message: PublicationMessage) {
    if sender.send(message).is_err() {
        trace!("Connection receiver dropped, discarding publication message");
    }
}

/// Creates per-connection user projection publications.
pub struct UserProjectionPublisher<S> {
    store: Arc<S>,
    config: Config,
    providers: Vec<String>,
}

impl<S: UserStore> UserProjectionPublisher<S> {
    #[must_use]
    pub fn new(store: Arc<S>, config: Config) -> Self {
        Self {
            store,
            config,
            providers: Vec::new(),
        }
    }

    /// Sets the registered federated login providers, in registration order.
    #[must_use]
    pub fn with_providers(mut self, providers: Vec<String>) -> Self {
        self.providers = providers;
        self
    }

    /// The projection applied to every published user document.
    #[must_use]
    pub fn projection(&self) -> Projection {
        Projection::for_user(&self.providers)
    }

    /// Opens a publication for a connection, in the `Init` state.
    #[must_use]
    pub fn open<O: PublicationOutput>(&self, user_id: Option<String>, output: O) -> Publication<S, O> {
        Publication {
            store: Arc::clone(&self.store),
            user_id,
            disabled: self.config.disable_user_tracking,
            projection: self.projection(),
            output,
            state: PublicationState::Init,
            published: None,
            changes: None,
        }
    }

    /// Runs a publication from start until `closed` resolves.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Store` if the store fails at any point.
    pub async fn publish<O, F>(&self, user_id: Option<String>, output: O, closed: F) -> Result<O>
    where
        O: PublicationOutput,
        F: Future<Output = ()>,
    {
        let mut publication = self.open(user_id, output);
        publication.start().await?;
        publication.stream(closed).await?;
        Ok(publication.into_output())
    }
}

/// One connection's view of its user document.
pub struct Publication<S, O> {
    store: Arc<S>,
    user_id: Option<String>,
    disabled: bool,
    projection: Projection,
    output: O,
    state: PublicationState,
    /// Fields last sent to the client; `None` when the document is absent.
    published: Option<Document>,
    changes: Option<Receiver<UserChange>>,
}

impl<S: UserStore, O: PublicationOutput> Publication<S, O> {
    #[must_use]
    pub fn state(&self) -> PublicationState {
        self.state
    }

    #[must_use]
    pub fn output(&self) -> &O {
        &self.output
    }

    #[must_use]
    pub fn into_output(self) -> O {
        self.output
    }

    /// Publishes the initial set and marks it ready.
    ///
    /// Does nothing unless the publication is in `Init`.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Store` if the initial query fails.
    pub async fn start(&mut self) -> Result<()> {
        if self.state != PublicationState::Init {
            return Ok(());
        }
        self.transition(PublicationState::Computing);

        let user_id = match (&self.user_id, self.disabled) {
            (Some(id), false) => id.clone(),
            (None, _) => {
                debug!("No user on connection, publishing empty set");
                self.mark_ready();
                return Ok(());
            }
            (Some(_), true) => {
                debug!("User tracking disabled, publishing empty set");
                self.mark_ready();
                return Ok(());
            }
        };

        // Subscribe before querying so no change slips between the two.
        self.changes = Some(self.store.watch());

        self.transition(PublicationState::Publishing);
        let document = self.store.find_one(&user_id, &self.projection).await?;
        self.reconcile(&user_id, document);

        self.mark_ready();
        Ok(())
    }

    /// Streams live changes until `closed` resolves or the feed ends.
    ///
    /// Starts the publication first if needed. A lagging feed is recovered by
    /// resubscribing and re-querying the store, so only changes made after the
    /// re-query are applied. The publication is `Closed` on return.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Store` if a recovery query fails.
    pub async fn stream<F: Future<Output = ()>>(&mut self, closed: F) -> Result<()> {
        self.start().await?;
        if self.state == PublicationState::Closed {
            return Ok(());
        }

        let (Some(mut changes), Some(user_id)) = (self.changes.take(), self.user_id.clone()) else {
            closed.await;
            self.transition(PublicationState::Closed);
            return Ok(());
        };

        self.transition(PublicationState::Streaming);
        tokio::pin!(closed);

        let result = loop {
            tokio::select! {
                biased;
                () = &mut closed => break Ok(()),
                change = changes.recv() => match change {
                    Ok(change) if change.id() == user_id => self.apply_change(&user_id, change),
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, user_id = %user_id, "User change feed lagged, re-querying");
                        // Changes still queued predate the re-query and must not be replayed.
                        changes = changes.resubscribe();
                        if let Err(e) = self.resync(&user_id).await {
                            break Err(e);
                        }
                    }
                    Err(RecvError::Closed) => {
                        debug!(user_id = %user_id, "User change feed closed");
                        break Ok(());
                    }
                },
            }
        };

        self.transition(PublicationState::Closed);
        result
    }

    fn apply_change(&mut self, user_id: &str, change: UserChange) {
        match change {
            UserChange::Upserted { document, .. } => {
                let projected = self.projection.apply(&document);
                self.reconcile(user_id, Some(projected));
            }
            UserChange::Removed { .. } => self.reconcile(user_id, None),
        }
    }

    async fn resync(&mut self, user_id: &str) -> Result<()> {
        let document = self.store.find_one(user_id, &self.projection).await?;
        self.reconcile(user_id, document);
        Ok(())
    }

    /// Sends whatever turns the published view into `next`.
    fn reconcile(&mut self, user_id: &str, next: Option<Document>) {
        match (self.published.take(), next) {
            (None, None) => {}
            (None, Some(fields)) => {
                self.output.added(USER_COLLECTION, user_id, fields.clone());
                self.published = Some(fields);
            }
            (Some(_), None) => {
                self.output.removed(USER_COLLECTION, user_id);
            }
            (Some(previous), Some(fields)) => {
                let updated: Document = fields
                    .iter()
                    .filter(|(key, value)| previous.get(*key) != Some(*value))
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect();
                let cleared: Vec<String> = previous
                    .keys()
                    .filter(|key| !fields.contains_key(*key))
                    .cloned()
                    .collect();

                if !updated.is_empty() || !cleared.is_empty() {
                    self.output.changed(USER_COLLECTION, user_id, updated, cleared);
                }
                self.published = Some(fields);
            }
        }
    }

    fn mark_ready(&mut self) {
        self.transition(PublicationState::Publishing);
        self.output.ready();
        self.transition(PublicationState::Ready);
    }

    fn transition(&mut self, next: PublicationState) {
        if self.state != next {
            trace!(from = %self.state, to = %next, "Publication state change");
            self.state = next;
        }
    }
}
