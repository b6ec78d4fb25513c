//! Astronomer Server - user projection publication.
//!
//! This crate provides the server half of Astronomer tracking: for every
//! client connection it publishes the signed-in user's email fields into the
//! client-side `AstronomerUser` collection, so the client can identify the
//! user with an email address.
//!
//! # Architecture
//!
//! The host owns connections and the user database. It supplies a
//! [`store::UserStore`] and a [`publication::PublicationOutput`] per
//! connection; the publication queries, publishes and streams changes until
//! the connection closes.

pub mod config;
pub mod error;
pub mod publication;
pub mod store;
pub mod types;

pub use config::Config;
pub use error::{Result, ServerError, StoreError};
pub use publication::{Publication, PublicationOutput, PublicationState, UserProjectionPublisher};
pub use store::{MemoryUserStore, Projection, UserStore};
pub use types::{Document, PublicationMessage, UserChange, USER_COLLECTION};
