//! Shared publication types for the Astronomer server.
//!
//! Documents are plain JSON objects. Messages follow the shape of the
//! framework's data protocol: `added`, `changed`, `removed` and `ready`,
//! tagged by `msg`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A stored or published document.
pub type Document = Map<String, Value>;

/// Client-side collection the user projection is published into.
pub const USER_COLLECTION: &str = "AstronomerUser";

/// A message sent to the connected client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "msg", rename_all = "snake_case")]
pub enum PublicationMessage {
    Added {
        collection: String,
        id: String,
        fields: Document,
    },
    Changed {
        collection: String,
        id: String,
        fields: Document,
        /// Top-level fields no longer present.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        cleared: Vec<String>,
    },
    Removed {
        collection: String,
        id: String,
    },
    Ready,
}

/// A change on the store's live feed.
///
/// Upserts carry the full, unprojected document.
#[derive(Debug, Clone, PartialEq)]
pub enum UserChange {
    Upserted { id: String, document: Document },
    Removed { id: String },
}

impl UserChange {
    /// Id of the user document this change concerns.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Upserted { id, .. } | Self::Removed { id } => id,
        }
    }
}
