//! Branded ID newtypes and the composite [`ThreadKey`].
//!
//! Locally generated IDs (sessions, messages) are UUID v7 (time-ordered).
//! Thread and run IDs are minted by the backend and carried as plain strings.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

fn new_v7() -> String {
    Uuid::now_v7().to_string()
}

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new random ID (UUID v7, time-ordered).
            #[must_use]
            pub fn new() -> Self {
                Self(new_v7())
            }

            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

branded_id! {
    /// Unique identifier for an agent session tracked by the runtime.
    SessionId
}

branded_id! {
    /// Identifier for a locally synthesized chat message.
    MessageId
}

/// Identity of a backend conversation thread: `(server, room, thread)`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadKey {
    /// Backend server the thread lives on.
    pub server_id: String,
    /// Room the thread belongs to.
    pub room_id: String,
    /// Thread identifier within the room.
    pub thread_id: String,
}

impl ThreadKey {
    /// Build a key from its three parts.
    pub fn new(
        server_id: impl Into<String>,
        room_id: impl Into<String>,
        thread_id: impl Into<String>,
    ) -> Self {
        Self {
            server_id: server_id.into(),
            room_id: room_id.into(),
            thread_id: thread_id.into(),
        }
    }
}

impl fmt::Display for ThreadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.server_id, self.room_id, self.thread_id)
    }
}
