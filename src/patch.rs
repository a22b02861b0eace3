//! Three-state optional payload fields.
//!
//! Modify endpoints distinguish "leave unchanged", "clear" and "set":
//!
//! ```rust
//! use restlanes::Patch;
//! use serde::Serialize;
//!
//! #[derive(Serialize)]
//! struct MemberUpdate {
//!     #[serde(skip_serializing_if = "Patch::is_absent")]
//!     nick: Patch<String>,
//!     #[serde(skip_serializing_if = "Patch::is_absent")]
//!     channel_id: Patch<u64>,
//! }
//!
//! let update = MemberUpdate { nick: Patch::Null, channel_id: Patch::Absent };
//! assert_eq!(serde_json::to_string(&update).unwrap(), r#"{"nick":null}"#);
//! ```

use serde::{Serialize, Serializer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Patch<T> {
    /// Field omitted from the payload.
    #[default]
    Absent,
    /// Field sent as an explicit `null`.
    Null,
    Present(T),
}

impl<T> Patch<T> {
    pub fn is_absent(&self) -> bool {
        matches!(self, Patch::Absent)
    }

    pub fn as_ref(&self) -> Patch<&T> {
        match self {
            Patch::Absent => Patch::Absent,
            Patch::Null => Patch::Null,
            Patch::Present(v) => Patch::Present(v),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Patch<U> {
        match self {
            Patch::Absent => Patch::Absent,
            Patch::Null => Patch::Null,
            Patch::Present(v) => Patch::Present(f(v)),
        }
    }
}

impl<T> From<Option<T>> for Patch<T> {
    /// `None` means "clear" here; use [`Patch::Absent`] to omit a field.
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => Patch::Present(v),
            None => Patch::Null,
        }
    }
}

impl<T: Serialize> Serialize for Patch<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            // only reached when the field lacks `skip_serializing_if`
            Patch::Absent | Patch::Null => serializer.serialize_none(),
            Patch::Present(v) => serializer.serialize_some(v),
        }
    }
}
