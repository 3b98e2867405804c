use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Longest identifier accepted from outside the process.
pub const MAX_ID_LEN: usize = 128;

/// Prefixed, time-ordered string identifiers. Client-supplied values are
/// accepted verbatim through `from_raw`; check `is_well_formed` before
/// using one as a path segment.
macro_rules! branded_id {
    ($name:ident, $prefix:expr) => {
        #[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new() -> Self {
                Self(format!("{}_{}", $prefix, Uuid::now_v7()))
            }

            pub fn from_raw(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// True for `[A-Za-z0-9_-]{1,128}`.
            pub fn is_well_formed(&self) -> bool {
                !self.0.is_empty()
                    && self.0.len() <= MAX_ID_LEN
                    && self
                        .0
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

branded_id!(SessionId, "sess");
branded_id!(ToolCallId, "call");
