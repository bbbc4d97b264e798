// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! ID generation abstractions

/// Generates short opaque string ids (RPC correlation ids, refresh tokens).
pub trait IdGen: Send + Sync {
    /// Generate a new id with the given prefix, e.g. `req-V1StGXR8_Z5j`.
    fn id(&self, prefix: &str) -> String;
}

/// Nanoid-backed generator. 12 url-safe chars after the prefix.
#[derive(Debug, Clone, Copy, Default)]
pub struct NanoIdGen;

impl IdGen for NanoIdGen {
    fn id(&self, prefix: &str) -> String {
        format!("{}-{}", prefix, nanoid::nanoid!(12))
    }
}

/// Define a newtype ID wrapper around an externally-assigned string id.
///
/// Generates `new()`, `as_str()`, `Display`, `From<String>`, `From<&str>`,
/// `From<&String>`, `AsRef<str>`, `PartialEq<str>`, `PartialEq<&str>`,
/// `Borrow<str>`, and `Deref` implementations.
///
/// Backed by a plain `String`: these ids are minted by a remote peer, so
/// there is no length or format guarantee to exploit.
///
/// ```ignore
/// define_id! {
///     /// Doc comment for the ID type.
///     pub struct TaskId;
/// }
/// ```
#[macro_export]
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        pub struct $name:ident;
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Create an ID from an existing string-like value.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&String> for $name {
            fn from(s: &String) -> Self {
                Self(s.clone())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;

            fn deref(&self) -> &str {
                &self.0
            }
        }
    };
}

#[cfg(test)]
#[path = "id_tests.rs"]
mod tests;
