//! Strongly-typed identifiers for remote oVirt objects.
//!
//! All IDs are validated at construction time and implement common traits.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Macro to define a strongly-typed ID newtype wrapper.
///
/// Generates: struct, `from_string()`, `as_str()`, Display, Serialize, Deserialize.
macro_rules! define_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn from_string(s: impl Into<String>) -> Result<Self, &'static str> {
                let s = s.into();
                if s.is_empty() {
                    return Err(concat!(stringify!($name), " cannot be empty"));
                }
                Ok(Self(s))
            }

            /// Test helper for literal ids.
            #[cfg(any(test, feature = "test-harness"))]
            #[allow(clippy::expect_used)]
            pub fn must(s: &str) -> Self {
                Self::from_string(s).expect("literal id must be non-empty")
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_id!(ClusterId);
define_id!(TemplateId);
define_id!(VmId);
define_id!(DiskId);
