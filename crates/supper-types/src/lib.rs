//! Shared domain types for the meal-planning service: entities, request
//! inputs, list filters, session roles and the data-change envelope that
//! every mutation publishes.

pub mod events;
pub mod filter;
pub mod ids;
pub mod merge;
pub mod models;
pub mod nullable;
pub mod session;
pub mod time;
pub mod validation;

pub use events::{Change, DataChange, DataChangeMessage, DataType, Entity, EventType};
pub use filter::{ListPage, Pagination, QueryFilter, SortOrder};
pub use session::{AccountStatus, HouseholdPermission, HouseholdRole, Requester, ServiceRole, SessionContext};
pub use validation::{Validate, ValidationError};

/// Implements `as_str`, `Display` and `FromStr` for a fieldless enum whose
/// variants map to fixed strings. Used for the columns stored as TEXT.
#[macro_export]
macro_rules! string_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl ::std::str::FromStr for $name {
            type Err = $crate::validation::UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err($crate::validation::UnknownVariant(other.to_string())),
                }
            }
        }
    };
}
