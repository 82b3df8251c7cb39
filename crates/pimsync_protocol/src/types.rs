//! Core identifiers and scalar types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// The data class a collection belongs to.
///
/// Each class is served by its own data controller; the set is closed
/// and dispatch happens over this enum, never over class-name strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DataClass {
    /// Address book entries.
    Contacts,
    /// Calendar events.
    Calendar,
    /// Task list entries.
    Tasks,
    /// Mail messages.
    Email,
}

impl DataClass {
    /// Converts to a stable numeric code.
    pub fn to_code(&self) -> u8 {
        match self {
            DataClass::Contacts => 1,
            DataClass::Calendar => 2,
            DataClass::Tasks => 3,
            DataClass::Email => 4,
        }
    }

    /// Converts from a numeric code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(DataClass::Contacts),
            2 => Some(DataClass::Calendar),
            3 => Some(DataClass::Tasks),
            4 => Some(DataClass::Email),
            _ => None,
        }
    }

    /// All known data classes, in code order.
    pub fn all() -> [DataClass; 4] {
        [
            DataClass::Contacts,
            DataClass::Calendar,
            DataClass::Tasks,
            DataClass::Email,
        ]
    }
}

impl fmt::Display for DataClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataClass::Contacts => "Contacts",
            DataClass::Calendar => "Calendar",
            DataClass::Tasks => "Tasks",
            DataClass::Email => "Email",
        };
        f.write_str(name)
    }
}

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier from any string-like value.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id! {
    /// Identifier of a registered device.
    DeviceId
}

string_id! {
    /// Scope key of one synchronized collection (folder).
    CollectionKey
}

string_id! {
    /// Server-assigned identifier of one item in a collection.
    ///
    /// The `Ord` impl defines the deterministic processing order used
    /// for windowing, so identical requests drain identically.
    ItemId
}

/// Milliseconds since the Unix epoch.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Creates a timestamp from raw milliseconds.
    pub fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Returns the current wall-clock time.
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        Self(millis)
    }

    /// Returns the raw millisecond value.
    pub fn as_millis(&self) -> u64 {
        self.0
    }
}

/// Opaque item body.
///
/// The engine never interprets payloads; data controllers produce and
/// consume them in whatever encoding the data class uses.
pub type Payload = Vec<u8>;
