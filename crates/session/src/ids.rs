use std::fmt;
use std::str::FromStr;

use snafu::ResultExt;
use uuid::Uuid;

use super::error::{InvalidIdSnafu, SessionError, SessionResult};

// One macro so every id wrapper parses, prints and converts the same way.
macro_rules! define_id {
    ($name:ident, $id_type:literal) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(Uuid);

        impl $name {
            /// Mints a fresh time-ordered identifier.
            pub fn new_v7() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn parse(raw: &str) -> SessionResult<Self> {
                let parsed = Uuid::parse_str(raw.trim()).context(InvalidIdSnafu {
                    stage: "parse-id",
                    id_type: $id_type,
                    raw: raw.to_string(),
                })?;
                Ok(Self(parsed))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(formatter, "{}", self.0)
            }
        }

        impl From<$name> for Uuid {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl FromStr for $name {
            type Err = SessionError;

            fn from_str(raw: &str) -> SessionResult<Self> {
                Self::parse(raw)
            }
        }
    };
}

define_id!(SessionId, "session-id");
define_id!(MessageId, "message-id");
