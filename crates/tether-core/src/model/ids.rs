//! Identity newtypes and outbound addressing.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::context::Context;

/// Length of a base64 encoded group id as issued by the relay.
pub const GROUP_ID_LEN: usize = 44;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wraps a raw identifier.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consumes the wrapper and returns the raw identifier.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id! {
    /// Stable identifier of an account, usually an E.164 phone number or a
    /// service UUID.
    AccountId
}

string_id! {
    /// Base64 identifier of a group conversation.
    GroupId
}

/// Target of an outbound operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Recipient {
    /// One-to-one conversation with an account.
    Account(AccountId),
    /// Group conversation.
    Group(GroupId),
}

impl Recipient {
    /// Classifies a raw identifier the way the relay does: a 44 character
    /// string is a group id, everything else an account.
    pub fn infer(raw: &str) -> Self {
        if raw.len() == GROUP_ID_LEN {
            Self::Group(GroupId::new(raw))
        } else {
            Self::Account(AccountId::new(raw))
        }
    }

    /// Returns the raw identifier.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Account(id) => id.as_str(),
            Self::Group(id) => id.as_str(),
        }
    }

    /// Writes `recipient` or `groupId` into an outbound parameter object.
    pub fn write_params(&self, params: &mut Map<String, Value>) {
        match self {
            Self::Account(id) => params.insert("recipient".into(), Value::from(id.as_str())),
            Self::Group(id) => params.insert("groupId".into(), Value::from(id.as_str())),
        };
    }
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Account(id) => write!(f, "account:{id}"),
            Self::Group(id) => write!(f, "group:{id}"),
        }
    }
}

impl From<&str> for Recipient {
    fn from(raw: &str) -> Self {
        Self::infer(raw)
    }
}

impl From<String> for Recipient {
    fn from(raw: String) -> Self {
        Self::infer(&raw)
    }
}

impl From<AccountId> for Recipient {
    fn from(id: AccountId) -> Self {
        Self::Account(id)
    }
}

impl From<GroupId> for Recipient {
    fn from(id: GroupId) -> Self {
        Self::Group(id)
    }
}

impl From<&Context> for Recipient {
    fn from(ctx: &Context) -> Self {
        match ctx {
            Context::Group(id) => Self::Group(id.clone()),
            Context::Individual { account, .. } => Self::Account(account.clone()),
        }
    }
}
