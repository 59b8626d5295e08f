//! Conversation context of an inbound message.

use std::fmt;

use super::ids::{AccountId, GroupId};

/// Where an inbound message was sent.
///
/// Built once per message and handed to every hook; listener groups also use
/// its [`subject`](Context::subject) to decide whether they apply.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Context {
    /// A group conversation.
    Group(GroupId),
    /// A one-to-one conversation.
    Individual {
        /// The remote account.
        account: AccountId,
        /// The profile name the sender advertised, if any.
        name: Option<String>,
    },
}

impl Context {
    /// The identifier a listener group's context filter is matched against.
    pub fn subject(&self) -> &str {
        match self {
            Self::Group(id) => id.as_str(),
            Self::Individual { account, .. } => account.as_str(),
        }
    }

    /// Returns `true` for group conversations.
    pub fn is_group(&self) -> bool {
        matches!(self, Self::Group(_))
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Group(id) => write!(f, "group {id}"),
            Self::Individual {
                account,
                name: Some(name),
            } => write!(f, "{name} ({account})"),
            Self::Individual { account, name: None } => write!(f, "{account}"),
        }
    }
}
