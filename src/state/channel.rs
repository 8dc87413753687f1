//! Channel-related lobby state.

use std::collections::HashSet;

/// A channel topic as announced by CHANNELTOPIC.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Topic {
    /// Name of the user who set the topic.
    pub author: String,
    /// Topic text.
    pub text: String,
}

/// A channel the local user has joined.
#[derive(Debug, Clone, Default)]
pub struct Channel {
    /// Current topic, if one was announced.
    pub topic: Option<Topic>,
    /// Users present in the channel, including the local user.
    pub members: HashSet<String>,
}
