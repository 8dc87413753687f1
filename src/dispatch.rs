//! Event dispatch: callback registries, priorities and request correlation.
//!
//! The client dispatches every inbound command through three stages:
//! pre-callbacks (observers that run before the internal state handler),
//! the internal handler, then the external callbacks. Registrations are
//! ordered by [`Priority`] and can be bounded to a number of invocations.
//!
//! Callbacks never get a handle back to the client; anything they want sent
//! goes through an [`Outbox`] the client flushes after the event. That keeps
//! dispatch single-threaded and re-entrancy-free while still letting a
//! callback answer the server.

use std::collections::HashMap;
use std::time::Instant;

use tas_proto::Command;
use tracing::warn;

use crate::state::LobbyState;

// ============================================================================
// Callback Types
// ============================================================================

/// Callback invoked for a dispatched command. Receives the command, the
/// post-event state model and the outbox for queueing replies.
pub type EventCallback = Box<dyn FnMut(&Command, &LobbyState, &mut Outbox) + Send>;

/// One-shot callback for a correlated response.
pub type ResponseCallback = Box<dyn FnOnce(&Command, &LobbyState, &mut Outbox) + Send>;

/// One-shot callback fired with the request token when a correlated request
/// times out.
pub type TimeoutCallback = Box<dyn FnOnce(&str, &LobbyState, &mut Outbox) + Send>;

/// One-shot callback fired when a TLS upgrade resolves, with `true` on an
/// established layer.
pub type TlsCallback = Box<dyn FnOnce(bool, &mut Outbox) + Send>;

// ============================================================================
// Outbox
// ============================================================================

/// Commands queued for transmission by callbacks during dispatch.
#[derive(Default)]
pub struct Outbox {
    queue: Vec<Command>,
}

impl Outbox {
    /// Queue a command. It is sent, in order, once the current event has
    /// been fully dispatched.
    pub fn send(&mut self, cmd: Command) {
        self.queue.push(cmd);
    }

    pub(crate) fn drain(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.queue)
    }
}

// ============================================================================
// Priorities
// ============================================================================

/// Callback ordering. Numeric priorities run first, ascending; token
/// priorities run after every numeric one, in registration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Priority {
    Num(i32),
    Token(String),
}

impl Priority {
    fn rank(&self) -> (u8, i32) {
        match self {
            Self::Num(n) => (0, *n),
            Self::Token(_) => (1, 0),
        }
    }
}

impl Default for Priority {
    /// Registrations without an explicit priority run at `Num(1000)`.
    fn default() -> Self {
        Self::Num(1000)
    }
}

/// Handle for removing a registered callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

// ============================================================================
// Callback Registry
// ============================================================================

struct Registration {
    id: CallbackId,
    seq: u64,
    priority: Priority,
    /// Invocations left; 0 means unbounded.
    remaining: u32,
    cb: EventCallback,
}

/// Name of the pre-callback bucket that observes every command.
pub const WILDCARD: &str = "*";

/// Name of the callback bucket that receives commands with no specific
/// registration.
pub const DEFAULT_BUCKET: &str = "";

/// Ordered pre- and post-dispatch callback registrations, bucketed by
/// command name.
#[derive(Default)]
pub(crate) struct CallbackRegistry {
    pre: HashMap<String, Vec<Registration>>,
    post: HashMap<String, Vec<Registration>>,
    next_id: u64,
    next_seq: u64,
}

impl CallbackRegistry {
    pub(crate) fn add_pre(
        &mut self,
        name: &str,
        priority: Priority,
        max_calls: u32,
        cb: EventCallback,
    ) -> CallbackId {
        Self::insert(&mut self.pre, &mut self.next_id, &mut self.next_seq, name, priority, max_calls, cb)
    }

    pub(crate) fn add_post(
        &mut self,
        name: &str,
        priority: Priority,
        max_calls: u32,
        cb: EventCallback,
    ) -> CallbackId {
        Self::insert(&mut self.post, &mut self.next_id, &mut self.next_seq, name, priority, max_calls, cb)
    }

    pub(crate) fn remove_pre(&mut self, id: CallbackId) -> bool {
        Self::remove(&mut self.pre, id)
    }

    pub(crate) fn remove_post(&mut self, id: CallbackId) -> bool {
        Self::remove(&mut self.post, id)
    }

    fn insert(
        map: &mut HashMap<String, Vec<Registration>>,
        next_id: &mut u64,
        next_seq: &mut u64,
        name: &str,
        priority: Priority,
        max_calls: u32,
        cb: EventCallback,
    ) -> CallbackId {
        let id = CallbackId(*next_id);
        *next_id += 1;
        let seq = *next_seq;
        *next_seq += 1;

        let reg = Registration {
            id,
            seq,
            priority,
            remaining: max_calls,
            cb,
        };
        let bucket = map.entry(name.to_string()).or_default();
        let rank = reg.priority.rank();
        // Ties keep registration order; seq is strictly increasing.
        let at = bucket.partition_point(|r| r.priority.rank() <= rank);
        bucket.insert(at, reg);
        id
    }

    fn remove(map: &mut HashMap<String, Vec<Registration>>, id: CallbackId) -> bool {
        let mut removed = false;
        map.retain(|_, bucket| {
            if let Some(at) = bucket.iter().position(|r| r.id == id) {
                bucket.remove(at);
                removed = true;
            }
            !bucket.is_empty()
        });
        removed
    }

    /// Run pre-callbacks for one command: the wildcard bucket, then the
    /// bucket for the command's canonical name. Returns whether any
    /// name-specific registration fired (wildcard observers do not count as
    /// handling).
    pub(crate) fn run_pre(
        &mut self,
        cmd: &Command,
        state: &LobbyState,
        outbox: &mut Outbox,
    ) -> bool {
        Self::run_bucket(&mut self.pre, WILDCARD, cmd, state, outbox);
        Self::run_bucket(&mut self.pre, cmd.name(), cmd, state, outbox)
    }

    /// Run post-handler callbacks: the first existing bucket among the full
    /// prefixed name, the canonical name and the default bucket. Returns
    /// whether any registration fired.
    pub(crate) fn run_post(
        &mut self,
        full_name: &str,
        cmd: &Command,
        state: &LobbyState,
        outbox: &mut Outbox,
    ) -> bool {
        for name in [full_name, cmd.name(), DEFAULT_BUCKET] {
            if self.post.get(name).is_some_and(|b| !b.is_empty()) {
                return Self::run_bucket(&mut self.post, name, cmd, state, outbox);
            }
        }
        false
    }

    fn run_bucket(
        map: &mut HashMap<String, Vec<Registration>>,
        name: &str,
        cmd: &Command,
        state: &LobbyState,
        outbox: &mut Outbox,
    ) -> bool {
        // Take the bucket out while running it; callbacks cannot reach the
        // registry, so nothing else touches the map meanwhile.
        let Some(mut bucket) = map.remove(name) else {
            return false;
        };
        let fired = !bucket.is_empty();
        bucket.retain_mut(|reg| {
            (reg.cb)(cmd, state, outbox);
            if reg.remaining > 0 {
                reg.remaining -= 1;
                reg.remaining > 0
            } else {
                true
            }
        });
        if !bucket.is_empty() {
            map.insert(name.to_string(), bucket);
        }
        fired
    }
}

// ============================================================================
// Pending Requests
// ============================================================================

struct PendingRequest {
    names: Vec<String>,
    callback: Option<ResponseCallback>,
    deadline: Instant,
    on_timeout: Option<TimeoutCallback>,
}

/// Outstanding correlated requests, keyed by the request token (the sent
/// command's name word) and indexed by every expected response name.
#[derive(Default)]
pub(crate) struct PendingTable {
    by_token: HashMap<String, PendingRequest>,
    index: HashMap<String, String>,
}

impl PendingTable {
    /// Register a request. Expected response names already mapped to another
    /// request are re-pointed at this one with a warning; the superseded
    /// request stays alive under its remaining names until it resolves or
    /// times out.
    pub(crate) fn register(
        &mut self,
        token: String,
        names: Vec<String>,
        callback: ResponseCallback,
        deadline: Instant,
        on_timeout: Option<TimeoutCallback>,
    ) {
        if self.by_token.contains_key(&token) {
            warn!(token = %token, "replacing pending request with same token");
            self.drop_token(&token);
        }
        for name in &names {
            if let Some(old) = self.index.insert(name.clone(), token.clone()) {
                if old != token {
                    warn!(
                        response = %name,
                        old_token = %old,
                        new_token = %token,
                        "expected response remapped to newer request"
                    );
                }
            }
        }
        self.by_token.insert(
            token,
            PendingRequest {
                names,
                callback: Some(callback),
                deadline,
                on_timeout,
            },
        );
    }

    /// Resolve the request expecting `name`, if any. Clears every mapping of
    /// the resolved request and hands back its token and callback.
    pub(crate) fn resolve(&mut self, name: &str) -> Option<(String, Option<ResponseCallback>)> {
        let token = self.index.get(name)?.clone();
        let req = self.by_token.remove(&token)?;
        for n in &req.names {
            if self.index.get(n) == Some(&token) {
                self.index.remove(n);
            }
        }
        Some((token, req.callback))
    }

    /// Remove requests whose deadline has passed, returning their tokens
    /// and timeout callbacks.
    pub(crate) fn sweep(&mut self, now: Instant) -> Vec<(String, Option<TimeoutCallback>)> {
        let expired: Vec<String> = self
            .by_token
            .iter()
            .filter(|(_, req)| req.deadline <= now)
            .map(|(token, _)| token.clone())
            .collect();
        let mut fired = Vec::with_capacity(expired.len());
        for token in expired {
            if let Some(req) = self.by_token.remove(&token) {
                for n in &req.names {
                    if self.index.get(n) == Some(&token) {
                        self.index.remove(n);
                    }
                }
                fired.push((token, req.on_timeout));
            }
        }
        fired
    }

    /// Drop everything without firing timeout callbacks. Used on disconnect.
    pub(crate) fn clear(&mut self) {
        self.by_token.clear();
        self.index.clear();
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.by_token.is_empty()
    }

    fn drop_token(&mut self, token: &str) {
        if let Some(req) = self.by_token.remove(token) {
            for n in &req.names {
                if self.index.get(n).map(String::as_str) == Some(token) {
                    self.index.remove(n);
                }
            }
        }
    }
}
