//! Shared membership state for every active session.
//!
//! The registry is the only place where sessions meet. It pairs each session
//! id with the username it registered and the [`Outbox`] used to reach it, and
//! every operation runs under a single mutex so registration, removal and
//! fan-out never observe a half-updated membership.
//!
//! Usernames are not required to be unique. Two sessions may register the same
//! name; each keeps its own entry and is removed independently.

use std::{
    collections::{BTreeSet, HashMap},
    sync::atomic::{AtomicU64, Ordering},
};

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::connection::{Delivery, Outbox};

pub type SessionId = u64;

#[derive(Debug)]
pub struct Registry {
    members: Mutex<HashMap<SessionId, Member>>,
    next_id: AtomicU64,
}

#[derive(Debug)]
struct Member {
    username: String,
    outbox: Outbox,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            members: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Hands out a fresh id for a session that has not registered yet.
    pub fn next_id(&self) -> SessionId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Adds the session under `username` and announces it to everyone else.
    ///
    /// Returns `false` when another session already uses the name. The
    /// registration still happens; the flag only lets the caller log it.
    pub async fn register(&self, id: SessionId, username: &str, outbox: Outbox) -> bool {
        let mut members = self.members.lock().await;

        let unique = !members
            .iter()
            .any(|(other, member)| *other != id && member.username == username);
        if !unique {
            warn!(session = id, username, "username already in use by another session");
        }

        members.insert(
            id,
            Member {
                username: username.to_string(),
                outbox,
            },
        );
        fan_out(&members, &join_notice(username), Some(id));

        unique
    }

    /// Removes the session if it is still registered under `username`.
    ///
    /// Only the first call for a given registration returns `true` and
    /// broadcasts the departure notice; later calls are no-ops.
    pub async fn remove(&self, username: &str, id: SessionId) -> bool {
        let mut members = self.members.lock().await;

        let registered = members
            .get(&id)
            .is_some_and(|member| member.username == username);
        if !registered {
            return false;
        }

        members.remove(&id);
        fan_out(&members, &departure_notice(username), Some(id));
        true
    }

    /// Delivers `message` to every registered session except `exclude`.
    ///
    /// Returns how many sessions accepted the line. A session whose connection
    /// is already gone is skipped; it removes itself when its own read fails.
    /// A session with a full outbox misses the line.
    pub async fn broadcast(&self, message: &str, exclude: Option<SessionId>) -> usize {
        let members = self.members.lock().await;
        fan_out(&members, message, exclude)
    }

    /// Snapshot of the distinct usernames currently registered.
    pub async fn list_usernames(&self) -> BTreeSet<String> {
        let members = self.members.lock().await;
        members
            .values()
            .map(|member| member.username.clone())
            .collect()
    }

    pub async fn has_users(&self) -> bool {
        !self.members.lock().await.is_empty()
    }

    pub async fn contains(&self, id: SessionId) -> bool {
        self.members.lock().await.contains_key(&id)
    }

    pub async fn len(&self) -> usize {
        self.members.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        !self.has_users().await
    }
}

fn fan_out(
    members: &HashMap<SessionId, Member>,
    message: &str,
    exclude: Option<SessionId>,
) -> usize {
    let mut delivered = 0;
    for (id, member) in members {
        if Some(*id) == exclude {
            continue;
        }
        match member.outbox.send(message) {
            Delivery::Queued => delivered += 1,
            Delivery::Full => {
                warn!(
                    session = id,
                    username = %member.username,
                    "session is lagging; line dropped"
                );
            }
            Delivery::Closed => {
                debug!(session = id, username = %member.username, "skipping closed session");
            }
        }
    }
    delivered
}

pub fn join_notice(username: &str) -> String {
    format!("User set their name to {username}")
}

pub fn departure_notice(username: &str) -> String {
    format!("{username} has quit.")
}
