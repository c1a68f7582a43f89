//! Relational store boundary.
//!
//! The dispatch engine needs a handful of point lookups and idempotent upserts
//! keyed by the external user id: registering users, their language, their
//! "alive" flag (whether the bot can still reach them) and their ban flag.
//! No call spans a transaction; each one is atomic on its own.
//!
//! Activity counting is a separate boundary ([`ActivityStore`]) so that the
//! counter can live wherever atomic increments are cheap.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::StoreResult;
use crate::event::{Sender, UserId};

/// A row of the `users` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub user_id: UserId,
    pub username: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub language: String,
    pub is_alive: bool,
    pub banned: bool,
}

/// Data needed to register a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub user_id: UserId,
    pub username: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub language: String,
}

impl NewUser {
    /// Builds a registration from a platform sender profile.
    pub fn from_sender(sender: &Sender, language: impl Into<String>) -> Self {
        Self {
            user_id: sender.id,
            username: sender.username.clone(),
            first_name: sender.first_name.clone(),
            last_name: sender.last_name.clone(),
            language: language.into(),
        }
    }
}

/// User persistence.
///
/// Setters on unknown users are no-ops; getters return `None` for them.
#[async_trait]
pub trait UserStore: Send + Sync + 'static {
    /// Inserts the user unless one with the same id exists.
    ///
    /// Returns `true` if a new row was created.
    async fn add_user(&self, user: NewUser) -> StoreResult<bool>;

    async fn get_user(&self, user_id: UserId) -> StoreResult<Option<UserRecord>>;

    async fn get_language(&self, user_id: UserId) -> StoreResult<Option<String>>;

    async fn set_language(&self, user_id: UserId, language: &str) -> StoreResult<()>;

    async fn get_alive(&self, user_id: UserId) -> StoreResult<Option<bool>>;

    async fn set_alive(&self, user_id: UserId, alive: bool) -> StoreResult<()>;

    async fn get_banned(&self, user_id: UserId) -> StoreResult<Option<bool>>;

    async fn set_banned(&self, user_id: UserId, banned: bool) -> StoreResult<()>;
}

/// Per-user activity counter.
#[async_trait]
pub trait ActivityStore: Send + Sync + 'static {
    /// Atomically increments the user's counter and returns the new value.
    async fn record_activity(&self, user_id: UserId) -> StoreResult<u64>;

    async fn activity(&self, user_id: UserId) -> StoreResult<u64>;
}

// =============================================================================
// In-memory implementations
// =============================================================================

/// [`UserStore`] kept in process memory.
#[derive(Default)]
pub struct MemoryUserStore {
    users: RwLock<HashMap<UserId, UserRecord>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn update(&self, user_id: UserId, f: impl FnOnce(&mut UserRecord)) {
        match self.users.write().get_mut(&user_id) {
            Some(user) => f(user),
            None => warn!(user_id, "No user found in the store, update ignored"),
        }
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn add_user(&self, user: NewUser) -> StoreResult<bool> {
        let mut users = self.users.write();
        if users.contains_key(&user.user_id) {
            return Ok(false);
        }
        info!(user_id = user.user_id, language = %user.language, "User added");
        users.insert(
            user.user_id,
            UserRecord {
                user_id: user.user_id,
                username: user.username,
                first_name: user.first_name,
                last_name: user.last_name,
                language: user.language,
                is_alive: true,
                banned: false,
            },
        );
        Ok(true)
    }

    async fn get_user(&self, user_id: UserId) -> StoreResult<Option<UserRecord>> {
        Ok(self.users.read().get(&user_id).cloned())
    }

    async fn get_language(&self, user_id: UserId) -> StoreResult<Option<String>> {
        Ok(self.users.read().get(&user_id).map(|u| u.language.clone()))
    }

    async fn set_language(&self, user_id: UserId, language: &str) -> StoreResult<()> {
        self.update(user_id, |u| u.language = language.to_string());
        debug!(user_id, language, "Language updated");
        Ok(())
    }

    async fn get_alive(&self, user_id: UserId) -> StoreResult<Option<bool>> {
        Ok(self.users.read().get(&user_id).map(|u| u.is_alive))
    }

    async fn set_alive(&self, user_id: UserId, alive: bool) -> StoreResult<()> {
        self.update(user_id, |u| u.is_alive = alive);
        debug!(user_id, alive, "Alive status updated");
        Ok(())
    }

    async fn get_banned(&self, user_id: UserId) -> StoreResult<Option<bool>> {
        Ok(self.users.read().get(&user_id).map(|u| u.banned))
    }

    async fn set_banned(&self, user_id: UserId, banned: bool) -> StoreResult<()> {
        self.update(user_id, |u| u.banned = banned);
        debug!(user_id, banned, "Banned status updated");
        Ok(())
    }
}

/// [`ActivityStore`] kept in process memory.
#[derive(Default)]
pub struct MemoryActivityStore {
    counters: RwLock<HashMap<UserId, u64>>,
}

impl MemoryActivityStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ActivityStore for MemoryActivityStore {
    async fn record_activity(&self, user_id: UserId) -> StoreResult<u64> {
        let mut counters = self.counters.write();
        let count = counters.entry(user_id).or_insert(0);
        *count += 1;
        Ok(*count)
    }

    async fn activity(&self, user_id: UserId) -> StoreResult<u64> {
        Ok(self.counters.read().get(&user_id).copied().unwrap_or(0))
    }
}
