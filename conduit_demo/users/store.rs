use async_trait::async_trait;
use dashmap::{DashMap, mapref::entry::Entry};
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicU32, Ordering},
};
use tracing::debug;

use conduit_app::uow::{UnitOfWork, UnitOfWorkProvider};
use conduit_types::errors::ApplicationError;

use super::UserDto;

#[derive(Debug)]
pub struct InMemoryUserStore {
    users: DashMap<u32, UserDto>,
    /// Lowercased email to user id.
    emails: DashMap<String, u32>,
    next_id: AtomicU32,
}

impl Default for InMemoryUserStore {
    fn default() -> Self {
        Self {
            users: DashMap::new(),
            emails: DashMap::new(),
            next_id: AtomicU32::new(1),
        }
    }
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a new user, or returns `None` when the email is already
    /// registered. The email is reserved and the user stored under one
    /// shard lock, so concurrent inserts can't both claim it.
    pub fn insert(&self, first_name: &str, last_name: &str, email: &str) -> Option<UserDto> {
        let Entry::Vacant(slot) = self.emails.entry(email.to_ascii_lowercase()) else {
            return None;
        };

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let user = UserDto {
            id,
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            email: email.to_string(),
        };
        self.users.insert(id, user.clone());
        slot.insert(id);
        Some(user)
    }

    pub fn get(&self, id: u32) -> Option<UserDto> {
        self.users.get(&id).map(|user| user.clone())
    }

    pub fn remove(&self, id: u32) -> Option<UserDto> {
        let (_, user) = self.users.remove(&id)?;
        self.emails
            .remove_if(&user.email.to_ascii_lowercase(), |_, owner| *owner == id);
        Some(user)
    }

    pub fn email_taken(&self, email: &str) -> bool {
        self.emails.contains_key(&email.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

/// Ordered record of side effects triggered by user notifications.
#[derive(Debug, Default)]
pub struct AuditTrail {
    entries: Mutex<Vec<String>>,
}

impl AuditTrail {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: impl Into<String>) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(entry.into());
        }
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }
}

/// Counts transaction outcomes. The user store writes directly, so there is
/// nothing to stage: only the decision is observable.
#[derive(Debug, Default)]
pub struct CountingUnitOfWorkProvider {
    outcomes: Arc<Outcomes>,
}

#[derive(Debug, Default)]
struct Outcomes {
    commits: AtomicU32,
    rollbacks: AtomicU32,
}

impl CountingUnitOfWorkProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commits(&self) -> u32 {
        self.outcomes.commits.load(Ordering::SeqCst)
    }

    pub fn rollbacks(&self) -> u32 {
        self.outcomes.rollbacks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UnitOfWorkProvider for CountingUnitOfWorkProvider {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, ApplicationError> {
        Ok(Box::new(CountingUnitOfWork {
            outcomes: self.outcomes.clone(),
        }))
    }
}

struct CountingUnitOfWork {
    outcomes: Arc<Outcomes>,
}

#[async_trait]
impl UnitOfWork for CountingUnitOfWork {
    async fn commit(self: Box<Self>) -> Result<(), ApplicationError> {
        self.outcomes.commits.fetch_add(1, Ordering::SeqCst);
        debug!("Unit of work committed");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), ApplicationError> {
        self.outcomes.rollbacks.fetch_add(1, Ordering::SeqCst);
        debug!("Unit of work rolled back");
        Ok(())
    }
}
