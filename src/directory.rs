//! Read-only view of the source identity system.
//!
//! The full resync reads the current users and groups through [`Directory`].
//! Hosts implement it over their own user/group managers;
//! [`InMemoryDirectory`] serves tests and embedding without a backing system.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A user as the source system currently sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalUser {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub email: Option<String>,
    pub enabled: bool,
}

impl LocalUser {
    /// An enabled user whose display name equals its id.
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            display_name: id.clone(),
            id,
            email: None,
            enabled: true,
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// A group and the local ids of its members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalGroup {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub members: Vec<String>,
}

impl LocalGroup {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            display_name: id.clone(),
            id,
            members: Vec::new(),
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    pub fn with_members<I, S>(mut self, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.members = members.into_iter().map(Into::into).collect();
        self
    }
}

/// Source of the current user and group set.
pub trait Directory: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    fn list_users(&self) -> impl Future<Output = Result<Vec<LocalUser>, Self::Error>> + Send;

    fn list_groups(&self) -> impl Future<Output = Result<Vec<LocalGroup>, Self::Error>> + Send;
}

#[derive(Debug, Default)]
struct DirectoryState {
    users: BTreeMap<String, LocalUser>,
    groups: BTreeMap<String, String>,
    memberships: BTreeMap<String, BTreeSet<String>>,
}

/// Thread-safe in-memory directory. Listings are ordered by id.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDirectory {
    state: Arc<RwLock<DirectoryState>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a user.
    pub async fn add_user(&self, user: LocalUser) {
        let mut state = self.state.write().await;
        state.users.insert(user.id.clone(), user);
    }

    /// Remove a user and its memberships.
    pub async fn remove_user(&self, user_id: &str) -> bool {
        let mut state = self.state.write().await;
        for members in state.memberships.values_mut() {
            members.remove(user_id);
        }
        state.users.remove(user_id).is_some()
    }

    /// Insert or replace a group, including its member list.
    pub async fn add_group(&self, group: LocalGroup) {
        let mut state = self.state.write().await;
        state
            .memberships
            .insert(group.id.clone(), group.members.into_iter().collect());
        state.groups.insert(group.id, group.display_name);
    }

    pub async fn remove_group(&self, group_id: &str) -> bool {
        let mut state = self.state.write().await;
        state.memberships.remove(group_id);
        state.groups.remove(group_id).is_some()
    }

    /// Add a user to an existing group. Returns false if the group is unknown.
    pub async fn add_member(&self, group_id: &str, user_id: &str) -> bool {
        let mut state = self.state.write().await;
        match state.memberships.get_mut(group_id) {
            Some(members) => {
                members.insert(user_id.to_string());
                true
            }
            None => false,
        }
    }

    pub async fn remove_member(&self, group_id: &str, user_id: &str) -> bool {
        let mut state = self.state.write().await;
        state
            .memberships
            .get_mut(group_id)
            .is_some_and(|members| members.remove(user_id))
    }
}

impl Directory for InMemoryDirectory {
    type Error = Infallible;

    async fn list_users(&self) -> Result<Vec<LocalUser>, Self::Error> {
        let state = self.state.read().await;
        Ok(state.users.values().cloned().collect())
    }

    async fn list_groups(&self) -> Result<Vec<LocalGroup>, Self::Error> {
        let state = self.state.read().await;
        Ok(state
            .groups
            .iter()
            .map(|(id, display_name)| LocalGroup {
                id: id.clone(),
                display_name: display_name.clone(),
                members: state
                    .memberships
                    .get(id)
                    .map(|members| members.iter().cloned().collect())
                    .unwrap_or_default(),
            })
            .collect())
    }
}
