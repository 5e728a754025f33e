//! Users and user providers.

use std::sync::Mutex;

use serde::Serialize;

use crate::config::UserRecord;
use crate::container::lock;

/// An authenticated identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: u64,
    pub username: String,
    #[serde(skip)]
    pub remember_token: Option<String>,
}

/// Login credentials.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

/// Looks users up for a guard.
pub trait UserProvider: Send + Sync {
    fn retrieve_by_id(&self, id: u64) -> Option<User>;

    /// Look a user up by id and remember-me token.
    fn retrieve_by_token(&self, id: u64, token: &str) -> Option<User>;

    /// Look a user up by everything except the password.
    fn retrieve_by_credentials(&self, credentials: &Credentials) -> Option<User>;

    fn validate_credentials(&self, user: &User, credentials: &Credentials) -> bool;

    fn update_remember_token(&self, user: &User, token: &str);
}

#[derive(Debug)]
struct StoredUser {
    record: UserRecord,
    remember_token: Option<String>,
}

impl StoredUser {
    fn to_user(&self) -> User {
        User {
            id: self.record.id,
            username: self.record.username.clone(),
            remember_token: self.remember_token.clone(),
        }
    }
}

/// Users held in memory, seeded from configuration.
///
/// Remember tokens are kept for the life of the provider, which the auth
/// manager caches for the life of the process.
pub struct InMemoryUserProvider {
    users: Mutex<Vec<StoredUser>>,
}

impl InMemoryUserProvider {
    pub fn new(records: Vec<UserRecord>) -> Self {
        let users = records
            .into_iter()
            .map(|record| StoredUser {
                record,
                remember_token: None,
            })
            .collect();
        Self {
            users: Mutex::new(users),
        }
    }
}

impl UserProvider for InMemoryUserProvider {
    fn retrieve_by_id(&self, id: u64) -> Option<User> {
        lock(&self.users)
            .iter()
            .find(|u| u.record.id == id)
            .map(StoredUser::to_user)
    }

    fn retrieve_by_token(&self, id: u64, token: &str) -> Option<User> {
        lock(&self.users)
            .iter()
            .find(|u| u.record.id == id && u.remember_token.as_deref() == Some(token))
            .map(StoredUser::to_user)
    }

    fn retrieve_by_credentials(&self, credentials: &Credentials) -> Option<User> {
        lock(&self.users)
            .iter()
            .find(|u| u.record.username == credentials.username)
            .map(StoredUser::to_user)
    }

    fn validate_credentials(&self, user: &User, credentials: &Credentials) -> bool {
        lock(&self.users)
            .iter()
            .any(|u| u.record.id == user.id && u.record.password == credentials.password)
    }

    fn update_remember_token(&self, user: &User, token: &str) {
        if let Some(stored) = lock(&self.users).iter_mut().find(|u| u.record.id == user.id) {
            stored.remember_token = Some(token.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> InMemoryUserProvider {
        InMemoryUserProvider::new(vec![UserRecord {
            id: 7,
            username: "ada".into(),
            password: "secret".into(),
        }])
    }

    #[test]
    fn credentials_are_checked_separately_from_lookup() {
        let provider = provider();
        let user = provider
            .retrieve_by_credentials(&Credentials::new("ada", "wrong"))
            .unwrap();
        assert_eq!(user.id, 7);
        assert!(!provider.validate_credentials(&user, &Credentials::new("ada", "wrong")));
        assert!(provider.validate_credentials(&user, &Credentials::new("ada", "secret")));
    }

    #[test]
    fn remember_tokens_are_matched_exactly() {
        let provider = provider();
        let user = provider.retrieve_by_id(7).unwrap();
        assert!(provider.retrieve_by_token(7, "t").is_none());

        provider.update_remember_token(&user, "t");
        assert_eq!(provider.retrieve_by_token(7, "t").unwrap().remember_token.as_deref(), Some("t"));
        assert!(provider.retrieve_by_token(7, "other").is_none());
    }
}
