use std::{fmt, sync::atomic::{AtomicU64, Ordering}};

use argon2::{password_hash::{rand_core::OsRng, SaltString}, Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use dashmap::{mapref::entry::Entry, DashMap};
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: String,
    #[serde(skip)]
    pub(crate) credential: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SessionToken(pub String);

impl SessionToken {
    fn new_random() -> Self {
        let mut bytes = [0u8; 32];
        rand::rng().fill(&mut bytes);
        Self(hex::encode(bytes))
    }
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("username must be 3-32 characters of letters, digits or '_'")]
    InvalidUsername,
    #[error("invalid email address")]
    InvalidEmail,
    #[error("password must be at least 6 characters")]
    WeakPassword,
    #[error("username {0} is already taken")]
    UsernameTaken(String),
    #[error("invalid username or password")]
    InvalidCredentials,
    #[error("credential hashing failed: {0}")]
    Hash(String),
}

const MIN_PASSWORD_LEN: usize = 6;

/// Lookups the relay core performs against whoever owns user accounts.
pub trait Directory: Send + Sync {
    fn resolve(&self, token: &str) -> Option<UserId>;
    fn by_id(&self, id: UserId) -> Option<User>;
    fn by_username(&self, username: &str) -> Option<User>;

    fn user_exists(&self, id: UserId) -> bool {
        self.by_id(id).is_some()
    }
}

/// Process-local account and token store. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryDirectory {
    next_id: AtomicU64,
    users: DashMap<UserId, User>,
    usernames: DashMap<String, UserId>,
    tokens: DashMap<String, UserId>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, username: &str, email: &str, password: &str) -> Result<User, IdentityError> {
        if !valid_username(username) {
            return Err(IdentityError::InvalidUsername);
        }
        if !email.contains('@') {
            return Err(IdentityError::InvalidEmail);
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(IdentityError::WeakPassword);
        }

        let credential = hash_password(password)?;

        // the username slot is claimed under its shard lock so two racing
        // registrations can't both win
        let id = match self.usernames.entry(username.to_owned()) {
            Entry::Occupied(_) => return Err(IdentityError::UsernameTaken(username.to_owned())),
            Entry::Vacant(slot) => {
                let id = UserId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
                slot.insert(id);
                id
            }
        };

        let user = User {
            id,
            username: username.to_owned(),
            email: email.to_owned(),
            credential,
        };
        self.users.insert(id, user.clone());

        tracing::info!(user_id = %id, username, "user registered");
        Ok(user)
    }

    pub fn login(&self, username: &str, password: &str) -> Result<(SessionToken, User), IdentityError> {
        let Some(user) = self.by_username(username) else {
            return Err(IdentityError::InvalidCredentials);
        };
        if !verify_password(password, &user.credential)? {
            tracing::warn!(username, "login rejected");
            return Err(IdentityError::InvalidCredentials);
        }

        let token = SessionToken::new_random();
        self.tokens.insert(token.0.clone(), user.id);

        tracing::info!(user_id = %user.id, "session issued");
        Ok((token, user))
    }

    pub fn users(&self) -> Vec<User> {
        let mut users: Vec<User> = self.users.iter().map(|u| u.value().clone()).collect();
        users.sort_by_key(|u| u.id);
        users
    }
}

impl Directory for MemoryDirectory {
    fn resolve(&self, token: &str) -> Option<UserId> {
        self.tokens.get(token).map(|id| *id)
    }

    fn by_id(&self, id: UserId) -> Option<User> {
        self.users.get(&id).map(|u| u.value().clone())
    }

    fn by_username(&self, username: &str) -> Option<User> {
        let id = *self.usernames.get(username)?;
        self.by_id(id)
    }
}

fn valid_username(username: &str) -> bool {
    (3..=32).contains(&username.len())
        && username.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn hash_password(password: &str) -> Result<String, IdentityError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| IdentityError::Hash(e.to_string()))
}

fn verify_password(password: &str, hash: &str) -> Result<bool, IdentityError> {
    let parsed = PasswordHash::new(hash).map_err(|e| IdentityError::Hash(e.to_string()))?;
    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(IdentityError::Hash(e.to_string())),
    }
}
