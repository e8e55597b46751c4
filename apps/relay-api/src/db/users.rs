//! User storage behind a trait: Postgres in production, in-memory in tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use crate::db::pool::DbPool;
use crate::db::schema::users;
use crate::error::ApiError;
use crate::models::user::{NewUser, User};

/// Fields supplied when creating a user; id generation and password hashing
/// happen in the registration route.
#[derive(Debug)]
pub struct NewUserRecord {
    pub id: String,
    pub username: String,
    pub email: String,
    pub password_hash: String,
}

/// Abstraction over the identity store consumed by the auth routes and the
/// gateway's session authenticator.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create(&self, new_user: NewUserRecord) -> Result<User, ApiError>;
    async fn find_by_id(&self, id: &str) -> Result<Option<User>, ApiError>;
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, ApiError>;
}

// ---------------------------------------------------------------------------
// Postgres implementation
// ---------------------------------------------------------------------------

pub struct PgUserStore {
    pool: DbPool,
}

impl PgUserStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn create(&self, new_user: NewUserRecord) -> Result<User, ApiError> {
        let mut conn = self.pool.get().await?;

        let user: User = diesel::insert_into(users::table)
            .values(NewUser {
                id: &new_user.id,
                username: &new_user.username,
                email: &new_user.email,
                password_hash: &new_user.password_hash,
                created_at: Utc::now(),
            })
            .returning(User::as_returning())
            .get_result(&mut conn)
            .await
            .map_err(|e| match e {
                diesel::result::Error::DatabaseError(
                    diesel::result::DatabaseErrorKind::UniqueViolation,
                    ref info,
                ) => {
                    let constraint = info.constraint_name().unwrap_or("");
                    if constraint.contains("username") {
                        ApiError::conflict("Username is already taken")
                    } else if constraint.contains("email") {
                        ApiError::conflict("Email is already registered")
                    } else {
                        ApiError::conflict("A user with that information already exists")
                    }
                }
                other => ApiError::from(other),
            })?;

        Ok(user)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<User>, ApiError> {
        let mut conn = self.pool.get().await?;

        let user = users::table
            .find(id)
            .select(User::as_select())
            .first(&mut conn)
            .await
            .optional()?;

        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, ApiError> {
        let mut conn = self.pool.get().await?;

        let user = users::table
            .filter(users::email.eq(email))
            .select(User::as_select())
            .first(&mut conn)
            .await
            .optional()?;

        Ok(user)
    }
}

// ---------------------------------------------------------------------------
// In-memory implementation (for tests)
// ---------------------------------------------------------------------------

pub struct MemoryUserStore {
    data: Mutex<HashMap<String, User>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self {
            data: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryUserStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn create(&self, new_user: NewUserRecord) -> Result<User, ApiError> {
        let mut data = self.data.lock().unwrap();

        if data.values().any(|u| u.username == new_user.username) {
            return Err(ApiError::conflict("Username is already taken"));
        }
        if data.values().any(|u| u.email == new_user.email) {
            return Err(ApiError::conflict("Email is already registered"));
        }

        let user = User {
            id: new_user.id,
            username: new_user.username,
            email: new_user.email,
            password_hash: new_user.password_hash,
            created_at: Utc::now(),
        };
        data.insert(user.id.clone(), user.clone());

        Ok(user)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<User>, ApiError> {
        Ok(self.data.lock().unwrap().get(id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, ApiError> {
        Ok(self
            .data
            .lock()
            .unwrap()
            .values()
            .find(|u| u.email == email)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, username: &str, email: &str) -> NewUserRecord {
        NewUserRecord {
            id: id.to_string(),
            username: username.to_string(),
            email: email.to_string(),
            password_hash: "hash".to_string(),
        }
    }

    #[tokio::test]
    async fn create_and_find() {
        let store = MemoryUserStore::new();
        let user = store
            .create(record("usr_1", "alice", "alice@example.com"))
            .await
            .unwrap();
        assert_eq!(user.username, "alice");

        let found = store.find_by_id("usr_1").await.unwrap().unwrap();
        assert_eq!(found.email, "alice@example.com");

        let by_email = store
            .find_by_email("alice@example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_email.id, "usr_1");
    }

    #[tokio::test]
    async fn duplicate_username_conflicts() {
        let store = MemoryUserStore::new();
        store
            .create(record("usr_1", "alice", "alice@example.com"))
            .await
            .unwrap();

        let err = store
            .create(record("usr_2", "alice", "other@example.com"))
            .await
            .unwrap_err();
        assert_eq!(err.code, "CONFLICT");
    }

    #[tokio::test]
    async fn unknown_id_is_none() {
        let store = MemoryUserStore::new();
        assert!(store.find_by_id("usr_missing").await.unwrap().is_none());
    }
}
