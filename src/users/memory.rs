use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    model::{NewUser, User, UserChanges},
    repo::{StoreError, StoreResult, UserStore},
};

/// In-process store with the same uniqueness rules as the `users` table.
#[derive(Default)]
pub struct MemoryUserStore {
    rows: RwLock<HashMap<Uuid, User>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }
}

fn check_unique(
    rows: &HashMap<Uuid, User>,
    except: Option<Uuid>,
    username: Option<&str>,
    email: Option<&str>,
    github_id: Option<i64>,
) -> StoreResult<()> {
    for other in rows.values().filter(|u| Some(u.id) != except) {
        if username.is_some_and(|v| v == other.username) {
            return Err(StoreError::Conflict("username"));
        }
        if email.is_some_and(|v| v == other.email) {
            return Err(StoreError::Conflict("email"));
        }
        if github_id.is_some() && github_id == other.github_id {
            return Err(StoreError::Conflict("github_id"));
        }
    }
    Ok(())
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.rows.read().await.get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let rows = self.rows.read().await;
        Ok(rows.values().find(|u| u.email == email).cloned())
    }

    async fn find_by_github_id(&self, github_id: i64) -> StoreResult<Option<User>> {
        let rows = self.rows.read().await;
        Ok(rows
            .values()
            .find(|u| u.github_id == Some(github_id))
            .cloned())
    }

    async fn create(&self, new: NewUser) -> StoreResult<User> {
        let mut rows = self.rows.write().await;
        check_unique(
            &rows,
            None,
            Some(&new.username),
            Some(&new.email),
            new.github_id,
        )?;

        let now = OffsetDateTime::now_utc();
        let user = User {
            id: Uuid::new_v4(),
            username: new.username,
            email: new.email,
            password_hash: new.password.map(|p| p.into_string()),
            avatar: new.avatar,
            github_id: new.github_id,
            created_at: now,
            updated_at: now,
        };
        rows.insert(user.id, user.clone());
        Ok(user)
    }

    async fn update(&self, id: Uuid, changes: UserChanges) -> StoreResult<Option<User>> {
        let mut rows = self.rows.write().await;
        if !rows.contains_key(&id) {
            return Ok(None);
        }
        check_unique(
            &rows,
            Some(id),
            changes.username.as_deref(),
            changes.email.as_deref(),
            None,
        )?;

        let Some(user) = rows.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(username) = changes.username {
            user.username = username;
        }
        if let Some(email) = changes.email {
            user.email = email;
        }
        if let Some(password) = changes.password {
            user.password_hash = Some(password.into_string());
        }
        if let Some(avatar) = changes.avatar {
            user.avatar = Some(avatar);
        }
        user.updated_at = OffsetDateTime::now_utc();
        Ok(Some(user.clone()))
    }

    async fn delete(&self, id: Uuid) -> StoreResult<bool> {
        Ok(self.rows.write().await.remove(&id).is_some())
    }
}
