use tracing::{info, instrument};

use super::github::ProviderProfile;
use crate::{
    error::AppError,
    storage::{discard_avatar, AvatarStorage},
    users::{
        model::{NewUser, User, UserChanges},
        repo::UserStore,
    },
    validation::{normalize_email, USERNAME_MAX, USERNAME_MIN},
};

const PLACEHOLDER_EMAIL_DOMAIN: &str = "users.noreply.github.com";

/// Provider login clipped to the local length range. Logins below the
/// minimum get the provider id appended.
fn local_username(login: &str, provider_user_id: i64) -> String {
    let name: String = login.chars().take(USERNAME_MAX).collect();
    if name.chars().count() >= USERNAME_MIN {
        return name;
    }
    format!("{name}-{provider_user_id}")
        .chars()
        .take(USERNAME_MAX)
        .collect()
}

fn placeholder_email(login: &str) -> String {
    format!("{}@{PLACEHOLDER_EMAIL_DOMAIN}", login.to_lowercase())
}

/// Maps a provider profile onto exactly one local user: find by provider id,
/// then create or refresh.
#[instrument(skip_all, fields(github_id = profile.provider_user_id))]
pub async fn reconcile(
    users: &dyn UserStore,
    avatars: &dyn AvatarStorage,
    profile: &ProviderProfile,
) -> Result<User, AppError> {
    let email = profile
        .email
        .as_deref()
        .map(normalize_email)
        .filter(|e| !e.is_empty());

    let Some(existing) = users.find_by_github_id(profile.provider_user_id).await? else {
        let user = users
            .create(NewUser {
                username: local_username(&profile.login, profile.provider_user_id),
                email: email.unwrap_or_else(|| placeholder_email(&profile.login)),
                password: None,
                avatar: profile.avatar_url.clone(),
                github_id: Some(profile.provider_user_id),
            })
            .await?;
        info!(user_id = %user.id, "user created from github login");
        return Ok(user);
    };

    let changes = UserChanges {
        username: Some(local_username(&profile.login, profile.provider_user_id)),
        // A private email on the provider side must not wipe the stored one.
        email,
        password: None,
        avatar: profile.avatar_url.clone(),
    };
    let replaced_avatar = match (&existing.avatar, &changes.avatar) {
        (Some(old), Some(new)) if old != new => Some(old.clone()),
        _ => None,
    };

    let user = users
        .update(existing.id, changes)
        .await?
        .ok_or_else(|| anyhow::anyhow!("user {} vanished during reconciliation", existing.id))?;

    if let Some(old) = replaced_avatar {
        discard_avatar(avatars, &old).await;
    }
    info!(user_id = %user.id, "user refreshed from github login");
    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        storage::LocalAvatarStorage,
        users::{memory::MemoryUserStore, repo::UserStore},
        validation::check_username,
    };
    use bytes::Bytes;

    fn profile(id: i64, login: &str, email: Option<&str>) -> ProviderProfile {
        ProviderProfile {
            provider_user_id: id,
            login: login.into(),
            email: email.map(Into::into),
            avatar_url: Some(format!("https://avatars.githubusercontent.com/u/{id}?v=4")),
        }
    }

    fn avatars(dir: &tempfile::TempDir) -> LocalAvatarStorage {
        LocalAvatarStorage::new(dir.path())
    }

    #[tokio::test]
    async fn unseen_provider_id_creates_one_user() {
        let store = MemoryUserStore::new();
        let dir = tempfile::tempdir().unwrap();
        let user = reconcile(&store, &avatars(&dir), &profile(7, "octocat", Some("Octo@Example.com")))
            .await
            .unwrap();

        assert_eq!(user.username, "octocat");
        assert_eq!(user.email, "octo@example.com");
        assert_eq!(user.github_id, Some(7));
        assert!(user.is_oauth_only());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn missing_email_gets_placeholder() {
        let store = MemoryUserStore::new();
        let dir = tempfile::tempdir().unwrap();
        let user = reconcile(&store, &avatars(&dir), &profile(8, "Hidden", None))
            .await
            .unwrap();
        assert_eq!(user.email, "hidden@users.noreply.github.com");
    }

    #[tokio::test]
    async fn repeat_login_updates_instead_of_duplicating() {
        let store = MemoryUserStore::new();
        let dir = tempfile::tempdir().unwrap();
        let storage = avatars(&dir);

        let first = reconcile(&store, &storage, &profile(9, "octocat", Some("octo@example.com")))
            .await
            .unwrap();
        let second = reconcile(&store, &storage, &profile(9, "octocat-renamed", None))
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.username, "octocat-renamed");
        assert_eq!(second.email, "octo@example.com");
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn long_logins_are_truncated() {
        let store = MemoryUserStore::new();
        let dir = tempfile::tempdir().unwrap();
        let login = "a".repeat(39);
        let user = reconcile(&store, &avatars(&dir), &profile(10, &login, None))
            .await
            .unwrap();
        assert_eq!(user.username.len(), USERNAME_MAX);
    }

    #[tokio::test]
    async fn one_character_login_is_padded_with_provider_id() {
        let store = MemoryUserStore::new();
        let dir = tempfile::tempdir().unwrap();
        let user = reconcile(&store, &avatars(&dir), &profile(13, "x", None))
            .await
            .unwrap();
        assert_eq!(user.username, "x-13");
        assert!(check_username(&user.username).is_none());

        let again = reconcile(&store, &avatars(&dir), &profile(13, "x", None))
            .await
            .unwrap();
        assert_eq!(again.id, user.id);
        assert_eq!(again.username, "x-13");
    }

    #[tokio::test]
    async fn login_colliding_with_local_username_conflicts() {
        let store = MemoryUserStore::new();
        let dir = tempfile::tempdir().unwrap();
        store
            .create(NewUser {
                username: "octocat".into(),
                email: "local@example.com".into(),
                password: None,
                avatar: None,
                github_id: None,
            })
            .await
            .unwrap();

        let err = reconcile(&store, &avatars(&dir), &profile(11, "octocat", None))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(ref f) if f == "username"));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn replaced_local_avatar_is_removed() {
        let store = MemoryUserStore::new();
        let dir = tempfile::tempdir().unwrap();
        let storage = avatars(&dir);

        let user = reconcile(&store, &storage, &profile(12, "painter", None))
            .await
            .unwrap();
        let local = storage
            .put("avatar-local.png", Bytes::from_static(b"png"))
            .await
            .unwrap();
        store
            .update(
                user.id,
                UserChanges {
                    avatar: Some(local),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let refreshed = reconcile(&store, &storage, &profile(12, "painter", None))
            .await
            .unwrap();
        assert!(refreshed.avatar.unwrap().starts_with("https://"));
        assert!(!dir.path().join("avatar-local.png").exists());
    }
}
