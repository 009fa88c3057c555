//! Session manager: single source of truth for who is logged in.
//!
//! State transitions are driven only by auth change events from the store.
//! Operations such as `sign_in_with_email` ask the store to act and return;
//! the resulting event moves the published state.
//!
//! ```text
//! Unknown ──(initial session fetch)──► Authenticated | Anonymous
//! Anonymous ──(event with session)──► Authenticated
//! Authenticated ──(event without session)──► Anonymous
//! ```

use serde_json::Value;
use shared::{AuthSession, NewProfile, Profile, ProfileUpdate, User};
use std::sync::{Arc, Weak};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::error::{AuthError, AuthResult};
use crate::remote::token::RedirectTokens;
use crate::remote::{select_rows, AuthChange, AuthSubscription, OAuthProvider, Query, RemoteStore};
use crate::routes::Route;

/// Published authentication state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    /// Initial session lookup has not finished
    Unknown,
    Anonymous,
    Authenticated { user: User, profile: Option<Profile> },
}

impl AuthState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthState::Authenticated { .. })
    }

    pub fn user(&self) -> Option<&User> {
        match self {
            AuthState::Authenticated { user, .. } => Some(user),
            _ => None,
        }
    }

    pub fn user_id(&self) -> Option<Uuid> {
        self.user().map(|user| user.id)
    }

    pub fn profile(&self) -> Option<&Profile> {
        match self {
            AuthState::Authenticated { profile, .. } => profile.as_ref(),
            _ => None,
        }
    }
}

pub struct SessionManager {
    store: Arc<dyn RemoteStore>,
    /// Origin the OAuth provider redirects back to
    site_url: Url,
    state_tx: watch::Sender<AuthState>,
    session: Mutex<Option<AuthSession>>,
    subscription: Mutex<Option<AuthSubscription>>,
}

impl SessionManager {
    /// Subscribe to auth changes and resolve the initial session.
    pub async fn start(store: Arc<dyn RemoteStore>, site_url: Url) -> Arc<Self> {
        let (state_tx, _) = watch::channel(AuthState::Unknown);
        let manager = Arc::new(Self {
            store,
            site_url,
            state_tx,
            session: Mutex::new(None),
            subscription: Mutex::new(None),
        });

        // Subscribe before the initial lookup so no change slips in between
        let events = manager.store.on_auth_state_change();
        let weak: Weak<SessionManager> = Arc::downgrade(&manager);
        let subscription = AuthSubscription::start(events, move |change| {
            let weak = weak.clone();
            async move {
                if let Some(manager) = weak.upgrade() {
                    manager.apply_change(change).await;
                }
            }
        });
        *manager.subscription.lock().await = Some(subscription);

        match manager.store.get_session().await {
            Ok(Some(session)) => manager.establish(session).await,
            Ok(None) => manager.clear().await,
            Err(e) => {
                warn!("Initial session lookup failed: {}", e);
                manager.clear().await;
            }
        }

        manager
    }

    /// Release the auth change subscription
    pub async fn shutdown(&self) {
        if let Some(subscription) = self.subscription.lock().await.take() {
            subscription.stop().await;
            debug!("Session manager stopped");
        }
    }

    pub fn current(&self) -> AuthState {
        self.state_tx.borrow().clone()
    }

    /// Receiver that observes every published state
    pub fn changes(&self) -> watch::Receiver<AuthState> {
        self.state_tx.subscribe()
    }

    /// Wait until the published state satisfies `predicate`
    pub async fn wait_for(&self, predicate: impl FnMut(&AuthState) -> bool) -> AuthState {
        let mut changes = self.changes();
        let state = match changes.wait_for(predicate).await {
            Ok(state) => state.clone(),
            // Sender lives in self, so the channel cannot close while we wait
            Err(_) => self.current(),
        };
        state
    }

    // =========================================================================
    // Operations
    // =========================================================================

    pub async fn sign_in_with_email(&self, email: &str, password: &str) -> AuthResult<()> {
        self.store
            .sign_in_with_password(email, password)
            .await
            .map_err(|e| {
                info!("Sign-in rejected: {}", e);
                AuthError::from(e)
            })?;
        Ok(())
    }

    /// Authorization URL for a provider login that lands on the project list
    pub fn sign_in_with_oauth(&self, provider: OAuthProvider) -> AuthResult<Url> {
        let redirect_to = self
            .site_url
            .join(&Route::Projects.path())
            .map_err(|e| AuthError::Auth(e.to_string()))?;
        let url = self.store.sign_in_with_oauth(provider, &redirect_to)?;
        info!(%provider, "OAuth sign-in started");
        Ok(url)
    }

    /// Finish a provider login from the URL the provider redirected to
    pub async fn complete_oauth(&self, redirect_url: &str) -> AuthResult<()> {
        let session = RedirectTokens::from_redirect_url(redirect_url)?.into_session(chrono::Utc::now())?;
        self.store.set_session(session).await?;
        Ok(())
    }

    /// Create the account and its profile row.
    ///
    /// A failed profile insert does not remove the account; the caller gets
    /// `ProfileCreation` and the account stays usable without a profile.
    pub async fn sign_up(&self, email: &str, password: &str, name: &str) -> AuthResult<User> {
        let sign_up = self.store.sign_up(email, password).await?;
        let user = sign_up.user;

        let row = serde_json::to_value(NewProfile {
            id: user.id,
            name: name.to_string(),
        })
        .map_err(|e| AuthError::ProfileCreation {
            user_id: user.id,
            message: e.to_string(),
        })?;

        match self.store.insert("profiles", row).await {
            Ok(row) => {
                info!(user_id = %user.id, "Profile created");
                if let Ok(profile) = serde_json::from_value::<Profile>(row) {
                    self.publish_profile(user.id, profile);
                }
                Ok(user)
            }
            Err(e) => {
                warn!(
                    user_id = %user.id,
                    "Account created without a profile: {}", e
                );
                Err(AuthError::ProfileCreation {
                    user_id: user.id,
                    message: e.user_message(),
                })
            }
        }
    }

    pub async fn sign_out(&self) -> AuthResult<()> {
        self.store.sign_out().await?;
        Ok(())
    }

    /// Best-effort profile lookup; failures are logged and yield `None`
    pub async fn fetch_profile(&self, user_id: Uuid) -> Option<Profile> {
        let query = Query::table("profiles").eq("id", user_id);
        match select_rows::<Profile>(self.store.as_ref(), &query).await {
            Ok(rows) => {
                let profile = rows.into_iter().next();
                if profile.is_none() {
                    debug!(%user_id, "No profile row");
                }
                if let Some(profile) = &profile {
                    self.publish_profile(user_id, profile.clone());
                }
                profile
            }
            Err(e) => {
                warn!(%user_id, "Failed to fetch profile: {}", e);
                None
            }
        }
    }

    pub async fn update_profile(&self, update: ProfileUpdate) -> AuthResult<Profile> {
        let user_id = self.current().user_id().ok_or(AuthError::NotAuthenticated)?;

        let mut patch = serde_json::to_value(&update).map_err(|e| AuthError::InvalidInput(e.to_string()))?;
        patch["updated_at"] = Value::String(chrono::Utc::now().to_rfc3339());

        let query = Query::table("profiles").eq("id", user_id);
        let rows = self
            .store
            .update(&query, patch)
            .await
            .map_err(AuthError::ProfileUpdate)?;
        let row = rows.into_iter().next().ok_or_else(|| {
            AuthError::ProfileUpdate(crate::error::RemoteError::UnexpectedResponse(
                "profile row not found".to_string(),
            ))
        })?;
        let profile: Profile = serde_json::from_value(row)
            .map_err(|e| AuthError::ProfileUpdate(e.into()))?;

        self.publish_profile(user_id, profile.clone());
        Ok(profile)
    }

    // =========================================================================
    // Event application
    // =========================================================================

    async fn apply_change(&self, change: AuthChange) {
        debug!(event = ?change.event, "Applying auth change");
        match change.session {
            Some(session) => self.establish(session).await,
            None => self.clear().await,
        }
    }

    async fn establish(&self, session: AuthSession) {
        let user = session.user.clone();
        let new_user = {
            let mut current = self.session.lock().await;
            let new_user = match current.as_ref() {
                Some(existing) if existing.same_as(&session) => {
                    debug!(user_id = %user.id, "Session already applied");
                    return;
                }
                Some(existing) => existing.user.id != user.id,
                None => true,
            };
            *current = Some(session);
            new_user
        };

        if !new_user {
            debug!(user_id = %user.id, "Session tokens refreshed");
            return;
        }

        info!(user_id = %user.id, "Authenticated");
        self.state_tx.send_replace(AuthState::Authenticated {
            user: user.clone(),
            profile: None,
        });
        self.fetch_profile(user.id).await;
    }

    async fn clear(&self) {
        let had_session = self.session.lock().await.take().is_some();
        if had_session {
            info!("Signed out");
        }
        self.state_tx.send_if_modified(|state| {
            if *state == AuthState::Anonymous {
                return false;
            }
            *state = AuthState::Anonymous;
            true
        });
    }

    /// Attach `profile` if `user_id` is still the signed-in user
    fn publish_profile(&self, user_id: Uuid, profile: Profile) {
        self.state_tx.send_if_modified(|state| match state {
            AuthState::Authenticated { user, profile: current } if user.id == user_id => {
                if current.as_ref() == Some(&profile) {
                    return false;
                }
                *current = Some(profile);
                true
            }
            _ => false,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::memory::MemoryStore;
    use crate::remote::token::test_access_token;
    use chrono::Utc;
    use std::time::Duration;

    fn site() -> Url {
        Url::parse("http://localhost:5173").unwrap()
    }

    fn profile_row(user_id: Uuid, name: &str) -> serde_json::Value {
        let now = Utc::now().to_rfc3339();
        serde_json::json!({ "id": user_id, "name": name, "avatar_url": null, "created_at": now, "updated_at": now })
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_start_without_session_is_anonymous() {
        let store = Arc::new(MemoryStore::new());
        let manager = SessionManager::start(store, site()).await;
        assert_eq!(manager.current(), AuthState::Anonymous);
        assert!(manager.subscription.lock().await.is_some());
    }

    #[tokio::test]
    async fn test_start_with_existing_session_fetches_profile() {
        let store = Arc::new(MemoryStore::new());
        let user = store.add_account("a@b.com", "pw123456");
        store.put_row("profiles", profile_row(user.id, "Ana"));
        store.push_change(AuthChange::signed_in(MemoryStore::session_for(&user)));

        let manager = SessionManager::start(store, site()).await;
        let state = manager.current();
        assert_eq!(state.user_id(), Some(user.id));
        assert_eq!(state.profile().map(|p| p.name.as_str()), Some("Ana"));
    }

    #[tokio::test]
    async fn test_sign_in_converges_through_event() {
        let store = Arc::new(MemoryStore::new());
        let user = store.add_account("a@b.com", "pw123456");
        let manager = SessionManager::start(store.clone(), site()).await;

        manager.sign_in_with_email("a@b.com", "pw123456").await.unwrap();
        let state = manager.wait_for(AuthState::is_authenticated).await;
        assert_eq!(state.user_id(), Some(user.id));
    }

    #[tokio::test]
    async fn test_invalid_credentials_stay_anonymous() {
        let store = Arc::new(MemoryStore::new());
        store.add_account("a@b.com", "pw123456");
        let manager = SessionManager::start(store, site()).await;

        let err = manager.sign_in_with_email("a@b.com", "wrong").await.unwrap_err();
        assert!(matches!(err, AuthError::Auth(ref m) if m == "Invalid login credentials"));
        settle().await;
        assert_eq!(manager.current(), AuthState::Anonymous);
    }

    #[tokio::test]
    async fn test_same_session_applied_twice_is_noop() {
        let store = Arc::new(MemoryStore::new());
        let user = store.add_account("a@b.com", "pw123456");
        let manager = SessionManager::start(store.clone(), site()).await;

        let session = MemoryStore::session_for(&user);
        store.push_change(AuthChange::signed_in(session.clone()));
        manager.wait_for(AuthState::is_authenticated).await;
        settle().await;
        let profile_reads = store.table_calls("profiles");

        store.push_change(AuthChange::signed_in(session));
        settle().await;
        assert_eq!(store.table_calls("profiles"), profile_reads);
        assert!(manager.current().is_authenticated());
    }

    #[tokio::test]
    async fn test_token_refresh_keeps_profile() {
        let store = Arc::new(MemoryStore::new());
        let user = store.add_account("a@b.com", "pw123456");
        store.put_row("profiles", profile_row(user.id, "Ana"));
        let manager = SessionManager::start(store.clone(), site()).await;

        store.push_change(AuthChange::signed_in(MemoryStore::session_for(&user)));
        manager.wait_for(|s| s.profile().is_some()).await;
        let profile_reads = store.table_calls("profiles");

        store.push_change(AuthChange {
            event: crate::remote::AuthChangeEvent::TokenRefreshed,
            session: Some(MemoryStore::session_for(&user)),
        });
        settle().await;
        assert_eq!(store.table_calls("profiles"), profile_reads);
        assert_eq!(manager.current().profile().map(|p| p.name.as_str()), Some("Ana"));
    }

    #[tokio::test]
    async fn test_profile_fetch_failure_leaves_profile_empty() {
        let store = Arc::new(MemoryStore::new());
        let user = store.add_account("a@b.com", "pw123456");
        store.put_row("profiles", profile_row(user.id, "Ana"));
        let manager = SessionManager::start(store.clone(), site()).await;

        store.fail_next("select:profiles", "timeout");
        manager.sign_in_with_email("a@b.com", "pw123456").await.unwrap();
        let state = manager.wait_for(AuthState::is_authenticated).await;
        settle().await;
        assert_eq!(state.user_id(), Some(user.id));
        assert!(manager.current().profile().is_none());
        assert!(manager.current().is_authenticated());
    }

    #[tokio::test]
    async fn test_sign_up_creates_profile() {
        let store = Arc::new(MemoryStore::new());
        let manager = SessionManager::start(store.clone(), site()).await;

        let user = manager.sign_up("a@b.com", "pw123456", "Ana").await.unwrap();
        let profiles = store.rows("profiles");
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0]["id"], user.id.to_string());
        assert_eq!(profiles[0]["name"], "Ana");

        let state = manager.wait_for(|s| s.profile().is_some()).await;
        assert_eq!(state.profile().map(|p| p.name.as_str()), Some("Ana"));
    }

    #[tokio::test]
    async fn test_sign_up_profile_failure_keeps_account() {
        let store = Arc::new(MemoryStore::new());
        let manager = SessionManager::start(store.clone(), site()).await;

        store.fail_next("insert:profiles", "permission denied");
        let err = manager.sign_up("a@b.com", "pw123456", "Ana").await.unwrap_err();
        match err {
            AuthError::ProfileCreation { message, .. } => assert_eq!(message, "permission denied"),
            other => panic!("Expected ProfileCreation, got {:?}", other),
        }
        assert!(store.has_account("a@b.com"));
        assert!(store.rows("profiles").is_empty());
    }

    #[tokio::test]
    async fn test_sign_out_clears_state() {
        let store = Arc::new(MemoryStore::new());
        store.add_account("a@b.com", "pw123456");
        let manager = SessionManager::start(store.clone(), site()).await;
        manager.sign_in_with_email("a@b.com", "pw123456").await.unwrap();
        manager.wait_for(AuthState::is_authenticated).await;

        manager.sign_out().await.unwrap();
        let state = manager.wait_for(|s| *s == AuthState::Anonymous).await;
        assert!(state.user().is_none());
    }

    #[tokio::test]
    async fn test_sign_out_failure_keeps_session() {
        let store = Arc::new(MemoryStore::new());
        store.add_account("a@b.com", "pw123456");
        let manager = SessionManager::start(store.clone(), site()).await;
        manager.sign_in_with_email("a@b.com", "pw123456").await.unwrap();
        manager.wait_for(AuthState::is_authenticated).await;

        store.fail_next("sign_out", "network down");
        let err = manager.sign_out().await.unwrap_err();
        assert_eq!(err.to_string(), "network down");
        settle().await;
        assert!(manager.current().is_authenticated());
    }

    #[tokio::test]
    async fn test_oauth_redirect_targets_projects() {
        let store = Arc::new(MemoryStore::new());
        let manager = SessionManager::start(store, site()).await;
        let url = manager.sign_in_with_oauth(OAuthProvider::Facebook).unwrap();
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("provider".to_string(), "facebook".to_string())));
        assert!(pairs.contains(&(
            "redirect_to".to_string(),
            "http://localhost:5173/projects".to_string()
        )));
    }

    #[tokio::test]
    async fn test_complete_oauth_authenticates() {
        let store = Arc::new(MemoryStore::new());
        let manager = SessionManager::start(store, site()).await;
        let user_id = Uuid::new_v4();
        let token = test_access_token(user_id, "a@b.com", Utc::now().timestamp() + 3600);

        manager
            .complete_oauth(&format!(
                "http://localhost:5173/projects#access_token={}&refresh_token=r&expires_in=3600",
                token
            ))
            .await
            .unwrap();
        let state = manager.wait_for(AuthState::is_authenticated).await;
        assert_eq!(state.user_id(), Some(user_id));
    }

    #[tokio::test]
    async fn test_update_profile_requires_user() {
        let store = Arc::new(MemoryStore::new());
        let manager = SessionManager::start(store, site()).await;
        let err = manager
            .update_profile(ProfileUpdate {
                name: Some("Bia".to_string()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::NotAuthenticated));
    }

    #[tokio::test]
    async fn test_update_profile_publishes_new_name() {
        let store = Arc::new(MemoryStore::new());
        let manager = SessionManager::start(store.clone(), site()).await;
        manager.sign_up("a@b.com", "pw123456", "Ana").await.unwrap();
        manager.wait_for(|s| s.profile().is_some()).await;

        let profile = manager
            .update_profile(ProfileUpdate {
                name: Some("Bia".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(profile.name, "Bia");
        assert_eq!(manager.current().profile().map(|p| p.name.as_str()), Some("Bia"));
    }

    #[tokio::test]
    async fn test_shutdown_releases_subscription() {
        let store = Arc::new(MemoryStore::new());
        let user = store.add_account("a@b.com", "pw123456");
        let manager = SessionManager::start(store.clone(), site()).await;

        manager.shutdown().await;
        assert!(manager.subscription.lock().await.is_none());

        store.push_change(AuthChange::signed_in(MemoryStore::session_for(&user)));
        settle().await;
        assert_eq!(manager.current(), AuthState::Anonymous);
    }
}
