//! HTTP client for the hosted backend (GoTrue auth + PostgREST tables).

use async_trait::async_trait;
use chrono::{Duration, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shared::{AuthSession, User};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info, warn};
use url::Url;

use super::{AuthChange, AuthChangeEvent, OAuthProvider, Query, RemoteStore, SignUp, AUTH_EVENT_CAPACITY};
use crate::error::{RemoteError, RemoteResult};

#[derive(Debug, Serialize)]
struct PasswordRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// Token grant response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    expires_in: i64,
    user: User,
}

impl TokenResponse {
    fn into_session(self) -> RemoteResult<AuthSession> {
        let expires_at = Duration::try_seconds(self.expires_in)
            .and_then(|ttl| Utc::now().checked_add_signed(ttl))
            .ok_or_else(|| {
                RemoteError::UnexpectedResponse(format!("expires_in out of range: {}", self.expires_in))
            })?;
        Ok(AuthSession {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            user: self.user,
        })
    }
}

/// Hosted backend client.
///
/// Holds the current session the way the browser SDK does: sign-in stores it,
/// sign-out clears it, and every change is announced on the auth change channel.
pub struct SupabaseClient {
    http_client: reqwest::Client,
    api_url: String,
    anon_key: String,
    session: RwLock<Option<AuthSession>>,
    events: broadcast::Sender<AuthChange>,
}

impl SupabaseClient {
    /// Create a new client.
    ///
    /// # Arguments
    /// * `api_url` - Project API URL (e.g., `https://xyz.supabase.co`)
    /// * `anon_key` - Public anonymous API key
    pub fn new(api_url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(AUTH_EVENT_CAPACITY);
        Self {
            http_client: reqwest::Client::new(),
            api_url: api_url.into().trim_end_matches('/').to_string(),
            anon_key: anon_key.into(),
            session: RwLock::new(None),
            events,
        }
    }

    /// Start with a previously persisted session
    pub fn with_session(mut self, session: Option<AuthSession>) -> Self {
        self.session = RwLock::new(session);
        self
    }

    /// Session as currently held, without refreshing
    pub async fn current_session(&self) -> Option<AuthSession> {
        self.session.read().await.clone()
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.api_url, path)
    }

    fn rest_url(&self, query_table: &str) -> String {
        format!("{}/rest/v1/{}", self.api_url, query_table)
    }

    fn table_url(&self, query: &Query) -> RemoteResult<Url> {
        let mut url = Url::parse(&self.rest_url(&query.table))?;
        url.query_pairs_mut().extend_pairs(query.to_params());
        Ok(url)
    }

    fn announce(&self, change: AuthChange) {
        debug!(event = ?change.event, "Auth state change");
        // No receivers is fine; nobody is listening yet
        let _ = self.events.send(change);
    }

    async fn store_session(&self, session: AuthSession, event: AuthChangeEvent) {
        *self.session.write().await = Some(session.clone());
        self.announce(AuthChange {
            event,
            session: Some(session),
        });
    }

    async fn clear_session(&self) {
        *self.session.write().await = None;
        self.announce(AuthChange::signed_out());
    }

    async fn refresh(&self, refresh_token: &str) -> RemoteResult<AuthSession> {
        let response = self
            .http_client
            .post(self.auth_url("token?grant_type=refresh_token"))
            .header("apikey", &self.anon_key)
            .json(&RefreshRequest { refresh_token })
            .send()
            .await?;

        let token: TokenResponse = Self::parse_response(response).await?;
        token.into_session()
    }

    /// Bearer token for table requests: the session's access token, else the anon key
    async fn bearer(&self) -> RemoteResult<String> {
        Ok(match self.get_session().await? {
            Some(session) => session.access_token,
            None => self.anon_key.clone(),
        })
    }

    async fn rest_request(&self, method: reqwest::Method, url: Url) -> RemoteResult<reqwest::RequestBuilder> {
        let bearer = self.bearer().await?;
        Ok(self
            .http_client
            .request(method, url)
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", bearer)))
    }

    // =========================================================================
    // HTTP helpers
    // =========================================================================

    /// Decode a successful response body, or turn an error status into `RemoteError::Api`
    async fn parse_response<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> RemoteResult<T> {
        let response = Self::check_response(response).await?;
        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn check_response(response: reqwest::Response) -> RemoteResult<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        error!("Backend request failed: {} - {}", status, body);
        Err(RemoteError::Api {
            status,
            message: error_message(&body).unwrap_or_else(|| format!("Request failed with status {}", status)),
        })
    }
}

/// Pull the human readable message out of an auth or REST error body
fn error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    ["error_description", "msg", "message", "error"]
        .iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}

/// Sign-up answers with a full token grant when no confirmation is required,
/// otherwise with the bare user object.
fn parse_sign_up(body: Value) -> RemoteResult<SignUp> {
    if body.get("access_token").is_some() {
        let token: TokenResponse = serde_json::from_value(body)?;
        let session = token.into_session()?;
        return Ok(SignUp {
            user: session.user.clone(),
            session: Some(session),
        });
    }

    let user = match body.get("user") {
        Some(user) if !user.is_null() => serde_json::from_value(user.clone())?,
        _ => serde_json::from_value(body)?,
    };
    Ok(SignUp { user, session: None })
}

#[async_trait]
impl RemoteStore for SupabaseClient {
    async fn sign_in_with_password(&self, email: &str, password: &str) -> RemoteResult<AuthSession> {
        let response = self
            .http_client
            .post(self.auth_url("token?grant_type=password"))
            .header("apikey", &self.anon_key)
            .json(&PasswordRequest { email, password })
            .send()
            .await?;

        let token: TokenResponse = Self::parse_response(response).await?;
        let session = token.into_session()?;
        info!(user_id = %session.user.id, "Signed in with password");
        self.store_session(session.clone(), AuthChangeEvent::SignedIn).await;
        Ok(session)
    }

    fn sign_in_with_oauth(&self, provider: OAuthProvider, redirect_to: &Url) -> RemoteResult<Url> {
        let mut url = Url::parse(&self.auth_url("authorize"))?;
        url.query_pairs_mut()
            .append_pair("provider", provider.as_str())
            .append_pair("redirect_to", redirect_to.as_str());
        Ok(url)
    }

    async fn set_session(&self, session: AuthSession) -> RemoteResult<()> {
        info!(user_id = %session.user.id, "Session established from redirect");
        self.store_session(session, AuthChangeEvent::SignedIn).await;
        Ok(())
    }

    async fn sign_up(&self, email: &str, password: &str) -> RemoteResult<SignUp> {
        let response = self
            .http_client
            .post(self.auth_url("signup"))
            .header("apikey", &self.anon_key)
            .json(&PasswordRequest { email, password })
            .send()
            .await?;

        let body: Value = Self::parse_response(response).await?;
        let sign_up = parse_sign_up(body)?;
        info!(user_id = %sign_up.user.id, confirmed = sign_up.session.is_some(), "Account created");

        if let Some(session) = &sign_up.session {
            self.store_session(session.clone(), AuthChangeEvent::SignedIn).await;
        }
        Ok(sign_up)
    }

    async fn sign_out(&self) -> RemoteResult<()> {
        let Some(session) = self.current_session().await else {
            self.clear_session().await;
            return Ok(());
        };

        let response = self
            .http_client
            .post(self.auth_url("logout"))
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", session.access_token))
            .send()
            .await?;

        match response.status() {
            // Session already gone on the server; finish locally
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => {
                warn!("Session was already invalid on the server");
            }
            _ => {
                Self::check_response(response).await?;
            }
        }

        info!(user_id = %session.user.id, "Signed out");
        self.clear_session().await;
        Ok(())
    }

    async fn get_session(&self) -> RemoteResult<Option<AuthSession>> {
        let Some(session) = self.current_session().await else {
            return Ok(None);
        };
        if !session.is_expired(Utc::now()) {
            return Ok(Some(session));
        }

        debug!(user_id = %session.user.id, "Access token expired, refreshing");
        match self.refresh(&session.refresh_token).await {
            Ok(refreshed) => {
                self.store_session(refreshed.clone(), AuthChangeEvent::TokenRefreshed)
                    .await;
                Ok(Some(refreshed))
            }
            Err(RemoteError::Api { status, message }) => {
                warn!(status, "Session refresh rejected: {}", message);
                self.clear_session().await;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn on_auth_state_change(&self) -> broadcast::Receiver<AuthChange> {
        self.events.subscribe()
    }

    async fn select(&self, query: &Query) -> RemoteResult<Vec<Value>> {
        let mut url = self.table_url(query)?;
        url.query_pairs_mut().append_pair("select", "*");

        debug!(table = %query.table, "Selecting rows");
        let response = self.rest_request(reqwest::Method::GET, url).await?.send().await?;
        Self::parse_response(response).await
    }

    async fn insert(&self, table: &str, row: Value) -> RemoteResult<Value> {
        let url = Url::parse(&self.rest_url(table))?;

        debug!(table, "Inserting row");
        let response = self
            .rest_request(reqwest::Method::POST, url)
            .await?
            .header("Prefer", "return=representation")
            .json(&row)
            .send()
            .await?;

        let rows: Vec<Value> = Self::parse_response(response).await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| RemoteError::UnexpectedResponse(format!("insert into {} returned no row", table)))
    }

    async fn update(&self, query: &Query, patch: Value) -> RemoteResult<Vec<Value>> {
        let url = self.table_url(query)?;

        debug!(table = %query.table, "Updating rows");
        let response = self
            .rest_request(reqwest::Method::PATCH, url)
            .await?
            .header("Prefer", "return=representation")
            .json(&patch)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    async fn delete(&self, query: &Query) -> RemoteResult<()> {
        let url = self.table_url(query)?;

        debug!(table = %query.table, "Deleting rows");
        let response = self
            .rest_request(reqwest::Method::DELETE, url)
            .await?
            .send()
            .await?;

        Self::check_response(response).await?;
        Ok(())
    }
}

impl std::fmt::Debug for SupabaseClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupabaseClient")
            .field("api_url", &self.api_url)
            .finish_non_exhaustive()
    }
}
