//! Seam to the hosted backend: auth primitives plus row CRUD.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use shared::{AuthSession, User};
use std::fmt;
use std::str::FromStr;
use tokio::sync::broadcast;
use url::Url;

use crate::error::{RemoteError, RemoteResult};

#[cfg(test)]
pub mod memory;
pub mod subscription;
pub mod supabase;
pub mod token;

pub use subscription::AuthSubscription;
pub use supabase::SupabaseClient;

/// Capacity of the auth change channel
pub const AUTH_EVENT_CAPACITY: usize = 16;

/// Kind of auth change pushed by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthChangeEvent {
    SignedIn,
    SignedOut,
    TokenRefreshed,
}

/// Auth change notification; `session` is `None` when nobody is signed in
#[derive(Debug, Clone)]
pub struct AuthChange {
    pub event: AuthChangeEvent,
    pub session: Option<AuthSession>,
}

impl AuthChange {
    #[cfg(test)]
    pub fn signed_in(session: AuthSession) -> Self {
        Self {
            event: AuthChangeEvent::SignedIn,
            session: Some(session),
        }
    }

    pub fn signed_out() -> Self {
        Self {
            event: AuthChangeEvent::SignedOut,
            session: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OAuthProvider {
    Google,
    Facebook,
}

impl OAuthProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            OAuthProvider::Google => "google",
            OAuthProvider::Facebook => "facebook",
        }
    }
}

impl fmt::Display for OAuthProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OAuthProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "google" => Ok(OAuthProvider::Google),
            "facebook" => Ok(OAuthProvider::Facebook),
            other => Err(format!("Unsupported provider: {}", other)),
        }
    }
}

/// Result of a sign-up; `session` is absent when the account still needs confirmation
#[derive(Debug, Clone)]
pub struct SignUp {
    pub user: User,
    pub session: Option<AuthSession>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub direction: Direction,
}

/// Table query with equality filters and an optional ordering
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub table: String,
    pub filters: Vec<(String, String)>,
    pub order: Option<Order>,
}

impl Query {
    pub fn table(name: &str) -> Self {
        Self {
            table: name.to_string(),
            filters: Vec::new(),
            order: None,
        }
    }

    pub fn eq(mut self, column: &str, value: impl ToString) -> Self {
        self.filters.push((column.to_string(), value.to_string()));
        self
    }

    pub fn order(mut self, column: &str, direction: Direction) -> Self {
        self.order = Some(Order {
            column: column.to_string(),
            direction,
        });
        self
    }

    /// Filters and ordering as REST query parameters (`col=eq.v`, `order=col.desc`)
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut params: Vec<(String, String)> = self
            .filters
            .iter()
            .map(|(column, value)| (column.clone(), format!("eq.{}", value)))
            .collect();

        if let Some(order) = &self.order {
            let direction = match order.direction {
                Direction::Ascending => "asc",
                Direction::Descending => "desc",
            };
            params.push(("order".to_string(), format!("{}.{}", order.column, direction)));
        }
        params
    }
}

/// Hosted backend: session handling and row-oriented tables.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn sign_in_with_password(&self, email: &str, password: &str) -> RemoteResult<AuthSession>;

    /// Authorization URL of a redirect-based provider login
    fn sign_in_with_oauth(&self, provider: OAuthProvider, redirect_to: &Url) -> RemoteResult<Url>;

    /// Adopt a session obtained out of band (OAuth redirect completion)
    async fn set_session(&self, session: AuthSession) -> RemoteResult<()>;

    async fn sign_up(&self, email: &str, password: &str) -> RemoteResult<SignUp>;

    async fn sign_out(&self) -> RemoteResult<()>;

    /// Current session, refreshed first when it has expired
    async fn get_session(&self) -> RemoteResult<Option<AuthSession>>;

    /// New receiver for auth change events
    fn on_auth_state_change(&self) -> broadcast::Receiver<AuthChange>;

    async fn select(&self, query: &Query) -> RemoteResult<Vec<Value>>;

    /// Insert one row and return it as stored
    async fn insert(&self, table: &str, row: Value) -> RemoteResult<Value>;

    /// Patch all matching rows and return them as stored
    async fn update(&self, query: &Query, patch: Value) -> RemoteResult<Vec<Value>>;

    async fn delete(&self, query: &Query) -> RemoteResult<()>;
}

/// Run `query` and decode every row as `T`
pub async fn select_rows<T: DeserializeOwned>(
    store: &dyn RemoteStore,
    query: &Query,
) -> RemoteResult<Vec<T>> {
    store
        .select(query)
        .await?
        .into_iter()
        .map(|row| serde_json::from_value(row).map_err(RemoteError::from))
        .collect()
}
