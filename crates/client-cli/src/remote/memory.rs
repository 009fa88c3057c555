//! In-process backend used by the tests.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::Value;
use shared::{AuthSession, User};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tokio::sync::broadcast;
use url::Url;
use uuid::Uuid;

use super::{AuthChange, AuthChangeEvent, Direction, OAuthProvider, Query, RemoteStore, SignUp, AUTH_EVENT_CAPACITY};
use crate::error::{RemoteError, RemoteResult};

/// Select answer queued by a test: wait `delay`, then return `rows`
struct ScriptedSelect {
    delay: std::time::Duration,
    rows: Vec<Value>,
}

#[derive(Default)]
struct State {
    accounts: HashMap<String, (User, String)>,
    tables: HashMap<String, Vec<Value>>,
    session: Option<AuthSession>,
    failures: HashMap<String, String>,
    scripted_selects: VecDeque<ScriptedSelect>,
    calls: Vec<String>,
}

pub struct MemoryStore {
    state: Mutex<State>,
    events: broadcast::Sender<AuthChange>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(AUTH_EVENT_CAPACITY);
        Self {
            state: Mutex::new(State::default()),
            events,
        }
    }

    /// Register an account that can sign in
    pub fn add_account(&self, email: &str, password: &str) -> User {
        let user = User {
            id: Uuid::new_v4(),
            email: Some(email.to_string()),
        };
        self.state
            .lock()
            .unwrap()
            .accounts
            .insert(email.to_string(), (user.clone(), password.to_string()));
        user
    }

    pub fn has_account(&self, email: &str) -> bool {
        self.state.lock().unwrap().accounts.contains_key(email)
    }

    /// Make the next call of `operation` (e.g. `"sign_in"`, `"insert:profiles"`) fail
    pub fn fail_next(&self, operation: &str, message: &str) {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert(operation.to_string(), message.to_string());
    }

    /// Answer the next select with `rows` after `delay`
    pub fn script_select(&self, delay: std::time::Duration, rows: Vec<Value>) {
        self.state
            .lock()
            .unwrap()
            .scripted_selects
            .push_back(ScriptedSelect { delay, rows });
    }

    pub fn put_row(&self, table: &str, row: Value) {
        self.state
            .lock()
            .unwrap()
            .tables
            .entry(table.to_string())
            .or_default()
            .push(row);
    }

    pub fn rows(&self, table: &str) -> Vec<Value> {
        self.state
            .lock()
            .unwrap()
            .tables
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    /// Operations performed so far, as `"select:projects"`, `"sign_in"`, ...
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn table_calls(&self, table: &str) -> usize {
        let suffix = format!(":{}", table);
        self.calls().iter().filter(|c| c.ends_with(&suffix)).count()
    }

    /// Push an auth change as if it came from the server
    pub fn push_change(&self, change: AuthChange) {
        self.state.lock().unwrap().session = change.session.clone();
        let _ = self.events.send(change);
    }

    pub fn session_for(user: &User) -> AuthSession {
        AuthSession {
            access_token: format!("access-{}", Uuid::new_v4()),
            refresh_token: format!("refresh-{}", Uuid::new_v4()),
            expires_at: Utc::now() + Duration::hours(1),
            user: user.clone(),
        }
    }

    fn record(&self, operation: String) -> RemoteResult<()> {
        let mut state = self.state.lock().unwrap();
        let failure = state.failures.remove(&operation);
        state.calls.push(operation);
        match failure {
            Some(message) => Err(RemoteError::Api {
                status: 400,
                message,
            }),
            None => Ok(()),
        }
    }

    fn store_session(&self, session: Option<AuthSession>, event: AuthChangeEvent) {
        self.state.lock().unwrap().session = session.clone();
        let _ = self.events.send(AuthChange { event, session });
    }
}

fn matches(query: &Query, row: &Value) -> bool {
    query.filters.iter().all(|(column, value)| match row.get(column) {
        Some(Value::String(s)) => s == value,
        Some(other) => other.to_string() == *value,
        None => false,
    })
}

fn sort(query: &Query, rows: &mut [Value]) {
    if let Some(order) = &query.order {
        rows.sort_by(|a, b| {
            let a = a.get(&order.column).map(Value::to_string).unwrap_or_default();
            let b = b.get(&order.column).map(Value::to_string).unwrap_or_default();
            match order.direction {
                Direction::Ascending => a.cmp(&b),
                Direction::Descending => b.cmp(&a),
            }
        });
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn sign_in_with_password(&self, email: &str, password: &str) -> RemoteResult<AuthSession> {
        self.record("sign_in".to_string())?;
        let account = self.state.lock().unwrap().accounts.get(email).cloned();
        match account {
            Some((user, expected)) if expected == password => {
                let session = Self::session_for(&user);
                self.store_session(Some(session.clone()), AuthChangeEvent::SignedIn);
                Ok(session)
            }
            _ => Err(RemoteError::Api {
                status: 400,
                message: "Invalid login credentials".to_string(),
            }),
        }
    }

    fn sign_in_with_oauth(&self, provider: OAuthProvider, redirect_to: &Url) -> RemoteResult<Url> {
        let mut url = Url::parse("http://memory.test/auth/v1/authorize")?;
        url.query_pairs_mut()
            .append_pair("provider", provider.as_str())
            .append_pair("redirect_to", redirect_to.as_str());
        Ok(url)
    }

    async fn set_session(&self, session: AuthSession) -> RemoteResult<()> {
        self.record("set_session".to_string())?;
        self.store_session(Some(session), AuthChangeEvent::SignedIn);
        Ok(())
    }

    async fn sign_up(&self, email: &str, password: &str) -> RemoteResult<SignUp> {
        self.record("sign_up".to_string())?;
        if self.has_account(email) {
            return Err(RemoteError::Api {
                status: 422,
                message: "User already registered".to_string(),
            });
        }
        let user = self.add_account(email, password);
        let session = Self::session_for(&user);
        self.store_session(Some(session.clone()), AuthChangeEvent::SignedIn);
        Ok(SignUp {
            user,
            session: Some(session),
        })
    }

    async fn sign_out(&self) -> RemoteResult<()> {
        self.record("sign_out".to_string())?;
        self.store_session(None, AuthChangeEvent::SignedOut);
        Ok(())
    }

    async fn get_session(&self) -> RemoteResult<Option<AuthSession>> {
        self.record("get_session".to_string())?;
        Ok(self.state.lock().unwrap().session.clone())
    }

    fn on_auth_state_change(&self) -> broadcast::Receiver<AuthChange> {
        self.events.subscribe()
    }

    async fn select(&self, query: &Query) -> RemoteResult<Vec<Value>> {
        self.record(format!("select:{}", query.table))?;

        let scripted = self.state.lock().unwrap().scripted_selects.pop_front();
        if let Some(scripted) = scripted {
            tokio::time::sleep(scripted.delay).await;
            return Ok(scripted.rows);
        }

        let mut rows: Vec<Value> = self
            .rows(&query.table)
            .into_iter()
            .filter(|row| matches(query, row))
            .collect();
        sort(query, &mut rows);
        Ok(rows)
    }

    async fn insert(&self, table: &str, mut row: Value) -> RemoteResult<Value> {
        self.record(format!("insert:{}", table))?;

        let now = Utc::now().to_rfc3339();
        if let Some(fields) = row.as_object_mut() {
            fields.entry("id").or_insert_with(|| Value::String(Uuid::new_v4().to_string()));
            fields.entry("created_at").or_insert_with(|| Value::String(now.clone()));
            fields.entry("updated_at").or_insert_with(|| Value::String(now.clone()));
            if table == "projects" {
                fields.entry("bpm").or_insert(Value::from(120));
                fields.entry("is_public").or_insert(Value::Bool(false));
            }
        }
        self.put_row(table, row.clone());
        Ok(row)
    }

    async fn update(&self, query: &Query, patch: Value) -> RemoteResult<Vec<Value>> {
        self.record(format!("update:{}", query.table))?;

        let mut state = self.state.lock().unwrap();
        let rows = state.tables.entry(query.table.clone()).or_default();
        let mut updated = Vec::new();
        for row in rows.iter_mut().filter(|row| matches(query, row)) {
            if let (Some(fields), Some(changes)) = (row.as_object_mut(), patch.as_object()) {
                for (key, value) in changes {
                    fields.insert(key.clone(), value.clone());
                }
            }
            updated.push(row.clone());
        }
        Ok(updated)
    }

    async fn delete(&self, query: &Query) -> RemoteResult<()> {
        self.record(format!("delete:{}", query.table))?;

        let mut state = self.state.lock().unwrap();
        if let Some(rows) = state.tables.get_mut(&query.table) {
            rows.retain(|row| !matches(query, row));
        }
        Ok(())
    }
}

