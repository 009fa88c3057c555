//! Project repository: the signed-in owner's projects with a local cache.

use serde_json::Value;
use shared::{NewProject, Project, ProjectUpdate};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{ProjectError, ProjectResult, RemoteError};
use crate::remote::{select_rows, Direction, Query, RemoteStore};
use crate::session::AuthState;

const TABLE: &str = "projects";

#[derive(Default)]
struct Cache {
    projects: Vec<Project>,
    /// Generation of the last fetch, clear or mutation applied to `projects`
    generation: u64,
}

pub struct ProjectRepository {
    store: Arc<dyn RemoteStore>,
    session: watch::Receiver<AuthState>,
    cache: RwLock<Cache>,
    next_generation: AtomicU64,
    in_flight: AtomicUsize,
}

impl ProjectRepository {
    pub fn new(store: Arc<dyn RemoteStore>, session: watch::Receiver<AuthState>) -> Self {
        Self {
            store,
            session,
            cache: RwLock::new(Cache::default()),
            next_generation: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
        }
    }

    fn current_user(&self) -> Option<Uuid> {
        self.session.borrow().user_id()
    }

    fn next_generation(&self) -> u64 {
        self.next_generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Mark the cache as newer than every fetch issued so far
    fn stamp(&self, cache: &mut Cache) {
        cache.generation = self.next_generation();
    }

    fn owned(&self, owner_id: Uuid) -> Query {
        Query::table(TABLE).eq("owner_id", owner_id)
    }

    /// Snapshot of the cached list, most recently updated first
    pub async fn projects(&self) -> Vec<Project> {
        self.cache.read().await.projects.clone()
    }

    pub async fn get(&self, id: Uuid) -> Option<Project> {
        self.cache
            .read()
            .await
            .projects
            .iter()
            .find(|p| p.id == id)
            .cloned()
    }

    pub fn is_loading(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst) > 0
    }

    /// Reload the owner's projects; failures are logged and keep the current list.
    ///
    /// The list of the most recently issued fetch wins, whatever order the
    /// responses arrive in: a response is dropped once a later fetch, a clear
    /// or a successful create/update/delete has touched the cache. This differs
    /// from keeping whichever response lands last, which can resurrect a list
    /// that predates a later request or a local mutation.
    pub async fn fetch_projects(&self) {
        let Some(owner_id) = self.current_user() else {
            debug!("No user, skipping project fetch");
            return;
        };
        let generation = self.next_generation();
        self.in_flight.fetch_add(1, Ordering::SeqCst);

        let query = self
            .owned(owner_id)
            .order("updated_at", Direction::Descending);
        let result = select_rows::<Project>(self.store.as_ref(), &query).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match result {
            Ok(projects) => {
                let mut cache = self.cache.write().await;
                if generation < cache.generation {
                    debug!(generation, current = cache.generation, "Dropping stale project list");
                    return;
                }
                debug!(count = projects.len(), %owner_id, "Projects loaded");
                cache.generation = generation;
                cache.projects = projects;
            }
            Err(e) => {
                error!(%owner_id, "Failed to fetch projects: {}", e);
            }
        }
    }

    /// Empty the cache and invalidate fetches still in flight
    pub async fn clear(&self) {
        let mut cache = self.cache.write().await;
        self.stamp(&mut cache);
        cache.projects.clear();
    }

    pub async fn create_project(&self, name: Option<&str>) -> ProjectResult<Project> {
        let owner_id = self.current_user().ok_or(ProjectError::NotAuthenticated)?;

        let row = serde_json::to_value(NewProject::new(owner_id, name))
            .map_err(|e| ProjectError::RemoteWrite(e.into()))?;
        let row = self.store.insert(TABLE, row).await.map_err(|e| {
            error!(%owner_id, "Failed to create project: {}", e);
            ProjectError::RemoteWrite(e)
        })?;
        let project: Project =
            serde_json::from_value(row).map_err(|e| ProjectError::RemoteWrite(e.into()))?;

        let mut cache = self.cache.write().await;
        self.stamp(&mut cache);
        cache.projects.retain(|p| p.id != project.id);
        cache.projects.insert(0, project.clone());
        info!(project_id = %project.id, "Project created");
        Ok(project)
    }

    /// Apply `update` to one of the owner's projects and return the stored row
    pub async fn update_project(&self, id: Uuid, update: ProjectUpdate) -> ProjectResult<Project> {
        let owner_id = self.current_user().ok_or(ProjectError::NotAuthenticated)?;
        if update.is_empty() {
            return self.get(id).await.ok_or(ProjectError::NotFound(id));
        }

        let mut patch =
            serde_json::to_value(&update).map_err(|e| ProjectError::RemoteWrite(e.into()))?;
        patch["updated_at"] = Value::String(chrono::Utc::now().to_rfc3339());

        let query = self.owned(owner_id).eq("id", id);
        let rows = self.store.update(&query, patch).await.map_err(|e| {
            error!(project_id = %id, "Failed to update project: {}", e);
            ProjectError::RemoteWrite(e)
        })?;
        let Some(row) = rows.into_iter().next() else {
            warn!(project_id = %id, "Update matched no project");
            return Err(ProjectError::NotFound(id));
        };
        let project: Project = serde_json::from_value(row)
            .map_err(|e| ProjectError::RemoteWrite(RemoteError::from(e)))?;

        let mut cache = self.cache.write().await;
        self.stamp(&mut cache);
        if let Some(cached) = cache.projects.iter_mut().find(|p| p.id == id) {
            *cached = project.clone();
        }
        debug!(project_id = %id, "Project updated");
        Ok(project)
    }

    pub async fn delete_project(&self, id: Uuid) -> ProjectResult<()> {
        let owner_id = self.current_user().ok_or(ProjectError::NotAuthenticated)?;

        let query = self.owned(owner_id).eq("id", id);
        self.store.delete(&query).await.map_err(|e| {
            error!(project_id = %id, "Failed to delete project: {}", e);
            ProjectError::RemoteWrite(e)
        })?;

        let mut cache = self.cache.write().await;
        self.stamp(&mut cache);
        cache.projects.retain(|p| p.id != id);
        info!(project_id = %id, "Project deleted");
        Ok(())
    }

    /// Follow identity changes after the call: reload for a new user, clear
    /// when signed out. The current user's list is loaded by the caller.
    pub fn watch_identity(self: &Arc<Self>) -> JoinHandle<()> {
        let mut changes = self.session.clone();
        let weak: Weak<ProjectRepository> = Arc::downgrade(self);
        let mut last_user = changes.borrow_and_update().user_id();

        tokio::spawn(async move {
            while changes.changed().await.is_ok() {
                let user = changes.borrow_and_update().user_id();
                if user == last_user {
                    continue;
                }
                let Some(repo) = weak.upgrade() else { break };
                match user {
                    Some(user_id) => {
                        debug!(%user_id, "User changed, reloading projects");
                        repo.fetch_projects().await;
                    }
                    None => {
                        debug!("Signed out, clearing projects");
                        repo.clear().await;
                    }
                }
                last_user = user;
            }
        })
    }
}
