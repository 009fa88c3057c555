//! Dashboard: the project list screen and its actions.

use chrono::{DateTime, Utc};
use shared::{Project, ProjectUpdate};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error};
use uuid::Uuid;

use crate::error::{ProjectError, ProjectResult};
use crate::projects::ProjectRepository;
use crate::routes::{guard, Navigator, Route};
use crate::session::AuthState;

/// Asks the user to confirm a destructive action
pub trait Confirm: Send + Sync {
    fn confirm(&self, prompt: &str) -> bool;
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectCard {
    pub id: Uuid,
    pub name: String,
    pub bpm: u32,
    pub updated_at: DateTime<Utc>,
}

impl ProjectCard {
    pub fn last_updated(&self) -> String {
        self.updated_at.format("%b %-d, %Y").to_string()
    }
}

impl From<&Project> for ProjectCard {
    fn from(project: &Project) -> Self {
        Self {
            id: project.id,
            name: project.name.clone(),
            bpm: project.bpm,
            updated_at: project.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DashboardView {
    LoginPrompt,
    Loading,
    Empty,
    Projects(Vec<ProjectCard>),
}

impl fmt::Display for DashboardView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DashboardView::LoginPrompt => write!(f, "Please log in to view your projects"),
            DashboardView::Loading => write!(f, "Loading projects..."),
            DashboardView::Empty => write!(f, "No projects yet. Create one to get started."),
            DashboardView::Projects(cards) => {
                for (i, card) in cards.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(
                        f,
                        "{}  {:<32} {:>3} bpm  Last updated {}",
                        card.id,
                        card.name,
                        card.bpm,
                        card.last_updated()
                    )?;
                }
                Ok(())
            }
        }
    }
}

/// Pending inline rename
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenameDraft {
    pub project_id: Uuid,
    pub text: String,
}

pub struct Dashboard {
    repo: Arc<ProjectRepository>,
    session: watch::Receiver<AuthState>,
    navigator: Arc<dyn Navigator>,
    draft: Mutex<Option<RenameDraft>>,
}

impl Dashboard {
    pub fn new(
        repo: Arc<ProjectRepository>,
        session: watch::Receiver<AuthState>,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        Self {
            repo,
            session,
            navigator,
            draft: Mutex::new(None),
        }
    }

    fn is_authenticated(&self) -> bool {
        self.session.borrow().is_authenticated()
    }

    pub async fn view(&self) -> DashboardView {
        if !self.is_authenticated() {
            return DashboardView::LoginPrompt;
        }
        let projects = self.repo.projects().await;
        if projects.is_empty() {
            if self.repo.is_loading() {
                DashboardView::Loading
            } else {
                DashboardView::Empty
            }
        } else {
            DashboardView::Projects(projects.iter().map(ProjectCard::from).collect())
        }
    }

    /// Load the list; does nothing for anonymous users
    pub async fn load(&self) {
        if !self.is_authenticated() {
            debug!("Dashboard shown without a user");
            return;
        }
        self.repo.fetch_projects().await;
    }

    /// Create a project and open it in the studio
    pub async fn create(&self, name: Option<&str>) -> ProjectResult<Project> {
        if !self.is_authenticated() {
            return Err(ProjectError::NotAuthenticated);
        }
        match self.repo.create_project(name).await {
            Ok(project) => {
                self.navigator.navigate(Route::Studio(project.id));
                Ok(project)
            }
            Err(e) => {
                error!("Failed to create project: {}", e);
                Err(e)
            }
        }
    }

    /// Go to the studio for `id`; anonymous users land on `/`
    pub fn open(&self, id: Uuid) {
        let route = guard(Route::Studio(id), &self.session.borrow());
        self.navigator.navigate(route);
    }

    // =========================================================================
    // Inline rename
    // =========================================================================

    /// Start renaming `id`; false if it is not in the list
    pub async fn begin_rename(&self, id: Uuid) -> bool {
        let Some(project) = self.repo.get(id).await else {
            return false;
        };
        *self.draft.lock().await = Some(RenameDraft {
            project_id: id,
            text: project.name,
        });
        true
    }

    pub async fn edit_draft(&self, text: &str) {
        if let Some(draft) = self.draft.lock().await.as_mut() {
            draft.text = text.to_string();
        }
    }

    pub async fn draft(&self) -> Option<RenameDraft> {
        self.draft.lock().await.clone()
    }

    pub async fn cancel_rename(&self) {
        self.draft.lock().await.take();
    }

    /// Save the draft. The draft is consumed whether or not the save succeeds.
    pub async fn commit_rename(&self) -> ProjectResult<Option<Project>> {
        let Some(draft) = self.draft.lock().await.take() else {
            return Ok(None);
        };
        let name = draft.text.trim();
        if name.is_empty() {
            debug!(project_id = %draft.project_id, "Empty name, rename dropped");
            return Ok(None);
        }

        match self
            .repo
            .update_project(draft.project_id, ProjectUpdate::rename(name))
            .await
        {
            Ok(project) => Ok(Some(project)),
            Err(e) => {
                error!(project_id = %draft.project_id, "Failed to rename project: {}", e);
                Err(e)
            }
        }
    }

    // =========================================================================
    // Delete
    // =========================================================================

    /// Delete after confirmation; `Ok(false)` when the user declined
    pub async fn delete(&self, id: Uuid, confirm: &dyn Confirm) -> ProjectResult<bool> {
        let name = self
            .repo
            .get(id)
            .await
            .map(|p| p.name)
            .unwrap_or_else(|| id.to_string());
        let prompt = format!("Delete project \"{}\"? This cannot be undone.", name);
        if !confirm.confirm(&prompt) {
            debug!(project_id = %id, "Delete cancelled");
            return Ok(false);
        }
        self.repo.delete_project(id).await?;
        Ok(true)
    }
}
