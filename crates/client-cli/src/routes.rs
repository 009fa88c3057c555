use std::fmt;
use uuid::Uuid;

use crate::session::AuthState;

/// Navigable locations of the app
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Landing,
    Projects,
    /// Project editor (placeholder)
    Studio(Uuid),
    NotFound(String),
}

impl Route {
    pub fn parse(path: &str) -> Self {
        let trimmed = path.trim_end_matches('/');
        let segments: Vec<&str> = trimmed.split('/').filter(|s| !s.is_empty()).collect();
        match segments.as_slice() {
            [] => Route::Landing,
            ["projects"] => Route::Projects,
            ["studio", id] => match Uuid::parse_str(id) {
                Ok(id) => Route::Studio(id),
                Err(_) => Route::NotFound(path.to_string()),
            },
            _ => Route::NotFound(path.to_string()),
        }
    }

    pub fn path(&self) -> String {
        match self {
            Route::Landing => "/".to_string(),
            Route::Projects => "/projects".to_string(),
            Route::Studio(id) => format!("/studio/{}", id),
            Route::NotFound(path) => path.clone(),
        }
    }

    pub fn requires_auth(&self) -> bool {
        matches!(self, Route::Projects | Route::Studio(_))
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

/// Route actually shown for `route`; protected routes send anonymous users to `/`
pub fn guard(route: Route, state: &AuthState) -> Route {
    if route.requires_auth() && !state.is_authenticated() {
        tracing::debug!(%route, "Redirecting anonymous user to landing");
        return Route::Landing;
    }
    route
}

/// Receives navigation requests from the views
pub trait Navigator: Send + Sync {
    fn navigate(&self, route: Route);
}


#[cfg(test)]
mod tests {
    use super::*;
    use shared::User;

    #[test]
    fn test_parse_known_routes() {
        let id = Uuid::new_v4();
        assert_eq!(Route::parse("/"), Route::Landing);
        assert_eq!(Route::parse("/projects/"), Route::Projects);
        assert_eq!(Route::parse(&format!("/studio/{}", id)), Route::Studio(id));
        assert_eq!(
            Route::parse("/studio/not-a-uuid"),
            Route::NotFound("/studio/not-a-uuid".to_string())
        );
        assert_eq!(
            Route::parse("/community"),
            Route::NotFound("/community".to_string())
        );
    }

    #[test]
    fn test_path_round_trip() {
        let id = Uuid::new_v4();
        assert_eq!(Route::Studio(id).to_string(), format!("/studio/{}", id));
        assert_eq!(Route::parse(&Route::Projects.path()), Route::Projects);
    }

    #[test]
    fn test_guard_redirects_anonymous() {
        let id = Uuid::new_v4();
        assert_eq!(guard(Route::Projects, &AuthState::Anonymous), Route::Landing);
        assert_eq!(guard(Route::Studio(id), &AuthState::Unknown), Route::Landing);
        assert_eq!(guard(Route::Landing, &AuthState::Anonymous), Route::Landing);

        let signed_in = AuthState::Authenticated {
            user: User {
                id: Uuid::new_v4(),
                email: None,
            },
            profile: None,
        };
        assert_eq!(guard(Route::Studio(id), &signed_in), Route::Studio(id));
    }
}
