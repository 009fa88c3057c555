//! Login / sign-up form and the CLI's auth status output

use tracing::debug;
use url::Url;

use crate::error::{AuthError, AuthResult};
use crate::remote::OAuthProvider;
use crate::routes::{Navigator, Route};
use crate::session::{AuthState, SessionManager};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    Login,
    SignUp,
}

/// Credential form state
#[derive(Debug, Clone)]
pub struct AuthForm {
    mode: AuthMode,
    pub email: String,
    pub password: String,
    /// Only used when signing up
    pub name: String,
    error: Option<String>,
    open: bool,
}

impl AuthForm {
    pub fn new(mode: AuthMode) -> Self {
        Self {
            mode,
            email: String::new(),
            password: String::new(),
            name: String::new(),
            error: None,
            open: true,
        }
    }

    pub fn mode(&self) -> AuthMode {
        self.mode
    }

    pub fn toggle_mode(&mut self) {
        self.mode = match self.mode {
            AuthMode::Login => AuthMode::SignUp,
            AuthMode::SignUp => AuthMode::Login,
        };
        self.error = None;
    }

    /// Message from the last failed submit
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    fn validate(&self) -> AuthResult<()> {
        let email = self.email.trim();
        if email.is_empty() {
            return Err(AuthError::InvalidInput("Email is required".to_string()));
        }
        if !email.contains('@') {
            return Err(AuthError::InvalidInput("Enter a valid email address".to_string()));
        }
        if self.password.is_empty() {
            return Err(AuthError::InvalidInput("Password is required".to_string()));
        }
        if self.mode == AuthMode::SignUp && self.name.trim().is_empty() {
            return Err(AuthError::InvalidInput("Name is required".to_string()));
        }
        Ok(())
    }

    /// Sign in or sign up. On success the form closes and the user lands on
    /// the project list; on failure the message stays on the form.
    pub async fn submit(&mut self, session: &SessionManager, navigator: &dyn Navigator) -> bool {
        self.error = None;

        let result = match self.validate() {
            Err(e) => Err(e),
            Ok(()) => {
                let email = self.email.trim();
                match self.mode {
                    AuthMode::Login => session.sign_in_with_email(email, &self.password).await,
                    AuthMode::SignUp => session
                        .sign_up(email, &self.password, self.name.trim())
                        .await
                        .map(|_| ()),
                }
            }
        };

        match result {
            Ok(()) => {
                self.open = false;
                navigator.navigate(Route::Projects);
                true
            }
            Err(e) => {
                debug!(mode = ?self.mode, "Auth form error: {}", e);
                self.error = Some(e.to_string());
                false
            }
        }
    }

    /// Start a provider login; the returned URL must be opened by the user
    pub fn continue_with(&mut self, provider: OAuthProvider, session: &SessionManager) -> Option<Url> {
        self.error = None;
        match session.sign_in_with_oauth(provider) {
            Ok(url) => Some(url),
            Err(e) => {
                self.error = Some(e.to_string());
                None
            }
        }
    }
}

/// Print the login status
pub fn whoami(state: &AuthState, api_url: &str) {
    match state.user() {
        Some(user) => {
            println!("\x1b[32m✓ Logged in\x1b[0m");
            if let Some(profile) = state.profile() {
                println!("Name: {}", profile.name);
            }
            if let Some(email) = &user.email {
                println!("Email: {}", email);
            }
            println!("User ID: {}", user.id);
            println!("Server: {}", api_url);
        }
        None => {
            println!("\x1b[33m✗ Not logged in\x1b[0m");
            println!("Run '\x1b[1mwebstudio login\x1b[0m' to authenticate");
        }
    }
}
