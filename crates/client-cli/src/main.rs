use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use shared::ProfileUpdate;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;
use uuid::Uuid;

mod auth;
mod config;
mod dashboard;
mod error;
mod projects;
mod remote;
mod routes;
mod session;

use auth::{AuthForm, AuthMode};
use dashboard::{Confirm, Dashboard};
use error::AuthError;
use projects::ProjectRepository;
use remote::{OAuthProvider, SupabaseClient};
use routes::{Navigator, Route};
use session::{AuthState, SessionManager};

/// How long to wait for a sign-in to show up as an auth change
const AUTH_SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "webstudio")]
#[command(about = "Web Music Studio client - manage your account and projects")]
#[command(version)]
struct Cli {
    /// Backend API URL (overrides config)
    #[arg(long, global = true)]
    url: Option<String>,

    /// Backend anon key (overrides config)
    #[arg(long, global = true)]
    anon_key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in with email and password
    Login {
        #[arg(long)]
        email: Option<String>,
    },
    /// Start a Google or Facebook login
    LoginOauth { provider: OAuthProvider },
    /// Finish a provider login with the URL the browser was redirected to
    CompleteOauth { redirect_url: String },
    /// Create an account
    Signup {
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        name: Option<String>,
    },
    /// Log out
    Logout,
    /// Show current login status
    Whoami,
    /// Manage your profile
    Profile {
        #[command(subcommand)]
        action: ProfileAction,
    },
    /// Manage your projects
    Projects {
        #[command(subcommand)]
        action: ProjectsAction,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ProfileAction {
    /// Change your display name
    SetName { name: String },
}

#[derive(Subcommand)]
enum ProjectsAction {
    /// List your projects, most recently updated first
    List,
    /// Create a project and open it
    Create { name: Option<String> },
    /// Rename a project
    Rename { id: Uuid, name: String },
    /// Delete a project
    Delete {
        id: Uuid,
        /// Skip the confirmation prompt
        #[arg(long, short)]
        yes: bool,
    },
    /// Open a project in the studio
    Open { id: Uuid },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Set a configuration value
    Set {
        /// Configuration key (url, anon_key, site_url)
        key: String,
        /// Configuration value
        value: String,
    },
    /// Get a configuration value
    Get {
        /// Configuration key
        key: String,
    },
    /// Show all configuration
    Show,
    /// Get the config file path
    Path,
}

/// Prints where the app would go
struct TerminalNavigator;

impl Navigator for TerminalNavigator {
    fn navigate(&self, route: Route) {
        match &route {
            Route::Studio(id) => {
                println!("\x1b[36m→ {}\x1b[0m", route);
                println!("\x1b[90mStudio editor for project {} is coming soon\x1b[0m", id);
            }
            _ => println!("\x1b[36m→ {}\x1b[0m", route),
        }
    }
}

struct StdinConfirm {
    assume_yes: bool,
}

impl Confirm for StdinConfirm {
    fn confirm(&self, prompt: &str) -> bool {
        if self.assume_yes {
            return true;
        }
        match read_line(&format!("{} [y/N] ", prompt)) {
            Ok(answer) => matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"),
            Err(_) => false,
        }
    }
}

fn read_line(prompt: &str) -> Result<String> {
    print!("{}", prompt);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn value_or_prompt(value: Option<String>, prompt: &str) -> Result<String> {
    match value {
        Some(value) => Ok(value),
        None => read_line(prompt),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "webstudio=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let command = match cli.command {
        Commands::Config { action } => return handle_config_command(action),
        command => command,
    };

    // .env is optional
    let _ = dotenvy::dotenv();
    // A file that fails to parse is reported instead of being replaced
    let mut config = config::Config::load()?;
    config.apply_env();
    config.apply_overrides(cli.url, cli.anon_key);
    let (api_url, anon_key) = config.credentials()?;
    let site_url = Url::parse(&config.remote.site_url)?;

    let client = Arc::new(SupabaseClient::new(api_url.clone(), anon_key).with_session(config.session.clone()));
    let manager = SessionManager::start(client.clone(), site_url).await;
    let navigator = TerminalNavigator;

    let result = run(command, &manager, client.clone(), &navigator, &api_url).await;

    // Persist whatever session the client ended up with, even after a failed command
    let mut stored = config::Config::load()?;
    stored.session = client.current_session().await;
    stored.save()?;

    manager.shutdown().await;
    result
}

async fn run(
    command: Commands,
    manager: &Arc<SessionManager>,
    client: Arc<SupabaseClient>,
    navigator: &TerminalNavigator,
    api_url: &str,
) -> Result<()> {
    match command {
        Commands::Login { email } => {
            let mut form = AuthForm::new(AuthMode::Login);
            form.email = value_or_prompt(email, "Email: ")?;
            form.password = read_line("Password: ")?;
            submit(&mut form, manager, navigator).await?;
            wait_for_sign_in(manager).await?;
            println!("\x1b[1;32m✅ Login successful!\x1b[0m");
        }
        Commands::Signup { email, name } => {
            let mut form = AuthForm::new(AuthMode::SignUp);
            form.email = value_or_prompt(email, "Email: ")?;
            form.name = value_or_prompt(name, "Name: ")?;
            form.password = read_line("Password: ")?;
            submit(&mut form, manager, navigator).await?;
            println!("\x1b[1;32m✅ Account created!\x1b[0m");
            // Accounts that need email confirmation come back without a session
            if client.current_session().await.is_some() {
                wait_for_sign_in(manager).await?;
            } else {
                println!("Confirm your email address, then run '\x1b[1mwebstudio login\x1b[0m'");
            }
        }
        Commands::LoginOauth { provider } => {
            let mut form = AuthForm::new(AuthMode::Login);
            let Some(url) = form.continue_with(provider, manager) else {
                bail!("{}", form.error().unwrap_or("OAuth sign-in failed"));
            };
            println!();
            println!("\x1b[1;36m🔐 To login, open this URL in your browser:\x1b[0m");
            println!();
            println!("   \x1b[4m{}\x1b[0m", url);
            println!();
            println!("\x1b[90mThen run 'webstudio complete-oauth <url>' with the URL you were redirected to\x1b[0m");
        }
        Commands::CompleteOauth { redirect_url } => {
            let landing = Route::parse(Url::parse(&redirect_url)?.path());
            manager.complete_oauth(&redirect_url).await?;
            wait_for_sign_in(manager).await?;
            println!("\x1b[1;32m✅ Login successful!\x1b[0m");
            navigator.navigate(routes::guard(landing, &manager.current()));
        }
        Commands::Logout => {
            manager.sign_out().await?;
            println!("\x1b[32m✅ Logged out successfully\x1b[0m");
        }
        Commands::Whoami => {
            auth::whoami(&manager.current(), api_url);
        }
        Commands::Profile {
            action: ProfileAction::SetName { name },
        } => {
            let profile = manager
                .update_profile(ProfileUpdate {
                    name: Some(name),
                    avatar_url: None,
                })
                .await?;
            println!("Name set to {}", profile.name);
        }
        Commands::Projects { action } => {
            handle_projects_command(action, manager, client).await?;
        }
        Commands::Config { action } => handle_config_command(action)?,
    }
    Ok(())
}

async fn submit(form: &mut AuthForm, manager: &SessionManager, navigator: &TerminalNavigator) -> Result<()> {
    if !form.submit(manager, navigator).await {
        bail!("{}", form.error().unwrap_or("Authentication failed"));
    }
    Ok(())
}

/// Wait until the sign-in event has been applied
async fn wait_for_sign_in(manager: &SessionManager) -> Result<()> {
    match tokio::time::timeout(AUTH_SETTLE_TIMEOUT, manager.wait_for(AuthState::is_authenticated)).await {
        Ok(_) => Ok(()),
        Err(_) => bail!(AuthError::NotAuthenticated),
    }
}

async fn handle_projects_command(
    action: ProjectsAction,
    manager: &Arc<SessionManager>,
    client: Arc<SupabaseClient>,
) -> Result<()> {
    let repo = Arc::new(ProjectRepository::new(client, manager.changes()));
    let dashboard = Dashboard::new(repo.clone(), manager.changes(), Arc::new(TerminalNavigator));

    if !manager.current().is_authenticated() {
        // Login prompt only; no project calls for anonymous users
        println!("\x1b[33m{}\x1b[0m", dashboard.view().await);
        println!("Run '\x1b[1mwebstudio login\x1b[0m' to authenticate");
        return Ok(());
    }

    // Later sign-ins and sign-outs reload or clear the list
    let watcher = repo.watch_identity();
    dashboard.load().await;

    let result = run_projects_action(action, &dashboard).await;
    watcher.abort();
    result
}

async fn run_projects_action(action: ProjectsAction, dashboard: &Dashboard) -> Result<()> {
    match action {
        ProjectsAction::List => println!("{}", dashboard.view().await),
        ProjectsAction::Create { name } => {
            let project = dashboard.create(name.as_deref()).await?;
            println!("Created \"{}\" ({})", project.name, project.id);
        }
        ProjectsAction::Rename { id, name } => {
            if !dashboard.begin_rename(id).await {
                bail!("Project {} not found", id);
            }
            dashboard.edit_draft(&name).await;
            match dashboard.commit_rename().await? {
                Some(project) => println!("Renamed to \"{}\"", project.name),
                None => println!("Name unchanged"),
            }
        }
        ProjectsAction::Delete { id, yes } => {
            if dashboard.delete(id, &StdinConfirm { assume_yes: yes }).await? {
                println!("Deleted {}", id);
            } else {
                println!("Cancelled");
            }
        }
        ProjectsAction::Open { id } => dashboard.open(id),
    }
    Ok(())
}

fn handle_config_command(action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Set { key, value } => {
            let mut config = config::Config::load()?;
            config.set(&key, value)?;
            config.save()?;
            println!("Configuration saved");
        }
        ConfigAction::Get { key } => {
            let config = config::Config::load()?;
            println!("{}", config.get(&key)?);
        }
        ConfigAction::Show => {
            let config = config::Config::load()?;
            println!("{}", config.show());
        }
        ConfigAction::Path => {
            let path = config::Config::config_path()?;
            println!("{}", path.display());
        }
    }
    Ok(())
}
