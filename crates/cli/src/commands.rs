//! CLI commands

use anyhow::{Context, Result, bail};
use clap::Subcommand;
use gitdm_core::{AuthStatus, LocalStore, Resource, RouteDecision, guard_route};
use gitdm_http::ApiClient;
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::CliConfig;

#[derive(Subcommand)]
pub enum Commands {
    /// Log in and store the session
    Login {
        /// Account email
        #[arg(long)]
        email: String,

        /// Account password
        #[arg(long, env = "GITDM_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// Forget the stored session
    Logout,

    /// Show whether a usable session is stored
    Status,

    /// List a resource
    List {
        /// patients, encounters, labs, meds, refs, ai-summaries or alerts
        resource: Resource,

        /// Filter as key=value; may be repeated
        #[arg(long = "filter", value_parser = parse_filter)]
        filters: Vec<(String, String)>,
    },

    /// Show one object
    Get {
        resource: Resource,
        id: String,
    },

    /// Show the timeline of a patient
    Timeline { patient_id: String },

    /// Stay running until the session is ended elsewhere
    Watch,
}

impl Commands {
    /// Long-running commands are not subject to the global timeout
    pub fn is_long_running(&self) -> bool {
        matches!(self, Commands::Watch)
    }

    pub async fn execute(self, config: CliConfig, data_dir: &Path) -> Result<()> {
        let session_path = config.session_path(data_dir);
        let store = LocalStore::open(&session_path)
            .with_context(|| format!("Failed to open session file {}", session_path.display()))?;
        let client = build_client(&config, store.clone())?;

        match self {
            Commands::Login { email, password } => login(&client, &email, password).await,
            Commands::Logout => {
                client.session().logout();
                println!("Logged out");
                Ok(())
            }
            Commands::Status => status(&client).await,
            Commands::List { resource, filters } => {
                require_session(&client).await?;
                let filters = filter_map(filters);
                let filters = (!filters.is_empty()).then_some(&filters);
                print_json(&client.list(resource, filters).await?)
            }
            Commands::Get { resource, id } => {
                require_session(&client).await?;
                print_json(&client.retrieve(resource, &id).await?)
            }
            Commands::Timeline { patient_id } => {
                require_session(&client).await?;
                print_json(&client.patient_timeline(&patient_id).await?)
            }
            Commands::Watch => watch(&client, &store, &config).await,
        }
    }
}

fn build_client(config: &CliConfig, store: LocalStore) -> Result<ApiClient> {
    let mut builder = ApiClient::builder()
        .base_url(&config.api.base_url)
        .store(Arc::new(store));
    if let Some(timeout) = config.timeout() {
        builder = builder.timeout(timeout);
    }
    Ok(builder.build()?)
}

async fn login(client: &ApiClient, email: &str, password: Option<String>) -> Result<()> {
    let email = email.trim();
    if email.is_empty() {
        bail!("Email must not be empty");
    }
    let Some(password) = password.filter(|p| !p.is_empty()) else {
        bail!("Password required: pass --password or set GITDM_PASSWORD");
    };

    client
        .session()
        .login(email, &password)
        .await
        .context("Login failed")?;
    info!(email, "Session stored");
    println!("Logged in as {email}");
    Ok(())
}

async fn status(client: &ApiClient) -> Result<()> {
    client.session().initialize().await;
    match client.session().status() {
        AuthStatus::Authenticated => println!("Authenticated ({})", client.base_url()),
        AuthStatus::Anonymous | AuthStatus::Loading => println!("Not logged in"),
    }
    Ok(())
}

/// Restore the stored session, or fail like a guarded route would
async fn require_session(client: &ApiClient) -> Result<()> {
    client.session().initialize().await;
    match guard_route(client.session().status(), "/") {
        RouteDecision::Render => Ok(()),
        RouteDecision::RedirectToLogin { .. } | RouteDecision::ShowLoading => {
            bail!("Not logged in: run `gitdm login --email <email>` first")
        }
    }
}

async fn watch(client: &ApiClient, store: &LocalStore, config: &CliConfig) -> Result<()> {
    require_session(client).await?;
    let session = client.session();
    let _sync = session.spawn_storage_sync();
    let mut status = session.subscribe();
    let mut poll = tokio::time::interval(config.poll_interval());

    println!("Watching session at {}", client.base_url());
    loop {
        tokio::select! {
            _ = poll.tick() => {
                match store.reload() {
                    Ok(0) => {}
                    Ok(changed) => debug!(changed, "Session file changed"),
                    Err(e) => warn!(error = %e, "Failed to re-read session file"),
                }
            }
            changed = status.changed() => {
                if changed.is_err() || !status.borrow_and_update().is_authenticated() {
                    println!("Session ended");
                    return Ok(());
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                return Ok(());
            }
        }
    }
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_filter(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got `{raw}`"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty filter name in `{raw}`"));
    }
    Ok((key.to_string(), value.trim().to_string()))
}

fn filter_map(filters: Vec<(String, String)>) -> Map<String, Value> {
    filters
        .into_iter()
        .map(|(key, value)| (key, Value::String(value)))
        .collect()
}
