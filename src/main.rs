use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;
use tracing_subscriber::{filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use resona::{
    AuthConfig, AuthResult, AuthSessionController, ConsentOutcome, JsonFileStore, ProfileClient,
    ReqwestHttpClient, SessionState, UserConsent,
};

/// File holding the persisted credential triple
const CREDENTIALS_FILE: &str = "resona.secure.json";

/// Consent collaborator for the terminal shell.
///
/// Relays the authorize URL for the user to open and reads the redirect back
/// from stdin; the consent screen itself lives in the user's browser.
struct TerminalConsent;

#[async_trait]
impl UserConsent for TerminalConsent {
    async fn request_consent(&self, authorize_url: &str) -> AuthResult<ConsentOutcome> {
        println!("Open this URL to authorize Resona:\n\n  {authorize_url}\n");
        print!("Paste the redirect URL (empty line to cancel): ");

        let line = tokio::task::spawn_blocking(|| {
            io::stdout().flush().ok();
            let mut line = String::new();
            io::stdin().read_line(&mut line).map(|_| line)
        })
        .await
        .map_err(|err| resona::AuthError::internal(format!("stdin task failed: {err}")))?
        .map_err(|err| resona::AuthError::internal(format!("stdin read failed: {err}")))?;

        let line = line.trim();
        if line.is_empty() {
            return Ok(ConsentOutcome::Cancelled);
        }
        match extract_code(line) {
            Some(code) => Ok(ConsentOutcome::Authorized { code }),
            None => Ok(ConsentOutcome::Cancelled),
        }
    }
}

/// Accepts either the full redirect URL or a bare authorization code
fn extract_code(input: &str) -> Option<String> {
    match reqwest::Url::parse(input) {
        Ok(url) => url
            .query_pairs()
            .find(|(key, _)| key == "code")
            .map(|(_, value)| value.into_owned()),
        Err(_) => Some(input.to_string()),
    }
}

fn credentials_path() -> PathBuf {
    match std::env::var("RESONA_CREDENTIALS") {
        Ok(path) if !path.is_empty() => PathBuf::from(path),
        _ => PathBuf::from(CREDENTIALS_FILE),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(version = resona::VERSION, "starting resona shell");

    let config = AuthConfig::from_env()?;
    let backend = Arc::new(JsonFileStore::new(credentials_path()));
    let http = Arc::new(ReqwestHttpClient::new());
    let controller = AuthSessionController::new(&config, backend, http.clone());

    let state = controller.check_validity().await.unwrap_or_else(|err| {
        info!(error = %err, "validity check did not settle; continuing to login");
        SessionState::Unknown
    });

    if !state.is_authenticated() {
        info!("no valid session; starting interactive authorization");
        if !controller.authenticate(&TerminalConsent).await? {
            println!("Authorization cancelled.");
            return Ok(());
        }
    }

    let token = controller.usable_token().await?;
    let profile = ProfileClient::new(&config, http)
        .current_profile(&token)
        .await?;

    let name = profile
        .display_name
        .unwrap_or_else(|| profile.id.clone());
    match profile.email {
        Some(email) => println!("Signed in as {name} ({email})"),
        None => println!("Signed in as {name}"),
    }
    Ok(())
}
