//! Status command - report bootstrap state.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use sonara_gateway::auth::{BootstrapController, SetupStatus, SledStore};

use crate::ui::{self, HealthStatus};

/// Status command arguments.
#[derive(Debug, Clone, Default)]
pub struct StatusArgs {
    /// Data directory override.
    pub data_dir: Option<PathBuf>,
    /// Base URL of a running gateway to query.
    pub probe: Option<String>,
}

/// Run the status command.
///
/// # Errors
///
/// Returns error if the store cannot be opened or counted.
pub async fn run_status(args: StatusArgs) -> Result<()> {
    ui::header("Sonara Status");

    if let Some(base_url) = &args.probe {
        match probe_gateway(base_url).await {
            Ok(status) => report("Gateway", &status),
            Err(e) => ui::health_check("Gateway", HealthStatus::Error, Some(&e)),
        }
        return Ok(());
    }

    let data_dir = args.data_dir.unwrap_or_else(sonara_gateway::default_data_dir);
    if !data_dir.join("auth").exists() {
        ui::health_check("User store", HealthStatus::Warning, Some("not created yet"));
        ui::info("Run 'sonara serve' to initialize the store");
        return Ok(());
    }

    // sled takes an exclusive lock, so this fails while a gateway is running
    tracing::debug!(path = %data_dir.display(), "Opening user store");
    let store = SledStore::open(&data_dir).context("Failed to open user store")?;
    let status = BootstrapController::status(&store)
        .await
        .context("Failed to count users")?;

    report("User store", &status);
    Ok(())
}

fn report(name: &str, status: &SetupStatus) {
    if status.first_time {
        ui::health_check(name, HealthStatus::Warning, Some("no users created"));
        ui::info("Create the first admin with POST /auth/createAdmin");
    } else {
        ui::health_check(
            name,
            HealthStatus::Ok,
            Some(&format!("{} user(s)", status.user_count)),
        );
    }
}

/// Query `/auth/status` of a running gateway.
async fn probe_gateway(base_url: &str) -> Result<SetupStatus, String> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()
        .map_err(|e| e.to_string())?;

    let resp = client
        .get(format!("{}/auth/status", base_url.trim_end_matches('/')))
        .send()
        .await
        .map_err(|e| e.to_string())?;

    if !resp.status().is_success() {
        return Err(format!("HTTP {}", resp.status()));
    }

    resp.json::<SetupStatus>().await.map_err(|e| e.to_string())
}
