//! Serve command - start the gateway server.

use std::path::PathBuf;

use anyhow::Result;
use sonara_gateway::{Gateway, GatewayConfig};

use crate::ui;

/// Serve command arguments.
#[derive(Debug, Clone, Default)]
pub struct ServeArgs {
    /// Port to listen on.
    pub port: Option<u16>,
    /// Bind address.
    pub bind: Option<String>,
    /// Data directory override.
    pub data_dir: Option<PathBuf>,
}

impl ServeArgs {
    /// Apply the overrides to the default gateway config.
    fn into_config(self) -> GatewayConfig {
        let mut config = GatewayConfig::default();
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(bind) = self.bind {
            config.bind_address = bind;
        }
        if let Some(data_dir) = self.data_dir {
            config.data_dir = data_dir;
        }
        config
    }
}

/// Start the gateway and block until it stops.
///
/// # Errors
///
/// Returns error if the gateway cannot be created or fails while serving.
pub async fn run_serve(args: ServeArgs) -> Result<()> {
    let config = args.into_config();

    ui::header("Starting Sonara Gateway");
    ui::kv("Address", &format!("{}:{}", config.bind_address, config.port));
    ui::kv("Data", &config.data_dir.display().to_string());

    let gateway = Gateway::new(config)?;
    gateway.run().await?;

    Ok(())
}
