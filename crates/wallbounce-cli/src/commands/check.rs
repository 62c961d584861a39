//! Implementation of the `wallbounce check` command.
//!
//! Validates the configuration, shows masked credential status, then
//! constructs every adapter and probes provider health: a preflight
//! for new installations.

use wallbounce_core::provider::SecretStore;
use wallbounce_core::safety::mask_secret;

use super::{build_orchestrator, load_config, load_secrets, Paths, EXIT_CONFIG};

#[derive(clap::Args)]
pub struct CheckArgs {
    /// Skip health probes (configuration check only)
    #[arg(long)]
    pub no_health: bool,
}

/// Execute the `wallbounce check` command.
pub async fn execute(paths: &Paths, args: CheckArgs) -> i32 {
    let config = match load_config(paths) {
        Ok(config) => config,
        Err(code) => return code,
    };
    eprintln!(
        "config ok: {} providers, storage backend '{}'",
        config.providers.len(),
        config.storage.backend
    );

    // Credential status for SDK providers, masked for display.
    let secrets = load_secrets(paths);
    for provider in &config.providers {
        let Some(secret_name) = &provider.api_key_secret else {
            continue;
        };
        match secrets.get(secret_name) {
            Some(value) => eprintln!(
                "  {}: api key {} ({secret_name})",
                provider.id,
                mask_secret(&value)
            ),
            None => eprintln!("  {}: api key missing ({secret_name})", provider.id),
        }
    }

    let orchestrator = match build_orchestrator(paths).await {
        Ok(orchestrator) => orchestrator,
        Err(code) => return code,
    };
    eprintln!("adapters constructed");

    if args.no_health {
        return 0;
    }

    let mut failures = 0;
    for descriptor in orchestrator.list_providers() {
        match orchestrator.provider_health(&descriptor.id).await {
            Ok(health) if health.ok => {
                eprintln!("  {}: ok ({}ms)", descriptor.id, health.latency_ms);
            }
            Ok(health) => {
                failures += 1;
                eprintln!(
                    "  {}: unhealthy {}",
                    descriptor.id,
                    health.detail.unwrap_or_default()
                );
            }
            Err(e) => {
                failures += 1;
                eprintln!("  {}: {e}", descriptor.id);
            }
        }
    }

    if failures > 0 {
        eprintln!("{failures} provider(s) unhealthy");
        EXIT_CONFIG
    } else {
        eprintln!("all providers healthy");
        0
    }
}
