//! Implementation of the `wallbounce health` command.

use super::{build_orchestrator, Paths};

#[derive(clap::Args)]
pub struct HealthArgs {
    /// Probe a single provider; all providers when omitted
    #[arg(long)]
    pub id: Option<String>,
}

/// Execute the `wallbounce health` command.
///
/// Exits nonzero when any probed provider is unhealthy.
pub async fn execute(paths: &Paths, args: HealthArgs) -> i32 {
    let orchestrator = match build_orchestrator(paths).await {
        Ok(orchestrator) => orchestrator,
        Err(code) => return code,
    };

    let ids: Vec<String> = match &args.id {
        Some(id) => vec![id.clone()],
        None => orchestrator
            .list_providers()
            .iter()
            .map(|d| d.id.clone())
            .collect(),
    };

    let mut failures = 0;
    for id in &ids {
        match orchestrator.provider_health(id).await {
            Ok(health) if health.ok => {
                println!("{id}: ok ({}ms)", health.latency_ms);
            }
            Ok(health) => {
                failures += 1;
                println!(
                    "{id}: unhealthy ({}ms) {}",
                    health.latency_ms,
                    health.detail.unwrap_or_default()
                );
            }
            Err(e) => {
                failures += 1;
                println!("{id}: {e}");
            }
        }
    }

    i32::from(failures > 0)
}
