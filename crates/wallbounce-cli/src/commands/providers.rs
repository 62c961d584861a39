//! Implementation of the `wallbounce providers` command.

use super::{build_orchestrator, Paths};

#[derive(clap::Args)]
pub struct ProvidersArgs {
    /// Emit JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

/// Execute the `wallbounce providers` command.
pub async fn execute(paths: &Paths, args: ProvidersArgs) -> i32 {
    let orchestrator = match build_orchestrator(paths).await {
        Ok(orchestrator) => orchestrator,
        Err(code) => return code,
    };

    let descriptors = orchestrator.list_providers();

    if args.json {
        match serde_json::to_string_pretty(&descriptors) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("error: {e}");
                return 1;
            }
        }
        return 0;
    }

    println!("{:<20} {:<16} {:<5} {:<16} capabilities", "id", "vendor", "tier", "kind");
    for descriptor in &descriptors {
        let capabilities: Vec<&str> = descriptor
            .capabilities
            .iter()
            .map(|c| c.as_str())
            .collect();
        println!(
            "{:<20} {:<16} {:<5} {:<16} {}",
            descriptor.id,
            descriptor.vendor,
            descriptor.tier,
            descriptor.kind.as_str(),
            capabilities.join(",")
        );
    }
    0
}
