//! Subcommand implementations and shared helpers.

pub mod analyze;
pub mod check;
pub mod health;
pub mod providers;
pub mod sessions;

pub use analyze::AnalyzeArgs;
pub use check::CheckArgs;
pub use health::HealthArgs;
pub use providers::ProvidersArgs;
pub use sessions::SessionsArgs;

use std::collections::HashMap;
use std::sync::Arc;

use wallbounce_core::config::Config;
use wallbounce_core::error::AnalysisError;
use wallbounce_core::orchestrator::Orchestrator;
use wallbounce_core::provider::StaticSecretStore;

/// Exit code for configuration or usage errors.
pub const EXIT_CONFIG: i32 = 5;

/// Resolved file paths from global CLI flags.
pub struct Paths {
    pub config: String,
    pub secrets: String,
}

/// Expand `~` at the start of a path to the user's home directory.
pub fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest).to_string_lossy().to_string();
        }
    } else if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home.to_string_lossy().to_string();
        }
    }
    path.to_string()
}

/// Load and validate the configuration.
pub fn load_config(paths: &Paths) -> Result<Config, i32> {
    let config = match Config::load(&paths.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            return Err(EXIT_CONFIG);
        }
    };
    if let Err(errors) = config.validate() {
        for error in &errors {
            eprintln!("config error: {error}");
        }
        return Err(EXIT_CONFIG);
    }
    Ok(config)
}

/// Load the secrets file into a static secret store.
///
/// The file is a flat TOML table of `name = "value"` pairs. A missing
/// file yields an empty store; providers that need a credential will
/// fail construction with a clear message.
pub fn load_secrets(paths: &Paths) -> StaticSecretStore {
    let Ok(contents) = std::fs::read_to_string(&paths.secrets) else {
        return StaticSecretStore::default();
    };
    match toml::from_str::<HashMap<String, String>>(&contents) {
        Ok(map) => StaticSecretStore::new(map),
        Err(e) => {
            tracing::warn!(path = %paths.secrets, error = %e, "Failed to parse secrets file");
            StaticSecretStore::default()
        }
    }
}

/// Build the orchestrator from configuration, mapping failures to the
/// configuration exit code.
pub async fn build_orchestrator(paths: &Paths) -> Result<Arc<Orchestrator>, i32> {
    let config = load_config(paths)?;
    let secrets = load_secrets(paths);
    match Orchestrator::from_config(&config, &secrets).await {
        Ok(orchestrator) => Ok(Arc::new(orchestrator)),
        Err(e) => {
            eprintln!("error: {e}");
            Err(EXIT_CONFIG)
        }
    }
}

/// Map an analysis failure to the documented exit code.
pub fn exit_code_for(err: &AnalysisError) -> i32 {
    match err {
        AnalysisError::InvalidInput { .. } => EXIT_CONFIG,
        AnalysisError::InsufficientProviders { failures, .. } => {
            if err.all_timeouts() {
                2
            } else if failures.iter().any(|f| f.reason_code == "approval_denied") {
                3
            } else {
                1
            }
        }
        AnalysisError::ApprovalDenied { .. } => 3,
        AnalysisError::Canceled => 4,
        AnalysisError::Internal { .. } => 1,
    }
}
