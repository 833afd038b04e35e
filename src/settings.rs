use std::path::{Path, PathBuf};
use std::time::Duration;

use printd_lib::{Config, PrintdError};

use crate::cli::ServeArgs;

/// Loads the config file (explicit path, then the central one) and applies
/// `PRINTD_*` environment overrides. Validation happens after CLI overrides.
pub fn load_config(path: Option<&Path>) -> Result<(Config, Option<PathBuf>), PrintdError> {
    let (mut config, source) = Config::load(path)?;
    config.apply_env()?;
    Ok((config, source))
}

/// `--verbose` raises the default level; `RUST_LOG` still wins inside the filter.
pub fn apply_verbosity(config: &mut Config, verbose: bool) {
    if verbose {
        config.logging.level = "debug".to_string();
    }
}

/// Merge serve flags into the config, preferring flags that were given.
pub fn apply_serve_overrides(config: &mut Config, args: &ServeArgs) {
    if let Some(host) = &args.host {
        config.server.host = host.clone();
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(min) = args.pool_min {
        config.pool.min = min;
    }
    if let Some(max) = args.pool_max {
        config.pool.max = max;
    }
    if let Some(ms) = args.acquire_timeout_ms {
        config.pool.acquire_timeout = Duration::from_millis(ms);
    }
    if let Some(waiting) = args.max_waiting_clients {
        config.pool.max_waiting_clients = waiting;
    }
    if let Some(path) = &args.browser_path {
        config.pool.browser_path = Some(path.clone());
    }
}

/// One-shot commands run a single renderer, created on first use.
pub fn one_shot(config: &mut Config) {
    config.pool.min = 0;
    config.pool.max = 1;
    config.pool.eager = false;
}
