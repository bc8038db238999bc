//! Client configuration for the command-line tool.
//!
//! Options come from a TOML file (see [`ClientOptions`] for the keys);
//! every key is optional. Without a file the defaults apply.

use std::path::Path;

use anyhow::Context;
use tidewire_realtime::ClientOptions;

/// Loads options from `path` if given, then applies the endpoint override.
pub fn load(path: Option<&Path>, endpoint: Option<&str>) -> anyhow::Result<ClientOptions> {
    let mut options = match path {
        Some(path) => ClientOptions::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => ClientOptions::default(),
    };
    if let Some(endpoint) = endpoint {
        options.endpoint = endpoint.to_string();
    }
    // The tool connects explicitly so it can report the outcome.
    options.auto_connect = false;
    Ok(options)
}
