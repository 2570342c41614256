//! Config hot-reload via filesystem watcher.
//!
//! Re-parses the config file on change and merges the filter and playback
//! sections into the live [`SettingsStore`].

use std::path::PathBuf;

use notify::{EventKind, RecursiveMode, Watcher};
use tracing::{debug, error, info};

use chatvoz_core::config::Config;
use chatvoz_core::settings::SettingsStore;

/// Watches the config file for the lifetime of the value.
pub struct ConfigWatcher {
    _watcher: notify::RecommendedWatcher,
}

impl ConfigWatcher {
    pub fn start(config_path: PathBuf, settings: SettingsStore) -> anyhow::Result<Self> {
        let path = config_path.clone();
        let mut watcher =
            notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| {
                let event = match res {
                    Ok(event) => event,
                    Err(e) => {
                        error!(%e, "Config file watch error");
                        return;
                    }
                };
                if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_))
                    || !event.paths.iter().any(|p| p.file_name() == path.file_name())
                {
                    return;
                }

                debug!("Config file changed, reloading");
                match Config::load(&path) {
                    Ok(new_config) => {
                        // The watcher thread is outside the runtime, so blocking is fine here.
                        settings.blocking_apply_config(&new_config);
                        info!("Config reloaded");
                    }
                    Err(e) => error!(%e, "Failed to reload config, keeping current settings"),
                }
            })?;

        // Watch the parent directory to catch editors that replace the file.
        let watch_path = config_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        watcher.watch(&watch_path, RecursiveMode::NonRecursive)?;
        info!(path = %config_path.display(), "Config file watcher started");

        Ok(Self { _watcher: watcher })
    }
}
