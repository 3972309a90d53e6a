use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::config;
use crate::data::DemoServer;
use crate::executor::{SharedExecutor, WorkerPool};
use crate::logging;
use crate::store::Store;
use crate::ui;

pub fn run() -> Result<()> {
    let cfg = config::load(config::LoadOptions::default()).context("load config")?;
    let config_path = config::default_path();
    let log_path = logging::init(&cfg.logging).context("init logging")?;
    info!(
        version = crate::VERSION,
        user = %cfg.session.user_id,
        channel = %cfg.session.channel,
        "app: starting"
    );

    let store = Arc::new(Store::new(cfg.session.user_id.clone()));
    let server = Arc::new(DemoServer::new(
        store.clone(),
        cfg.demo.to_demo_options(&cfg.session.user_id),
    ));
    let executor: SharedExecutor = Arc::new(WorkerPool::new(cfg.demo.workers.max(1)));

    let options = ui::Options {
        store,
        server,
        executor,
        config_path: friendly_path(config_path.as_ref()),
        log_path: friendly_path(Some(&log_path)),
        config: cfg,
    };

    let mut model = ui::Model::new(options).context("build ui")?;
    let result = model.run();
    match &result {
        Ok(()) => info!("app: exited"),
        Err(err) => tracing::error!("app: exited with error: {err:#}"),
    }
    result
}

fn friendly_path(path: Option<&PathBuf>) -> String {
    match path {
        Some(path) => display_from_home(path),
        None => "~/.config/teamchat-tui/config.yaml".to_string(),
    }
}

fn display_from_home(path: &Path) -> String {
    if let Some(home) = dirs::home_dir() {
        if let Ok(stripped) = path.strip_prefix(&home) {
            let mut display = String::from("~");
            if !stripped.as_os_str().is_empty() {
                display.push_str(&format!("/{}", stripped.display()));
            }
            return display;
        }
    }
    path.display().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_under_home_are_abbreviated() {
        let Some(home) = dirs::home_dir() else {
            return;
        };
        let path = home.join(".config").join("teamchat-tui").join("config.yaml");
        assert_eq!(
            friendly_path(Some(&path)),
            "~/.config/teamchat-tui/config.yaml"
        );
        assert_eq!(friendly_path(Some(&home)), "~");
    }

    #[test]
    fn other_paths_are_shown_as_is() {
        let path = PathBuf::from("/definitely/not/home/teamchat.log");
        if dirs::home_dir().is_some_and(|home| path.starts_with(home)) {
            return;
        }
        assert_eq!(friendly_path(Some(&path)), "/definitely/not/home/teamchat.log");
    }
}
