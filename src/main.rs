use anyhow::Result;
use callrouter::{
    app::{self, AppStateBuilder},
    config::{Cli, Config},
};
use clap::Parser;
use std::{fs::File, path::Path};
use tokio::select;
use tracing::{info, level_filters::LevelFilter, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, missing_conf) = match cli.conf {
        Some(conf) if Path::new(&conf).exists() => (Config::load(&conf)?, None),
        other => (Config::default(), other),
    };
    let config = config.with_env_overrides();

    let mut log_fmt = tracing_subscriber::fmt();
    if let Some(ref level) = config.log_level {
        if let Ok(lv) = level.as_str().parse::<LevelFilter>() {
            log_fmt = log_fmt.with_max_level(lv);
        }
    }

    let _guard = if let Some(ref log_file) = config.log_file {
        let file = File::create(log_file)
            .map_err(|e| anyhow::anyhow!("failed to create log file {}: {}", log_file, e))?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file);
        log_fmt.with_ansi(false).with_writer(non_blocking).try_init().ok();
        Some(guard)
    } else {
        log_fmt.try_init().ok();
        None
    };

    if let Some(conf) = missing_conf {
        warn!("config file {} not found, using defaults", conf);
    }

    let state = AppStateBuilder::new().config(config).build().await?;
    info!(
        "Starting callrouter on {} (max attempts {})",
        state.config.http_addr, state.config.routing.max_attempts
    );

    let token = state.token.clone();
    select! {
        result = app::run(state) => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received CTRL+C, shutting down");
            token.cancel();
        }
    }
    Ok(())
}
