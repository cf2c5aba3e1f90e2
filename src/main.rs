use anyhow::Result;
use callinsights::app::{self, AppStateBuilder};
use callinsights::config::{Cli, Config};
use callinsights::version;
use clap::Parser;
use std::fs::File;
use tokio::select;
use tracing::{info, level_filters::LevelFilter, warn};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let config = match cli.conf {
        Some(ref conf) if std::path::Path::new(conf).exists() => Config::load(conf)?,
        _ => Config::default(),
    }
    .with_env_overrides();

    let mut log_fmt = tracing_subscriber::fmt();
    if let Some(ref level) = config.log_level {
        if let Ok(lv) = level.as_str().parse::<LevelFilter>() {
            log_fmt = log_fmt.with_max_level(lv);
        }
    }

    let _guard = if let Some(ref log_file) = config.log_file {
        let file = File::create(log_file)?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file);
        log_fmt.with_writer(non_blocking).try_init().ok();
        Some(guard)
    } else {
        log_fmt.try_init().ok();
        None
    };

    if let Some(ref conf) = cli.conf {
        if !std::path::Path::new(conf).exists() {
            warn!("config file {} not found, using defaults", conf);
        }
    }

    info!("{}", version::get_version_info());
    let state = AppStateBuilder::new().config(config).build().await?;
    info!(
        "Starting callinsights {} on {}",
        version::get_short_version(),
        state.config.http_addr
    );
    let token = state.token.clone();
    select! {
        result = app::run(state) => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received CTRL+C, shutting down");
        }
    }
    token.cancel();
    Ok(())
}
