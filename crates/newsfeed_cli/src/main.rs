//! CLI smoke entry point.
//!
//! # Responsibility
//! - Resolve `NEWSFEED_*` settings and open the configured backend.
//! - Print a deterministic one-line-per-fact summary of the store.

use log::error;
use newsfeed_core::{init_logging, open_repository, BackendKind, StoreConfig};
use std::process::ExitCode;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            error!("event=cli_exit module=cli status=error error={message}");
            eprintln!("newsfeed: {message}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), String> {
    let config = StoreConfig::from_env().map_err(|err| err.to_string())?;
    if let Some(log_dir) = &config.log_dir {
        init_logging(&config.log_level, log_dir).map_err(|err| err.to_string())?;
    }

    let repo = open_repository(&config).map_err(|err| err.to_string())?;
    let articles = repo.get_number_of_articles().map_err(|err| err.to_string())?;
    let latest = repo
        .get_last_article()
        .map_err(|err| err.to_string())?
        .map(|article| article.date.to_string())
        .unwrap_or_else(|| "-".to_string());

    println!("newsfeed_core ping={}", newsfeed_core::ping());
    println!("newsfeed_core version={}", newsfeed_core::core_version());
    println!("backend={}", config.backend);
    if config.backend == BackendKind::Sqlite {
        println!("db_path={}", config.db_path.display());
    }
    println!("articles={articles}");
    println!("last_article_date={latest}");
    Ok(())
}
