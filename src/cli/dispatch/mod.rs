use crate::cli::actions::Action;
use anyhow::{Context, Result};

pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    Ok(Action::Server {
        port: matches.get_one::<u16>("port").copied().unwrap_or(8080),
        dsn: matches.get_one("dsn").map(|s: &String| s.to_string()),
        frontend_url: matches
            .get_one("frontend-url")
            .map(|s: &String| s.to_string())
            .context("missing default for --frontend-url")?,
    })
}
