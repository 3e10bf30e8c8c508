use std::io::{stdin, stdout};

use anyhow::{Context, Result};
use pay_ledger::{bin_utils::Server, config::ServerConfig, logging};

fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let config_path = args
        .next()
        .context("Expected a config file as the first argument")?;
    let user_id = args.next().context("Expected a user id as the second argument")?;
    let password = args.next().context("Expected a password as the third argument")?;

    let config = ServerConfig::load(&config_path)
        .with_context(|| format!("Failed to load `{config_path}`"))?;
    logging::init(&config.log_level);

    let server = Server::open(config)?;
    server
        .login(&user_id, &password)
        .with_context(|| format!("Login refused for `{user_id}`"))?;
    server.serve(&user_id, stdin().lock(), stdout().lock())
}
