//! Command-line argument parsing and bootstrap

use crate::error::Result;
use crate::logging::{ConsoleLogger, LogLevel};
use crate::pusher::ImagePusher;
use clap::Parser;
use std::sync::Arc;

#[derive(Debug, Parser)]
#[command(name = "docker-tar-push")]
#[command(about = "Push your docker tar archive image without docker")]
#[command(version)]
pub struct Args {
    /// Path to the image archive, or a directory of archives
    pub archive: String,

    /// Registry url
    #[arg(long = "registry", short = 'r')]
    pub registry: String,

    /// Registry auth username
    #[arg(long = "username", short = 'u', default_value = "")]
    pub username: String,

    /// Registry auth password
    #[arg(long = "password", short = 'p', default_value = "")]
    pub password: String,

    /// Add image repo prefix
    #[arg(long = "image-prefix", default_value = "")]
    pub image_prefix: String,

    /// Skip TLS certificate verification
    #[arg(long = "skip-tls-verify", short = 'k')]
    pub skip_tls_verify: bool,

    /// Log level, 0-1: errors, 2-3: info, 4: debug
    #[arg(long = "log-level", default_value_t = 3)]
    pub log_level: u8,
}

/// Build the engine from parsed arguments and run the push to completion.
pub async fn run(args: Args) -> Result<()> {
    let logger = Arc::new(ConsoleLogger::new(LogLevel::from_cli(args.log_level)));

    ImagePusher::new(
        args.archive.as_str(),
        &args.registry,
        &args.image_prefix,
        &args.username,
        &args.password,
        args.skip_tls_verify,
    )
    .with_logger(logger)
    .push()
    .await
}
