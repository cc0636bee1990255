use clap::Parser;
use docker_tar_push::cli::{self, Args};

#[tokio::main]
async fn main() {
    let args = Args::parse();
    if let Err(err) = cli::run(args).await {
        eprintln!("[ERROR] {}", err);
        std::process::exit(1);
    }
}
