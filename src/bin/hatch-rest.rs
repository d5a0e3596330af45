use clap::Parser;
use log::info;
use hatch_rest::init_logging;
use hatch_rest::cli::{finish, run, Args};
use hatch_rest::error::AppRunError;

#[tokio::main]
async fn main() -> Result<(), AppRunError> {
    let args = Args::parse();
    init_logging(args.log_level());
    info!(concat!("hatch-rest ", env!("CARGO_PKG_VERSION")));

    finish(run(args).await)
}
