use log::{error, info};

use dotenv::dotenv;

use company_importer::config::Config;
use company_importer::prelude::Result;
use company_importer::supervisor;

fn main() {
    dotenv().ok();
    env_logger::init();

    if let Err(err) = run() {
        error!("fatal: {}", err);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let config = Config::from_env()?;
    info!("starting workers for {}", config.queues.join(", "));
    supervisor::run(config)
}
