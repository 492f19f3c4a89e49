pub mod checksum;
pub mod cli;
pub mod config;
pub mod deploy;
pub mod error;
pub mod ignore;
pub mod remote;
pub mod sync;

pub use error::{DeployError, Result};

use cli::Cli;
use config::FileConfig;
use deploy::{DeployReport, Deployment, open_session, step};

/// Library entrypoint: resolve configuration, connect, deploy.
pub fn run(cli: &Cli) -> Result<DeployReport> {
    let file = FileConfig::load(cli.config.as_deref())?;
    let config = cli.resolve(file)?;

    let deployment = Deployment::new(&config)?.with_progress(!cli.no_progress);
    deployment.print_plan();

    let mut session = open_session(&config.session)?;
    let report = deployment.run(session.as_mut())?;

    step("Done.");
    Ok(report)
}
