use crate::cli::Args;
use crate::config::Config;
use crate::function::LambdaFunctions;
use crate::pipeline::{Outcome, Pipeline, Services};
use crate::stack::CloudFormationStack;
use crate::upload::S3Storage;
use async_trait::async_trait;
use eyre::WrapErr;
use std::sync::Arc;

/// Creates the clients of external services for a validated config
#[async_trait]
pub trait Connect: Send + Sync {
    async fn connect(&self, config: &Config) -> eyre::Result<Services>;
}

/// Real AWS clients, credentials come from the profile in the config
pub struct AwsConnector;

#[async_trait]
impl Connect for AwsConnector {
    async fn connect(&self, config: &Config) -> eyre::Result<Services> {
        let sdk_config = config.sdk_config().await;

        log::debug!(
            "Using profile {} in region {:?}",
            config.profile,
            sdk_config.region()
        );

        Ok(Services {
            storage: Arc::new(S3Storage::new(&sdk_config)),
            stack: Arc::new(CloudFormationStack::new(&sdk_config)),
            functions: Arc::new(LambdaFunctions::new(&sdk_config)),
        })
    }
}

/// How the command ended
#[derive(Debug, PartialEq, Eq)]
pub enum Exit {
    /// Required options are missing, the caller shows the help
    Usage,

    Finished(Outcome),
}

/// Validate the args and run the whole pipeline
///
/// Nothing is connected or touched on disk until the config is valid.
pub async fn run(args: &Args, connector: &dyn Connect) -> eyre::Result<Exit> {
    let Some(config) = Config::from_args(args) else {
        log::debug!("Required options are missing: {args:?}");
        return Ok(Exit::Usage);
    };

    let services = connector
        .connect(&config)
        .await
        .wrap_err("Failed to set up AWS clients")?;

    let outcome = Pipeline::builder()
        .set_config(config)
        .set_services(services)
        .build()
        .wrap_err("Failed to build pipeline")?
        .run()
        .await?;

    Ok(Exit::Finished(outcome))
}
