use crate::config::FUNCTION_RESOURCE_TYPE;
use async_trait::async_trait;
use aws_config::SdkConfig;
use eyre::WrapErr;

/// A resource provisioned by a stack
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StackResource {
    pub logical_id: String,

    // Missing while the resource is being created
    pub physical_id: Option<String>,

    pub resource_type: String,
}

impl StackResource {
    pub fn is_function(&self) -> bool {
        self.resource_type == FUNCTION_RESOURCE_TYPE
    }
}

/// Source of stack resource descriptions
#[async_trait]
pub trait StackResources: Send + Sync {
    /// All resources of the stack, in the order returned by the service
    ///
    /// Fails if the stack does not exist.
    async fn resources(&self, stack_name: &str) -> eyre::Result<Vec<StackResource>>;
}

/// Physical id of the function with the given logical name
///
/// None means there is no such function in the stack, which is not an error.
pub fn find_function(resources: &[StackResource], logical_name: &str) -> Option<String> {
    resources
        .iter()
        .find(|r| r.is_function() && r.logical_id == logical_name)
        .and_then(|r| r.physical_id.clone())
}

/// Physical ids of all functions in the stack, order is preserved
pub fn all_functions(resources: &[StackResource]) -> Vec<String> {
    resources
        .iter()
        .filter(|r| r.is_function())
        .filter_map(|r| r.physical_id.clone())
        .collect()
}

/// Reads stack resources from CloudFormation
pub struct CloudFormationStack {
    client: aws_sdk_cloudformation::Client,
}

impl CloudFormationStack {
    pub fn new(config: &SdkConfig) -> Self {
        Self {
            client: aws_sdk_cloudformation::Client::new(config),
        }
    }
}

#[async_trait]
impl StackResources for CloudFormationStack {
    async fn resources(&self, stack_name: &str) -> eyre::Result<Vec<StackResource>> {
        let mut resources = Vec::new();
        let mut next_token = None;

        loop {
            let response = self
                .client
                .list_stack_resources()
                .stack_name(stack_name)
                .set_next_token(next_token)
                .send()
                .await
                .wrap_err(format!("Failed to describe resources of stack \"{stack_name}\""))?;

            for summary in response.stack_resource_summaries() {
                resources.push(StackResource {
                    logical_id: summary.logical_resource_id().unwrap_or_default().to_string(),
                    physical_id: summary.physical_resource_id().map(String::from),
                    resource_type: summary.resource_type().unwrap_or_default().to_string(),
                });
            }

            next_token = response.next_token().map(String::from);

            if next_token.is_none() {
                break;
            }
        }

        log::debug!("Stack {stack_name} has {} resources", resources.len());
        Ok(resources)
    }
}
