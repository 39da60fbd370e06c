use async_trait::async_trait;
use aws_config::SdkConfig;
use eyre::WrapErr;

/// Deployment service that points a function to new code
#[async_trait]
pub trait FunctionCode: Send + Sync {
    /// Redeploy the function from the zip stored at bucket/key
    async fn update_code(&self, function_name: &str, bucket: &str, key: &str) -> eyre::Result<()>;
}

/// Updates AWS Lambda functions
pub struct LambdaFunctions {
    client: aws_sdk_lambda::Client,
}

impl LambdaFunctions {
    pub fn new(config: &SdkConfig) -> Self {
        Self {
            client: aws_sdk_lambda::Client::new(config),
        }
    }
}

#[async_trait]
impl FunctionCode for LambdaFunctions {
    async fn update_code(&self, function_name: &str, bucket: &str, key: &str) -> eyre::Result<()> {
        let response = self
            .client
            .update_function_code()
            .function_name(function_name)
            .s3_bucket(bucket)
            .s3_key(key)
            .send()
            .await
            .wrap_err("UpdateFunctionCode request failed")?;

        log::info!(
            "Updated {function_name}: code sha256 {}, revision {}, last modified {}",
            response.code_sha256().unwrap_or("-"),
            response.revision_id().unwrap_or("-"),
            response.last_modified().unwrap_or("-"),
        );

        Ok(())
    }
}
