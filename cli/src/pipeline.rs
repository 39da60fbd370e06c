use crate::archive::{create_archive, ArchiveSource};
use crate::config::{Config, Target, Update, PROGRESS_THROTTLE};
use crate::function::FunctionCode;
use crate::progress::{Progress, ProgressStatus, Throttled};
use crate::stack::{all_functions, find_function, StackResources};
use crate::upload::{ObjectStorage, Uploader};
use eyre::{eyre, OptionExt, Report, WrapErr};
use futures::future;
use std::sync::Arc;
use std::time::Instant;

/// External services a run talks to
#[derive(Clone)]
pub struct Services {
    pub storage: Arc<dyn ObjectStorage>,
    pub stack: Arc<dyn StackResources>,
    pub functions: Arc<dyn FunctionCode>,
}

/// How a successful run ended
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The code is uploaded, functions are left untouched
    Uploaded,

    /// The code is uploaded and these functions are updated
    Updated(Vec<String>),

    /// The code is uploaded but there is no such function to update
    NotFound { resource_name: String, stack_name: String },
}

pub struct Pipeline {
    config: Config,
    services: Services,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    /// Archive, upload, then update the functions unless the run is upload-only
    pub async fn run(self) -> eyre::Result<Outcome> {
        let start_time = Instant::now();

        self.archive().await?;
        self.upload().await?;

        let outcome = match &self.config.update {
            Update::Skip => {
                println!(
                    "{} the update due to --upload-only flag",
                    console::style("    Skipping").yellow().bold(),
                );

                Outcome::Uploaded
            }

            Update::Stack { stack_name, target } => self.update(stack_name, target).await?,
        };

        println!(
            "{} in {:.2}s",
            console::style("    Finished").green().bold(),
            start_time.elapsed().as_secs_f64(),
        );

        Ok(outcome)
    }

    async fn archive(&self) -> eyre::Result<()> {
        let path = self.config.archive_path();
        let progress = Arc::new(Throttled::new(
            Progress::new("Archiving", &self.config.key),
            PROGRESS_THROTTLE,
        ));

        progress.inner().log_stage();

        let sources = vec![ArchiveSource::new(&self.config.source_dir, "")];

        create_archive(sources, path, progress.clone())
            .await
            .inspect_err(|_| progress.inner().error())?;

        progress.inner().finish(ProgressStatus::Success, None);
        Ok(())
    }

    async fn upload(&self) -> eyre::Result<()> {
        let Config { bucket, key, .. } = &self.config;
        let progress = Throttled::new(Progress::new("Uploading", key), PROGRESS_THROTTLE);
        progress.inner().log_stage();

        Uploader::new(self.services.storage.as_ref())
            .upload(&self.config.archive_path(), bucket, key, &progress)
            .await
            .inspect_err(|_| progress.inner().error())?;

        progress
            .inner()
            .finish(ProgressStatus::Success, Some(&format!("s3://{bucket}/{key}")));

        Ok(())
    }

    async fn update(&self, stack_name: &str, target: &Target) -> eyre::Result<Outcome> {
        let resolving = Progress::new("Resolving", stack_name);
        resolving.log_stage();

        let resources = self
            .services
            .stack
            .resources(stack_name)
            .await
            .inspect_err(|_| resolving.error())?;

        match target {
            Target::Single { resource_name } => {
                let Some(function_name) = find_function(&resources, resource_name) else {
                    resolving.finish(
                        ProgressStatus::Warn,
                        Some(&format!(
                            "Could not find function with resource name \"{resource_name}\" in stack \"{stack_name}\""
                        )),
                    );

                    return Ok(Outcome::NotFound {
                        resource_name: resource_name.clone(),
                        stack_name: stack_name.to_string(),
                    });
                };

                self.update_function(&function_name).await?;
                Ok(Outcome::Updated(vec![function_name]))
            }

            Target::All => {
                let function_names = all_functions(&resources);

                if function_names.is_empty() {
                    resolving.finish(ProgressStatus::Warn, Some("No functions in the stack"));
                    return Ok(Outcome::Updated(vec![]));
                }

                self.update_all(&function_names).await?;
                Ok(Outcome::Updated(function_names))
            }
        }
    }

    async fn update_function(&self, function_name: &str) -> eyre::Result<()> {
        let progress = Progress::new("Updating", function_name);
        progress.log_stage();

        self.services
            .functions
            .update_code(function_name, &self.config.bucket, &self.config.key)
            .await
            .wrap_err(format!("Failed to update lambda function {function_name}"))
            .inspect_err(|_| progress.error())?;

        progress.finish(ProgressStatus::Success, None);
        Ok(())
    }

    /// Update all functions concurrently, waiting for every call to settle
    ///
    /// A failed update does not cancel or roll back the others.
    async fn update_all(&self, function_names: &[String]) -> eyre::Result<()> {
        let handles = function_names.iter().cloned().map(|function_name| {
            let functions = Arc::clone(&self.services.functions);
            let bucket = self.config.bucket.clone();
            let key = self.config.key.clone();

            tokio::spawn(async move {
                let progress = Progress::new("Updating", &function_name);
                progress.log_stage();

                match functions.update_code(&function_name, &bucket, &key).await {
                    Ok(()) => {
                        progress.finish(ProgressStatus::Success, None);
                        Ok(())
                    }
                    Err(error) => {
                        progress.error();
                        Err(error.wrap_err(format!("Failed to update lambda function {function_name}")))
                    }
                }
            })
        });

        let results: Vec<_> = future::join_all(handles).await;
        let mut failed = Vec::new();

        for (function_name, result) in function_names.iter().zip(results) {
            let error = match result {
                Ok(Ok(())) => continue,
                Ok(Err(error)) => error,
                Err(join_error) => Report::msg(join_error),
            };

            log::error!("Failed to update function {function_name}: {error:?}");
            failed.push(function_name.as_str());
        }

        if !failed.is_empty() {
            return Err(eyre!(
                "Failed to update {} of {} functions: {}",
                failed.len(),
                function_names.len(),
                failed.join(", "),
            ));
        }

        Ok(())
    }
}

#[derive(Default)]
pub struct PipelineBuilder {
    config: Option<Config>,
    services: Option<Services>,
}

impl PipelineBuilder {
    pub fn build(self) -> eyre::Result<Pipeline> {
        Ok(Pipeline {
            config: self.config.ok_or_eyre("No config provided to the pipeline")?,
            services: self
                .services
                .ok_or_eyre("No services provided to the pipeline")?,
        })
    }

    pub fn set_config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    pub fn set_services(mut self, services: Services) -> Self {
        self.services = Some(services);
        self
    }
}
