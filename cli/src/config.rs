use crate::cli::Args;
use aws_config::{BehaviorVersion, SdkConfig};
use std::path::PathBuf;
use std::time::Duration;

/// Minimum interval between two progress lines of the same operation
pub const PROGRESS_THROTTLE: Duration = Duration::from_millis(1000);

/// Size of a single part in a multipart upload
///
/// Files up to this size are sent with one PutObject request.
/// S3 requires at least 5 MiB for every part except the last one.
pub const UPLOAD_PART_SIZE: usize = 8 * 1024 * 1024;

/// CloudFormation resource type of a Lambda function
pub const FUNCTION_RESOURCE_TYPE: &str = "AWS::Lambda::Function";

/// Which functions of the stack get the new code
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Target {
    /// One function, matched by its logical resource name
    Single { resource_name: String },

    /// Every function in the stack
    All,
}

/// What happens after the archive is uploaded
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Update {
    /// The --upload-only run, no functions are touched
    Skip,

    Stack { stack_name: String, target: Target },
}

/// Validated configuration of a single run
#[derive(Clone, Debug)]
pub struct Config {
    pub profile: String,
    pub bucket: String,
    pub key: String,
    pub source_dir: PathBuf,
    pub update: Update,
}

impl Config {
    /// Build the config from CLI args
    ///
    /// Returns None when any of the fields required for the requested mode is missing.
    pub fn from_args(args: &Args) -> Option<Self> {
        let profile = non_empty(&args.profile)?;
        let bucket = non_empty(&args.code_bucket)?;
        let key = non_empty(&args.code_key)?;

        let update = if args.upload_only {
            Update::Skip
        } else {
            let stack_name = non_empty(&args.stack_name)?;

            let target = if args.all_functions {
                Target::All
            } else {
                Target::Single {
                    resource_name: non_empty(&args.resource_name)?,
                }
            };

            Update::Stack { stack_name, target }
        };

        Some(Config {
            profile,
            bucket,
            key,
            source_dir: args.source_dir.clone(),
            update,
        })
    }

    /// Local path of the zip file, the key is reused as a path relative to the current dir
    pub fn archive_path(&self) -> PathBuf {
        PathBuf::from(&self.key)
    }

    /// Load AWS settings (credentials, region) for the configured profile
    ///
    /// The resulting config is passed to every client explicitly, the process env is not touched.
    pub async fn sdk_config(&self) -> SdkConfig {
        aws_config::defaults(BehaviorVersion::latest())
            .profile_name(&self.profile)
            .load()
            .await
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.clone().filter(|v| !v.trim().is_empty())
}
