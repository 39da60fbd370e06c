use clap::{ArgAction, Parser};
use std::path::PathBuf;

/// Required options are optional on clap's side: when any of them is missing
/// the help is printed instead of an error, see `Config::from_args`.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "update-lambda",
    version,
    about = "Package code into a zip, upload it to S3 and update Lambda functions of a CloudFormation stack",
    long_about = None
)]
pub struct Args {
    /// AWS profile used to resolve credentials and region
    #[arg(short, long, value_name = "PROFILE")]
    pub profile: Option<String>,

    /// S3 bucket to upload the code to
    #[arg(short = 'c', long, value_name = "BUCKET")]
    pub code_bucket: Option<String>,

    /// CloudFormation stack with the functions to update
    #[arg(short, long, value_name = "STACK")]
    pub stack_name: Option<String>,

    /// S3 key of the code, also the path of the local zip file
    #[arg(short = 'k', long, value_name = "KEY")]
    pub code_key: Option<String>,

    /// Logical name of the function resource in the stack
    #[arg(short, long, value_name = "NAME")]
    pub resource_name: Option<String>,

    /// Update every function in the stack instead of a single resource
    #[arg(short, long, action = ArgAction::SetTrue, conflicts_with = "resource_name")]
    pub all_functions: bool,

    /// Only upload the code, skip updating the functions
    ///
    /// --stack-name and --resource-name are not required in this mode.
    #[arg(long, action = ArgAction::SetTrue)]
    pub upload_only: bool,

    /// Directory to package
    #[arg(short = 'd', long, value_name = "DIR", default_value = ".")]
    pub source_dir: PathBuf,

    /// Show debug logs
    #[arg(short, long, action = ArgAction::SetTrue)]
    pub verbose: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_option_is_rejected() {
        let result = Args::try_parse_from(["update-lambda", "-p", "dev", "--unknown"]);
        assert!(result.is_err());
    }

    #[test]
    fn short_flags() {
        let args = Args::try_parse_from([
            "update-lambda", "-p", "dev", "-c", "bucket", "-s", "stack", "-k", "key.zip", "-r", "Fn",
        ])
        .unwrap();

        assert_eq!(args.profile.as_deref(), Some("dev"));
        assert_eq!(args.code_bucket.as_deref(), Some("bucket"));
        assert_eq!(args.stack_name.as_deref(), Some("stack"));
        assert_eq!(args.code_key.as_deref(), Some("key.zip"));
        assert_eq!(args.resource_name.as_deref(), Some("Fn"));
        assert_eq!(args.source_dir, PathBuf::from("."));
        assert!(!args.upload_only);
    }

    #[test]
    fn all_functions_conflicts_with_resource_name() {
        let result = Args::try_parse_from(["update-lambda", "-r", "Fn", "--all-functions"]);
        assert!(result.is_err());
    }

    #[test]
    fn upload_only_help_names_optional_stack_fields() {
        use clap::CommandFactory;

        let help = Args::command().render_long_help().to_string();
        assert!(help.contains("--stack-name and --resource-name are not required"));
    }

    #[test]
    fn missing_values_still_parse() {
        let args = Args::try_parse_from(["update-lambda"]).unwrap();
        assert!(args.profile.is_none());
    }
}
