use clap::{CommandFactory, Parser};
use update_lambda::cli::Args;
use update_lambda::error::Error;
use update_lambda::logger::Logger;
use update_lambda::runner::{run, AwsConnector, Exit};

#[tokio::main]
async fn main() {
    let args = Args::parse();
    Logger::init(args.verbose);

    match run(&args, &AwsConnector).await {
        Ok(Exit::Usage) => {
            if let Err(error) = Args::command().print_help() {
                log::error!("Failed to print help: {error:?}");
            }
        }

        Ok(Exit::Finished(outcome)) => log::debug!("Run finished: {outcome:?}"),

        Err(report) => {
            log::debug!("{report:?}");
            Error::from(report).print();

            // Any failed step fails the whole run
            std::process::exit(1)
        }
    }
}
