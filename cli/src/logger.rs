use indicatif::MultiProgress;
use indicatif_log_bridge::LogWrapper;
use std::sync::OnceLock;

/// Log output shares the terminal with progress bars, so all logs go through MultiProgress
pub struct Logger {
    multi_progress: MultiProgress,
}

static LOGGER: OnceLock<Logger> = OnceLock::new();

impl Logger {
    /// Set up the global logger once, later calls return the same instance
    ///
    /// Only warnings are shown by default, RUST_LOG overrides the level.
    pub fn init(verbose: bool) -> &'static Self {
        LOGGER.get_or_init(|| {
            let logger = env_logger::Builder::from_env(
                env_logger::Env::default().default_filter_or(if verbose { "debug" } else { "warn" }),
            )
            .build();

            let level = logger.filter();
            let multi_progress = MultiProgress::new();

            // Fails only if another logger is installed already, e.g. in tests
            if let Err(error) = LogWrapper::new(multi_progress.clone(), logger).try_init() {
                eprintln!("Failed to set up the logger: {error}");
            }

            log::set_max_level(level);
            Self { multi_progress }
        })
    }

    pub fn multi_progress() -> &'static MultiProgress {
        &Self::init(false).multi_progress
    }
}
