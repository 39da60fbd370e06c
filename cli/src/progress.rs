use crate::logger::Logger;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{stdout, IsTerminal};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Progress of a long running operation, e.g. archived entries or uploaded bytes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProgressEvent {
    pub processed: u64,
    pub total: u64,
}

impl ProgressEvent {
    pub fn new(processed: u64, total: u64) -> Self {
        Self { processed, total }
    }

    /// The last event of an operation
    pub fn is_final(&self) -> bool {
        self.processed >= self.total
    }
}

/// Receiver of progress events
pub trait ProgressSink: Send + Sync {
    fn progress(&self, event: ProgressEvent);
}

/// Closures are sinks too, mostly handy in tests
impl<F> ProgressSink for F
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn progress(&self, event: ProgressEvent) {
        self(event)
    }
}

/// Minimum interval policy between two emissions
///
/// The first and the final events always pass.
#[derive(Debug)]
pub struct Throttle {
    interval: Duration,
    last: Option<Instant>,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    /// Decide whether an event happening at `now` should be emitted, and remember it if so
    pub fn should_emit(&mut self, now: Instant, is_final: bool) -> bool {
        let is_due = match self.last {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        };

        if is_due || is_final {
            self.last = Some(now);
            return true;
        }

        false
    }
}

/// Forwards only the events allowed by the throttle
pub struct Throttled<S> {
    sink: S,
    throttle: Mutex<Throttle>,
}

impl<S: ProgressSink> Throttled<S> {
    pub fn new(sink: S, interval: Duration) -> Self {
        Self {
            sink,
            throttle: Mutex::new(Throttle::new(interval)),
        }
    }

    pub fn inner(&self) -> &S {
        &self.sink
    }
}

impl<S: ProgressSink> ProgressSink for Throttled<S> {
    fn progress(&self, event: ProgressEvent) {
        let emit = match self.throttle.lock() {
            Ok(mut throttle) => throttle.should_emit(Instant::now(), event.is_final()),

            // Nothing is shared between emissions except the timestamp
            Err(poisoned) => poisoned
                .into_inner()
                .should_emit(Instant::now(), event.is_final()),
        };

        if emit {
            self.sink.progress(event);
        }
    }
}

pub(crate) enum ProgressStatus {
    Success,
    Warn,
    Error,
}

/// Progress of one stage in the terminal, e.g. "Archiving code.zip"
pub struct Progress {
    progress_bar: ProgressBar,
    stage: String,
    resource_name: String,
    is_terminal: bool,
}

impl Progress {
    pub fn new(stage: &str, resource_name: &str) -> Self {
        let is_terminal = stdout().is_terminal();

        let progress_bar = if is_terminal {
            Logger::multi_progress().add(ProgressBar::new(0))
        } else {
            ProgressBar::hidden()
        };

        progress_bar.set_style(
            ProgressStyle::default_bar()
                .template(&format!(
                    "{} {{msg}} [{{bar:30}}] {{pos}}/{{len}}",
                    console::style(with_padding(stage)).cyan().bold(),
                ))
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );

        progress_bar.set_message(resource_name.to_string());

        Self {
            progress_bar,
            stage: stage.to_string(),
            resource_name: resource_name.to_string(),
            is_terminal,
        }
    }

    /// Print the stage line, like "   Uploading code.zip"
    pub(crate) fn log_stage(&self) {
        let msg = format!(
            "{} {}",
            console::style(with_padding(&self.stage)).green().bold(),
            self.resource_name,
        );

        // Terminal or CI/CD?
        if self.is_terminal {
            self.progress_bar.println(msg);
        } else {
            println!("{msg}");
        }
    }

    pub(crate) fn finish(&self, status: ProgressStatus, message: Option<&str>) {
        let stage = console::style(with_padding(&self.stage)).bold();

        let stage = match status {
            ProgressStatus::Success => stage.green(),
            ProgressStatus::Warn => stage.yellow(),
            ProgressStatus::Error => stage.red(),
        };

        let message = message.map(|m| format!(": {m}")).unwrap_or_default();
        let line = format!("{} {}{}", stage, self.resource_name, message);
        self.progress_bar.finish_and_clear();

        match status {
            ProgressStatus::Error | ProgressStatus::Warn => eprintln!("{line}"),
            ProgressStatus::Success => println!("{line}"),
        }
    }

    pub(crate) fn error(&self) {
        self.finish(ProgressStatus::Error, None);
    }
}

impl ProgressSink for Progress {
    fn progress(&self, event: ProgressEvent) {
        if self.is_terminal {
            self.progress_bar.set_length(event.total);
            self.progress_bar.set_position(event.processed);
        } else {
            // CI logs get plain lines, the throttle keeps them rare
            println!(
                "{} progress: {}/{}",
                self.stage, event.processed, event.total
            );
        }
    }
}

// Required padding to make the message aligned in the cargo-like style
pub(crate) fn with_padding(message: &str) -> String {
    format!("{message:>12}")
}
