/// Error shown to the user when a run fails
///
/// The message is the headline, details are printed dimmed below it as a hint.
#[derive(Debug, Clone)]
pub struct Error(String, Option<String>);

impl Error {
    pub fn new(message: &str, details: Option<&str>) -> Self {
        Error(message.to_string(), details.map(|d| d.to_string()))
    }

    pub fn message(&self) -> &str {
        &self.0
    }

    /// Print to stderr in the unified format
    pub fn print(&self) {
        eprintln!("\n{}\n{self}", console::style("Error").red().bold());
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match &self.1 {
            Some(details) => write!(f, "{}\n\n{}", self.0, console::style(details).dim()),
            None => write!(f, "{}", self.0),
        }
    }
}

impl std::error::Error for Error {}

/// Reports keep their whole chain of contexts, the outermost one becomes the headline
impl From<eyre::Report> for Error {
    fn from(report: eyre::Report) -> Self {
        match report.downcast::<Error>() {
            Ok(error) => error,
            Err(report) => {
                let causes = report
                    .chain()
                    .skip(1)
                    .map(|cause| cause.to_string())
                    .collect::<Vec<_>>();

                let details = (!causes.is_empty()).then(|| causes.join("\n"));
                Error::new(&report.to_string(), details.as_deref())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eyre::WrapErr;

    #[test]
    fn report_context_becomes_headline() {
        let report = Err::<(), _>(std::io::Error::other("disk is full"))
            .wrap_err("Failed to write zip entry")
            .unwrap_err();

        let error = Error::from(report);
        assert_eq!(error.message(), "Failed to write zip entry");
        assert!(error.to_string().contains("disk is full"));
    }

    #[test]
    fn every_cause_is_shown_once() {
        let report = Err::<(), _>(std::io::Error::other("Access Denied"))
            .wrap_err("PutObject request failed")
            .wrap_err("Failed to upload file to s3 code.zip (bucket artifacts)")
            .unwrap_err();

        let shown = Error::from(report).to_string();

        for cause in ["Failed to upload", "PutObject request failed", "Access Denied"] {
            assert_eq!(shown.matches(cause).count(), 1, "{cause} in {shown}");
        }
    }

    #[test]
    fn user_errors_pass_through() {
        let report = eyre::Report::new(Error::new("Stack not found", Some("Check the name")));
        assert_eq!(Error::from(report).message(), "Stack not found");
    }
}
