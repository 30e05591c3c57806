//! Console progress reporting for walks.

use owo_colors::OwoColorize;
use vpk::error::Error;
use vpk::handler::ProgressHandler;

/// Prints walk progress and tallies successes and failures.
///
/// Error callbacks return the `stop` flag, so `--stop` aborts the walk at
/// the first failed entry. When a filter whitelist is present, progress
/// lines for paths outside of it are suppressed.
pub struct ConsoleHandler {
    filter: Vec<String>,
    stop: bool,
    filecount: usize,
    success: usize,
    fail: usize,
}

impl ConsoleHandler {
    pub fn new(filter: Vec<String>, stop: bool) -> Self {
        Self {
            filter,
            stop,
            filecount: 0,
            success: 0,
            fail: 0,
        }
    }

    /// True when no entry failed and no error was reported.
    pub fn all_ok(&self) -> bool {
        self.fail == 0
    }

    fn matches(&self, path: &str) -> bool {
        self.filter.is_empty()
            || self.filter.iter().any(|kept| {
                path == kept
                    || path
                        .strip_prefix(kept.as_str())
                        .is_some_and(|rest| rest.starts_with('/'))
            })
    }

    fn report(&mut self, error: &Error) -> bool {
        self.fail += 1;
        eprintln!("{} {error}", "*** error:".red());
        self.stop
    }
}

impl ProgressHandler for ConsoleHandler {
    fn begin(&mut self, filecount: usize) {
        self.filecount = filecount;
        self.success = 0;
        self.fail = 0;
    }

    fn end(&mut self) {
        if self.fail > 0 {
            eprintln!(
                "{}",
                format!(
                    "{} of {} files ok, {} failed",
                    self.success, self.filecount, self.fail
                )
                .red()
            );
        }
    }

    fn extract(&mut self, path: &str) {
        if self.matches(path) {
            println!("{path}");
        }
    }

    fn success(&mut self, _path: &str) {
        self.success += 1;
    }

    fn dir_error(&mut self, error: &Error, _path: &str) -> bool {
        self.report(error)
    }

    fn file_error(&mut self, error: &Error, _path: &str) -> bool {
        self.report(error)
    }

    fn archive_error(&mut self, error: &Error, _path: &str) -> bool {
        self.report(error)
    }
}

#[cfg(test)]
mod test {
    use super::ConsoleHandler;

    #[test]
    fn filter_matches_at_component_boundaries() {
        let handler = ConsoleHandler::new(vec!["a/b".to_string()], false);
        assert!(handler.matches("a/b"));
        assert!(handler.matches("a/b/c.txt"));
        assert!(!handler.matches("a/bc.txt"));
        assert!(!handler.matches("a"));
    }

    #[test]
    fn empty_filter_matches_everything() {
        let handler = ConsoleHandler::new(Vec::new(), false);
        assert!(handler.matches("anything/at/all"));
    }
}
