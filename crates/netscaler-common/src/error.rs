//! Error types for the NetScaler plugin core
//!
//! Variants follow the failure classes a plugin invocation can hit: bad
//! user input or ambient configuration, missing pods, malformed version
//! strings, kubectl failures, and local filesystem failures.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for plugin operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error from a listing call
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Missing or ambiguous selector, unresolvable namespace, bad connection flag
    #[error("configuration error: {message}")]
    Config {
        /// Description of what is misconfigured
        message: String,
    },

    /// No pod matched the selector, or none of the matches is healthy
    #[error("{message}")]
    NotFound {
        /// Human-readable description of what was searched for
        message: String,
    },

    /// A version string did not match the `major.minor.patch` pattern
    #[error("could not parse {input:?} as a version string (like 0.20.3)")]
    Parse {
        /// The text that failed to parse
        input: String,
    },

    /// The external command could not be started at all
    #[error("failed to start {program}: {source}")]
    Spawn {
        /// Program that was being spawned
        program: String,
        /// Underlying OS error
        source: std::io::Error,
    },

    /// The command started, but waiting for it or reading its output failed
    #[error("lost track of {program} after it started: {source}")]
    Capture {
        /// Program that was running
        program: String,
        /// Underlying OS or task error
        source: std::io::Error,
    },

    /// The external command ran and exited unsuccessfully
    #[error("{program} exited with {}: {}", exit_code_display(.code), .output.trim())]
    CommandExit {
        /// Program that failed
        program: String,
        /// Exit code, if the process was not killed by a signal
        code: Option<i32>,
        /// Merged stdout/stderr captured before the process exited
        output: String,
    },

    /// Local filesystem failure while writing artifacts
    #[error("io error at {}: {source}", .path.display())]
    Io {
        /// Path being created or written
        path: PathBuf,
        /// Underlying OS error
        source: std::io::Error,
    },
}

fn exit_code_display(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {}", code),
        None => "a signal".to_string(),
    }
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a not-found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound {
            message: msg.into(),
        }
    }

    /// Create a parse error for the given input
    pub fn parse(input: impl Into<String>) -> Self {
        Self::Parse {
            input: input.into(),
        }
    }

    /// Create an IO error tied to a path
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this is a kubectl execution failure rather than a local one
    pub fn is_exec(&self) -> bool {
        matches!(
            self,
            Error::Spawn { .. } | Error::Capture { .. } | Error::CommandExit { .. }
        )
    }

    /// Output captured from a command that ran but failed.
    ///
    /// Callers that can make use of partial output (conf, log retrieval)
    /// read it from here instead of discarding the error.
    pub fn partial_output(&self) -> Option<&str> {
        match self {
            Error::CommandExit { output, .. } => Some(output),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_and_exit_are_distinct_exec_classes() {
        let spawn = Error::Spawn {
            program: "kubectl".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        };
        let exit = Error::CommandExit {
            program: "kubectl".to_string(),
            code: Some(1),
            output: "error: pod not found\n".to_string(),
        };

        assert!(spawn.is_exec());
        assert!(exit.is_exec());
        assert!(spawn.partial_output().is_none());
        assert_eq!(exit.partial_output(), Some("error: pod not found\n"));
        assert!(spawn.to_string().contains("failed to start kubectl"));
        assert_eq!(
            exit.to_string(),
            "kubectl exited with status 1: error: pod not found"
        );
    }

    #[test]
    fn capture_failure_is_not_reported_as_spawn() {
        let err = Error::Capture {
            program: "kubectl".to_string(),
            source: std::io::Error::other("pipe closed"),
        };
        assert!(err.is_exec());
        assert!(err.partial_output().is_none());
        assert!(!err.to_string().contains("failed to start"));
        assert_eq!(
            err.to_string(),
            "lost track of kubectl after it started: pipe closed"
        );
    }

    #[test]
    fn signal_exit_is_described() {
        let err = Error::CommandExit {
            program: "kubectl".to_string(),
            code: None,
            output: String::new(),
        };
        assert!(err.to_string().contains("a signal"));
    }

    #[test]
    fn parse_error_names_the_input() {
        let err = Error::parse("abc");
        assert!(!err.is_exec());
        assert!(err.to_string().contains("\"abc\""));
    }

    #[test]
    fn not_found_message_is_verbatim() {
        let err = Error::not_found("pod x not found in namespace y or is not in healthy state");
        assert_eq!(
            err.to_string(),
            "pod x not found in namespace y or is not in healthy state"
        );
    }
}
