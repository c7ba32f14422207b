//! Process-level error type and exit-status mapping.

use thiserror::Error;

/// Exit status after printing help or version.
pub const EXIT_OK: i32 = 0;
/// Exit status for argument, configuration and startup failures.
pub const EXIT_CONFIG: i32 = 1;
/// Exit status when the backend rejects the login.
pub const EXIT_LOGIN_FAILED: i32 = 2;

/// Fatal errors that end the jukebox process.
#[derive(Debug, Error)]
pub enum JukeboxError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("missing required argument: {0}")]
    MissingArgument(&'static str),

    #[error("{0}")]
    Usage(#[from] clap::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("library file error: {0}")]
    Library(String),

    #[error("Login failed: {0}")]
    LoginFailed(String),
}

impl JukeboxError {
    /// Process exit status reported for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            JukeboxError::LoginFailed(_) => EXIT_LOGIN_FAILED,
            JukeboxError::Usage(err) if !err.use_stderr() => EXIT_OK,
            _ => EXIT_CONFIG,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_failure_has_distinct_exit_code() {
        let login = JukeboxError::LoginFailed("bad credentials".to_string());
        let config = JukeboxError::MissingArgument("username");
        assert_eq!(login.exit_code(), EXIT_LOGIN_FAILED);
        assert_eq!(config.exit_code(), EXIT_CONFIG);
        assert_ne!(login.exit_code(), config.exit_code());
        assert_eq!(login.to_string(), "Login failed: bad credentials");
    }

    #[test]
    fn test_argument_errors_exit_like_config_errors() {
        use crate::cli::Args;
        use clap::Parser;

        for argv in [vec!["jukebox", "-u"], vec!["jukebox", "--bogus"]] {
            let err = Args::try_parse_from(argv).expect_err("arguments are invalid");
            assert_eq!(JukeboxError::from(err).exit_code(), EXIT_CONFIG);
        }
        assert_ne!(EXIT_CONFIG, EXIT_LOGIN_FAILED);
    }

    #[test]
    fn test_help_and_version_exit_cleanly() {
        use crate::cli::Args;
        use clap::Parser;

        for flag in ["--help", "--version"] {
            let err = Args::try_parse_from(["jukebox", flag]).expect_err("clap stops early");
            assert_eq!(JukeboxError::from(err).exit_code(), EXIT_OK);
        }
    }
}
