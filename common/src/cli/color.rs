//! Standardized CLI color policy.
//!
//! Resolution order:
//! - Command-line choice wins.
//! - `NO_COLOR` disables colors.
//! - `TERM=dumb` and `EMACS` imply non-interactive output.
//! - In `Auto`, only enable colors when the target stream is a TTY.

use std::env;
use std::fmt;
use std::str::FromStr;

/// When to emit ANSI colors.
///
/// Parses from `auto`, `always` or `never`, so binaries can take it directly
/// as a `clap` argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorWhen {
    /// Enable colors only when output is a TTY.
    #[default]
    Auto,

    /// Always enable colors.
    Always,

    /// Never enable colors.
    Never,
}

/// Returned when a color policy string is not recognized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseColorWhenError(String);

impl fmt::Display for ParseColorWhenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid color policy '{}' (expected auto, always or never)",
            self.0
        )
    }
}

impl std::error::Error for ParseColorWhenError {}

impl FromStr for ColorWhen {
    type Err = ParseColorWhenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(ColorWhen::Auto),
            "always" => Ok(ColorWhen::Always),
            "never" => Ok(ColorWhen::Never),
            _ => Err(ParseColorWhenError(s.to_string())),
        }
    }
}

impl fmt::Display for ColorWhen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColorWhen::Auto => "auto",
            ColorWhen::Always => "always",
            ColorWhen::Never => "never",
        };
        f.write_str(name)
    }
}

impl ColorWhen {
    // ---
    /// Returns whether ANSI color should be used for the given stream.
    pub fn should_color(self, stream: atty::Stream) -> bool {
        match self {
            ColorWhen::Always => true,
            ColorWhen::Never => false,
            ColorWhen::Auto => {
                if env::var_os("NO_COLOR").is_some() || env::var_os("EMACS").is_some() {
                    return false;
                }

                if env::var("TERM").is_ok_and(|term| term == "dumb") {
                    return false;
                }

                atty::is(stream)
            }
        }
    }

    /// Convenience helper for stderr, where tracing output goes.
    pub fn should_color_stderr(self) -> bool {
        self.should_color(atty::Stream::Stderr)
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    fn with_env_var<F: FnOnce()>(key: &str, val: &str, f: F) {
        // ---
        let prev = env::var_os(key);
        env::set_var(key, val);
        f();
        match prev {
            Some(v) => env::set_var(key, v),
            None => env::remove_var(key),
        }
    }

    #[test]
    fn parses_known_policies() {
        // ---
        assert_eq!("auto".parse::<ColorWhen>(), Ok(ColorWhen::Auto));
        assert_eq!("Always".parse::<ColorWhen>(), Ok(ColorWhen::Always));
        assert_eq!(" never ".parse::<ColorWhen>(), Ok(ColorWhen::Never));
        assert!("sometimes".parse::<ColorWhen>().is_err());
    }

    #[test]
    fn display_matches_parse() {
        // ---
        for policy in [ColorWhen::Auto, ColorWhen::Always, ColorWhen::Never] {
            assert_eq!(policy.to_string().parse::<ColorWhen>(), Ok(policy));
        }
    }

    #[test]
    fn no_color_disables_in_auto() {
        // ---
        with_env_var("NO_COLOR", "1", || {
            assert!(!ColorWhen::Auto.should_color_stderr());
        });
    }

    #[test]
    fn dumb_terminal_disables_in_auto() {
        // ---
        with_env_var("TERM", "dumb", || {
            assert!(!ColorWhen::Auto.should_color_stderr());
        });
    }

    #[test]
    fn explicit_choices_win() {
        // ---
        with_env_var("NO_COLOR", "1", || {
            assert!(ColorWhen::Always.should_color_stderr());
            assert!(!ColorWhen::Never.should_color_stderr());
        });
    }
}
