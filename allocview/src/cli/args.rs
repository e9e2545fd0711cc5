//! CLI argument definitions

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::session::SessionConfig;

/// Largest ring a call site may keep; every series allocates the full ring.
pub const MAX_SAMPLES: u64 = 1 << 20;

#[derive(Parser, Debug)]
#[command(
    name = "allocview",
    about = "Live per-call-site allocation view for a program linked with allocview-agent",
    after_help = "\
EXAMPLES:
    allocview -- ./my-app --flag               Launch and watch my-app
    allocview --headless --export out.json -- ./my-app
    allocview --replay capture.alloc           Read an offline capture"
)]
pub struct Args {
    /// Command to launch with the agent endpoint in its environment
    #[arg(value_name = "CMD", last = true, required_unless_present = "replay")]
    pub command: Vec<String>,

    /// Sample duration in milliseconds
    #[arg(long, value_name = "DURATION_MS", default_value = "1000",
          value_parser = clap::value_parser!(u64).range(1..))]
    pub interval: u64,

    /// Number of samples kept per call site
    #[arg(long, value_name = "N", default_value = "2048",
          value_parser = clap::value_parser!(u64).range(1..=MAX_SAMPLES))]
    pub samples: u64,

    /// Run without TUI, log periodic summaries
    #[arg(long)]
    pub headless: bool,

    /// Write a JSON summary of the final collection
    #[arg(long, value_name = "FILE")]
    pub export: Option<PathBuf>,

    /// Read an offline capture instead of launching a command
    #[arg(long, value_name = "FILE", conflicts_with = "command")]
    pub replay: Option<PathBuf>,

    /// Rows in headless summaries
    #[arg(long, value_name = "N", default_value = "10")]
    pub top: usize,

    /// Suppress non-essential output
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            sample_duration: Duration::from_millis(self.interval),
            sample_count: usize::try_from(self.samples.min(MAX_SAMPLES)).unwrap_or(1 << 20),
            ..SessionConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_after_separator() {
        let args = Args::try_parse_from(["allocview", "--interval", "250", "--", "./app", "-x"]).unwrap();
        assert_eq!(args.command, vec!["./app", "-x"]);
        let cfg = args.session_config();
        assert_eq!(cfg.sample_duration, Duration::from_millis(250));
        assert_eq!(cfg.sample_count, 2048);
        assert_eq!(args.top, 10);
    }

    #[test]
    fn test_command_required_without_replay() {
        assert!(Args::try_parse_from(["allocview"]).is_err());
        let args = Args::try_parse_from(["allocview", "--replay", "c.alloc"]).unwrap();
        assert!(args.command.is_empty());
    }

    #[test]
    fn test_zero_interval_rejected() {
        assert!(Args::try_parse_from(["allocview", "--interval", "0", "--", "x"]).is_err());
    }

    #[test]
    fn test_sample_count_bounded() {
        for samples in ["0", "1048577", "18446744073709551615"] {
            assert!(
                Args::try_parse_from(["allocview", "--samples", samples, "--", "x"]).is_err(),
                "--samples {samples} accepted"
            );
        }
        let args = Args::try_parse_from(["allocview", "--samples", "1048576", "--", "x"]).unwrap();
        assert_eq!(args.session_config().sample_count, 1 << 20);
    }
}
