use crate::server::seed::TagSeed;
use anyhow::bail;
use clap::Parser;
use core::{num::NonZeroUsize, time::Duration};
use segid::AllocatorConfig;
use std::{collections::HashSet, path::PathBuf};

/// Runtime configuration for the `segid-server` binary.
///
/// All values are parsed from CLI arguments or environment variables (a
/// `.env` file in the working directory is honoured). The defaults match the
/// allocator's own defaults.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "segid-server",
    version,
    about = "An HTTP service handing out segment-allocated unique IDs"
)]
pub struct CliArgs {
    /// Address to listen on.
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("0.0.0.0:8080"))]
    pub server_addr: String,

    /// Durable allocation file. Reservations are written here before ids are
    /// served, so a restart never hands out an id twice. Without it the
    /// counters live in memory and restart from the seeds.
    ///
    /// Environment variable: `DATA_FILE`
    #[arg(long, env = "DATA_FILE")]
    pub data_file: Option<PathBuf>,

    /// JSON file with the initial allocation rows: an array of
    /// `{"tag": ..., "max_id": ..., "step": ...}` objects.
    ///
    /// Environment variable: `SEED_FILE`
    #[arg(long, env = "SEED_FILE")]
    pub seed_file: Option<PathBuf>,

    /// Additional allocation rows as `tag:max_id:step`. Repeat the flag or
    /// separate entries with commas.
    ///
    /// Environment variable: `SEGID_TAGS`
    #[arg(long = "tag", env = "SEGID_TAGS", value_delimiter = ',')]
    pub tags: Vec<TagSeed>,

    /// Number of background workers loading standby segments.
    ///
    /// Environment variable: `REFILL_WORKERS`
    #[arg(long, env = "REFILL_WORKERS", default_value_t = 4)]
    pub refill_workers: usize,

    /// Seconds between two reconciliations of the cached tag set.
    ///
    /// Environment variable: `RECONCILE_PERIOD_SECS`
    #[arg(long, env = "RECONCILE_PERIOD_SECS", default_value_t = 60)]
    pub reconcile_period_secs: u64,

    /// Expected lifetime of a segment in seconds. Drives the step adaptation.
    ///
    /// Environment variable: `SEGMENT_DURATION_SECS`
    #[arg(long, env = "SEGMENT_DURATION_SECS", default_value_t = 900)]
    pub segment_duration_secs: u64,

    /// Upper bound for the adaptive step.
    ///
    /// Environment variable: `MAX_STEP`
    #[arg(long, env = "MAX_STEP", default_value_t = 1_000_000)]
    pub max_step: i32,

    /// Milliseconds a request waits for an in-flight refill before retrying.
    ///
    /// Environment variable: `REFILL_WAIT_MS`
    #[arg(long, env = "REFILL_WAIT_MS", default_value_t = 10)]
    pub refill_wait_ms: u64,

    /// First-load attempts per request before reporting an init failure.
    ///
    /// Environment variable: `INIT_ATTEMPTS`
    #[arg(long, env = "INIT_ATTEMPTS", default_value_t = 1)]
    pub init_attempts: usize,

    /// Grace period in seconds for background tasks on shutdown.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT`
    #[arg(long, env = "SHUTDOWN_TIMEOUT", default_value_t = 3)]
    pub shutdown_timeout: u64,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_addr: String,
    pub data_file: Option<PathBuf>,
    pub seed_file: Option<PathBuf>,
    pub tags: Vec<TagSeed>,
    pub allocator: AllocatorConfig,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        let Some(refill_workers) = NonZeroUsize::new(args.refill_workers) else {
            bail!("REFILL_WORKERS must be greater than 0");
        };
        let Some(init_attempts) = NonZeroUsize::new(args.init_attempts) else {
            bail!("INIT_ATTEMPTS must be greater than 0");
        };
        if args.reconcile_period_secs == 0 {
            bail!("RECONCILE_PERIOD_SECS must be greater than 0");
        }
        if args.segment_duration_secs == 0 {
            bail!("SEGMENT_DURATION_SECS must be greater than 0");
        }
        if args.max_step <= 0 {
            bail!("MAX_STEP must be greater than 0 (got {})", args.max_step);
        }

        let mut seen = HashSet::new();
        for seed in &args.tags {
            if !seen.insert(seed.tag.as_str()) {
                bail!("tag `{}` is configured more than once", seed.tag);
            }
        }

        let allocator = AllocatorConfig::default()
            .with_segment_duration(Duration::from_secs(args.segment_duration_secs))
            .with_max_step(args.max_step)
            .with_reconcile_period(Duration::from_secs(args.reconcile_period_secs))
            .with_refill_workers(refill_workers)
            .with_refill_wait(Duration::from_millis(args.refill_wait_ms))
            .with_init_attempts(init_attempts)
            .with_shutdown_timeout(Duration::from_secs(args.shutdown_timeout));

        Ok(Self {
            server_addr: args.server_addr,
            data_file: args.data_file,
            seed_file: args.seed_file,
            tags: args.tags,
            allocator,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> anyhow::Result<ServerConfig> {
        let args = CliArgs::try_parse_from(core::iter::once("segid-server").chain(args.iter().copied()))?;
        ServerConfig::try_from(args)
    }

    #[test]
    fn defaults_match_the_allocator() {
        let config = parse(&[]).unwrap();
        assert_eq!(config.server_addr, "0.0.0.0:8080");
        assert!(config.tags.is_empty());
        assert!(config.data_file.is_none());
        assert_eq!(config.allocator, AllocatorConfig::default());
    }

    #[test]
    fn tags_from_repeated_and_delimited_flags() {
        let config = parse(&["--tag", "order:100:10", "--tag", "user:0:1,invoice:5:50"]).unwrap();
        let tags: Vec<_> = config.tags.iter().map(|s| s.tag.as_str()).collect();
        assert_eq!(tags, ["order", "user", "invoice"]);
        assert_eq!(config.tags[0].max_id, 100);
        assert_eq!(config.tags[2].step, 50);
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(parse(&["--refill-workers", "0"]).is_err());
        assert!(parse(&["--init-attempts", "0"]).is_err());
        assert!(parse(&["--max-step", "0"]).is_err());
        assert!(parse(&["--reconcile-period-secs", "0"]).is_err());
        assert!(parse(&["--tag", "order:1:1", "--tag", "order:2:2"]).is_err());
        assert!(parse(&["--tag", "order:x:1"]).is_err());
    }

    #[test]
    fn tunables_flow_into_the_allocator() {
        let config = parse(&[
            "--refill-workers",
            "2",
            "--refill-wait-ms",
            "25",
            "--segment-duration-secs",
            "60",
            "--data-file",
            "/var/lib/segid/allocs.json",
        ])
        .unwrap();
        assert_eq!(config.allocator.refill_workers.get(), 2);
        assert_eq!(config.allocator.refill_wait, Duration::from_millis(25));
        assert_eq!(config.allocator.segment_duration, Duration::from_secs(60));
        assert_eq!(
            config.data_file.as_deref(),
            Some(std::path::Path::new("/var/lib/segid/allocs.json"))
        );
    }
}
