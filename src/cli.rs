use clap::Parser;
use std::path::PathBuf;

/// Build a topology tree from measured subnets and gather alias-resolution hints
#[derive(Parser, Debug, Clone)]
#[command(name = "hoptree")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Subnet file, one subnet per line
    #[arg(required = true)]
    pub input: PathBuf,

    /// Subnets measured elsewhere, grafted onto the tree trunk
    #[arg(long = "graft")]
    pub graft: Option<PathBuf>,

    /// Maximum concurrent probe tasks
    #[arg(short = 't', long = "threads")]
    pub threads: Option<u16>,

    /// Longest route expected
    #[arg(short = 'm', long = "max-depth")]
    pub max_depth: Option<u8>,

    /// IP-ID samples per interface
    #[arg(long = "ip-ids")]
    pub ip_ids: Option<u8>,

    /// Skip alias-resolution hint collection
    #[arg(long = "no-hints")]
    pub no_hints: bool,

    /// Skip reverse DNS lookups
    #[arg(long = "no-dns")]
    pub no_dns: bool,

    /// Write the subnets of the tree to this file
    #[arg(long = "subnets-out")]
    pub subnets_out: Option<PathBuf>,

    /// Write the inferred routers to this file
    #[arg(long = "aliases-out")]
    pub aliases_out: Option<PathBuf>,

    /// Print statistics and the bipartite graph as JSON instead of the text report
    #[arg(long = "json")]
    pub json: bool,

    /// TOML configuration file (flags take precedence)
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Debug logging
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}

impl Args {
    /// Validate arguments
    pub fn validate(&self) -> Result<(), String> {
        if self.threads == Some(0) {
            return Err("Threads must be at least 1".into());
        }

        if self.max_depth == Some(0) {
            return Err("Max depth must be at least 1".into());
        }

        if let Some(samples) = self.ip_ids {
            if samples == 0 {
                return Err("At least one IP-ID sample is needed".into());
            }
            const MAX_SAMPLES: u8 = 32;
            if samples > MAX_SAMPLES {
                return Err(format!("IP-ID samples cannot exceed {}", MAX_SAMPLES));
            }
        }

        if self.graft.as_ref() == Some(&self.input) {
            return Err("Cannot graft a subnet file onto itself".into());
        }

        Ok(())
    }
}
