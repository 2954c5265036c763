use std::{net::IpAddr, time::Duration};

use clap::{ArgAction, Args, Parser};
use tracing::{level_filters::LevelFilter, Level};
use tracing_subscriber::filter::{Directive, ParseError};
use url::Url;

use crate::{
    handler::SessionConfig,
    pools::{DecodeMode, StreamContractRequest},
    rpc::PriceFeedConfig,
};

#[derive(Debug, Parser)]
#[command(about = "Streams DEX pool spot prices over json-rpc subscriptions", long_about = None)]
pub struct CliCmd {
    /// address the rpc server binds to
    #[arg(long, default_value = "127.0.0.1")]
    pub host: IpAddr,

    /// port the rpc server listens on
    #[arg(long, default_value_t = 50051)]
    pub port: u16,

    /// smallest scrape interval (ms) a subscription may ask for
    #[arg(long, default_value_t = 100)]
    pub min_scrape_interval: u64,

    /// consecutive ticks a session may lose to an unreachable endpoint before
    /// it is closed, 0 closes it on the first failure
    #[arg(long, default_value_t = 0)]
    pub max_tick_failures: u32,

    #[clap(flatten)]
    pub verbosity: Verbosity,
}

impl CliCmd {
    pub fn feed_config(&self) -> PriceFeedConfig {
        PriceFeedConfig {
            min_scrape_interval: Duration::from_millis(self.min_scrape_interval),
            session: SessionConfig {
                max_tick_failures: self.max_tick_failures,
            },
        }
    }
}

#[derive(Debug, Parser)]
#[command(about = "Subscribes to a dex-price-stream server and prints every update", long_about = None)]
pub struct ClientCmd {
    /// host of the dex-price-stream server
    #[arg(short = 'e', long = "host", default_value = "localhost")]
    pub host: String,

    /// port of the dex-price-stream server
    #[arg(short, long, default_value_t = 50051)]
    pub port: u16,

    /// json-rpc endpoint of the chain the pool lives on
    #[arg(long)]
    pub endpoint: Url,

    /// pool to stream, defaults to the mainnet USDC/WETH 0.05% pool
    #[arg(long, default_value = "0x88e6A0c2dDD26FEEb64F039a2c41296FcB3f5640")]
    pub address: String,

    /// chain id, or a chain name that is only used as a label
    #[arg(long, default_value = "ethereum")]
    pub chain: String,

    /// ms between polls
    #[arg(long, default_value_t = 12_000)]
    pub scrape_interval: u32,

    #[arg(long, value_enum, default_value_t = DecodeMode::Exact)]
    pub decode_mode: DecodeMode,

    #[clap(flatten)]
    pub verbosity: Verbosity,
}

impl ClientCmd {
    pub fn server_url(&self) -> String {
        format!("ws://{}:{}", self.host, self.port)
    }

    pub fn request(&self) -> StreamContractRequest {
        StreamContractRequest {
            endpoint: self.endpoint.clone(),
            chain_id: self.chain.clone(),
            address: self.address.clone(),
            abi: None,
            scrape_interval: self.scrape_interval,
            decode_mode: Some(self.decode_mode),
        }
    }
}

/// The verbosity settings for the cli.
#[derive(Debug, Copy, Clone, Args)]
#[command(next_help_heading = "Display")]
pub struct Verbosity {
    /// Set the minimum log level.
    ///
    /// -v      Errors
    /// -vv     Warnings
    /// -vvv    Info
    /// -vvvv   Debug
    /// -vvvvv  Traces (warning: very verbose!)
    #[clap(short, long, action = ArgAction::Count, global = true, default_value_t = 3, verbatim_doc_comment, help_heading = "Display")]
    verbosity: u8,

    /// Silence all log output.
    #[clap(
        long,
        alias = "silent",
        short = 'q',
        global = true,
        help_heading = "Display"
    )]
    quiet: bool,
}

impl Verbosity {
    /// The minimum level to log, `None` when silenced.
    pub fn level(&self) -> Option<Level> {
        if self.quiet {
            return None;
        }

        let level = match self.verbosity.saturating_sub(1) {
            0 => Level::ERROR,
            1 => Level::WARN,
            2 => Level::INFO,
            3 => Level::DEBUG,
            _ => Level::TRACE,
        };

        Some(level)
    }

    /// Get the corresponding [Directive] for the given verbosity, or one that
    /// turns everything off if the verbosity corresponds to silent.
    pub fn directive(&self) -> Result<Directive, ParseError> {
        match self.level() {
            Some(level) => format!("dex_stream={level}").parse(),
            None => Ok(LevelFilter::OFF.into()),
        }
    }
}
