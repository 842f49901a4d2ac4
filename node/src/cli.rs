//! # CLI Interface
//!
//! Defines the command-line argument structure for `hm-node` using `clap`
//! derive. Subcommands: `init`, `run`, `link`, and `version`.

use clap::{Parser, Subcommand};
use libp2p::Multiaddr;
use std::path::PathBuf;

/// Local hypermedia identity agent.
///
/// Holds one account's key, stores its blobs, and acts as the Initiator
/// when linking a new device to the account.
#[derive(Parser, Debug)]
#[command(
    name = "hm-node",
    about = "Local hypermedia identity agent",
    version,
    propagate_version = true
)]
pub struct HmNodeCli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the data directory and a new account.
    Init(InitArgs),
    /// Start the agent: HTTP API, device-link listener and metrics.
    Run(RunArgs),
    /// Join another agent's account using a device-link session.
    Link(LinkArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `init` subcommand.
#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Directory holding the key store and blockstore.
    #[arg(long, short = 'd', env = "HM_DATA_DIR", default_value = "./hm-data")]
    pub data_dir: PathBuf,

    /// Display name written to the account's home document.
    #[arg(long, default_value = "My Account")]
    pub name: String,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    #[arg(long, short = 'd', env = "HM_DATA_DIR", default_value = "./hm-data")]
    pub data_dir: PathBuf,

    /// Port for the HTTP API.
    #[arg(long, env = "HM_API_PORT", default_value_t = 56001)]
    pub api_port: u16,

    /// Port for incoming device-link streams.
    #[arg(long, env = "HM_P2P_PORT", default_value_t = 56000)]
    pub p2p_port: u16,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "HM_METRICS_PORT", default_value_t = 56002)]
    pub metrics_port: u16,

    /// Log output format: `pretty` or `json`.
    #[arg(long, env = "HM_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,

    /// Extra multiaddrs advertised in device-link sessions, comma-separated.
    /// Useful behind NAT or port forwarding.
    #[arg(long, env = "HM_EXTERNAL_ADDRS", value_delimiter = ',')]
    pub external_addrs: Vec<Multiaddr>,
}

/// Arguments for the `link` subcommand.
#[derive(Parser, Debug)]
pub struct LinkArgs {
    #[arg(long, short = 'd', env = "HM_DATA_DIR", default_value = "./hm-data")]
    pub data_dir: PathBuf,

    /// The session JSON shown by the Initiator
    /// (`{"accountId", "secretToken", "addrInfo"}`).
    #[arg(long)]
    pub session: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli_structure() {
        HmNodeCli::command().debug_assert();
    }

    #[test]
    fn run_defaults() {
        let cli = HmNodeCli::parse_from(["hm-node", "run"]);
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.api_port, 56001);
                assert_eq!(args.p2p_port, 56000);
                assert_eq!(args.log_format, "pretty");
                assert!(args.external_addrs.is_empty());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn external_addrs_are_parsed() {
        let cli = HmNodeCli::parse_from([
            "hm-node",
            "run",
            "--external-addrs",
            "/ip4/203.0.113.7/tcp/56000,/dns4/home.example/tcp/56000",
        ]);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.external_addrs.len(), 2);
        assert_eq!(args.external_addrs[1].to_string(), "/dns4/home.example/tcp/56000");

        assert!(HmNodeCli::try_parse_from(["hm-node", "run", "--external-addrs", "nope"]).is_err());
    }
}
