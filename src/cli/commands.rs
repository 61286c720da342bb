use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Process flags; each one overrides the config file and environment
#[derive(Debug, Parser)]
#[command(name = "lnshell", version, about = "Interactive Lightning node shell")]
pub struct Opt {
    #[arg(long, help = "Node home directory (database, seed, config.toml)")]
    pub home: Option<PathBuf>,
    #[arg(long, help = "bitcoin, testnet, signet or regtest")]
    pub network: Option<String>,
    #[arg(long = "chain-url", help = "Esplora base URL of the chain source")]
    pub chain_url: Option<String>,
    #[arg(long, help = "Address for the inbound peer server, e.g. 0.0.0.0:9735")]
    pub listen: Option<String>,
}

/// One line typed at the shell prompt
#[derive(Debug, Parser)]
#[command(
    name = "lnshell",
    no_binary_name = true,
    disable_help_subcommand = true,
    disable_version_flag = true
)]
pub struct ShellLine {
    #[command(subcommand)]
    pub command: ShellCommand,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum ShellCommand {
    #[command(name = "help", about = "List the available commands")]
    Help,
    #[command(name = "connectpeer", about = "Connect to a peer and wait for its handshake")]
    ConnectPeer {
        #[arg(long, help = "Peer node id (33-byte compressed pubkey, hex)")]
        pubkey: String,
        #[arg(long, help = "Peer host or IP address")]
        ip: String,
        #[arg(long, help = "Peer port")]
        port: u16,
    },
    #[command(name = "listpeers", about = "List connected peers")]
    ListPeers,
    #[command(name = "openchannel", about = "Open a channel with a connected peer")]
    OpenChannel {
        #[arg(long, help = "Counterparty node id")]
        pubkey: String,
        #[arg(long = "channelvalue", help = "Channel value in millisatoshis")]
        channel_value: u64,
        #[arg(long = "pushamount", help = "Amount pushed to the counterparty in millisatoshis")]
        push_amount: u64,
        #[arg(long = "userchannelID", help = "Caller-chosen id for this request")]
        user_channel_id: u64,
    },
    #[command(name = "getblockinfo", about = "Show the chain tip")]
    GetBlockInfo,
    #[command(name = "getnodeinfo", about = "Show network, node id and peer count")]
    GetNodeInfo,
    #[command(name = "listpending", about = "List recorded funding attempts")]
    ListPending,
    #[command(
        name = "resumefunding",
        about = "Hand off a stored funding transaction whose first handoff was lost"
    )]
    ResumeFunding {
        #[arg(long = "tempchannelID", help = "Temporary channel id (hex)")]
        temp_channel_id: String,
    },
    #[command(name = "getnewaddress", about = "Show the wallet receive address")]
    GetNewAddress,
    #[command(name = "getbalance", about = "Sync the wallet and show its balance")]
    GetBalance,
    #[command(name = "shutdown", about = "Announce that the node is going down")]
    Shutdown,
    #[command(name = "exit", about = "Leave the shell and stop the process")]
    Exit,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    fn parse(line: &str) -> Result<ShellCommand, clap::Error> {
        ShellLine::try_parse_from(line.split_whitespace()).map(|l| l.command)
    }

    #[test]
    fn test_parse_openchannel() {
        let command = parse(
            "openchannel --pubkey 02aa --channelvalue 100000 --pushamount 0 --userchannelID 42",
        )
        .unwrap();
        assert_eq!(
            command,
            ShellCommand::OpenChannel {
                pubkey: "02aa".to_string(),
                channel_value: 100_000,
                push_amount: 0,
                user_channel_id: 42,
            }
        );
    }

    #[test]
    fn test_usage_errors() {
        let err = parse("frobnicate").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidSubcommand);

        let err = parse("connectpeer --pubkey 02aa --ip 127.0.0.1").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
        assert!(err.to_string().contains("--port"));

        let err = parse("connectpeer --pubkey 02aa --ip 127.0.0.1 --port 99999").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueValidation);
        assert!(err.to_string().contains("--port"));
    }

    #[test]
    fn test_opt_flags() {
        let opt = Opt::try_parse_from(["lnshell", "--network", "regtest", "--listen", "127.0.0.1:9735"])
            .unwrap();
        assert_eq!(opt.network.as_deref(), Some("regtest"));
        assert_eq!(opt.listen.as_deref(), Some("127.0.0.1:9735"));
        assert!(opt.home.is_none());
    }
}
