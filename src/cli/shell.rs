use crate::channel::{ChannelOpenOutcome, ChannelOpenRequest, TemporaryChannelId};
use crate::cli::{ShellCommand, ShellLine};
use crate::error::{NodeError, Result};
use crate::node::Node;
use crate::utils::parse_pubkey;
use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use log::{error, info, warn};
use std::any::Any;
use std::fmt::Write as _;
use std::io::{self, BufRead, Write};
use std::panic::{self, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::Arc;
use tokio::runtime::Handle;

const PROMPT: &str = "lnshell> ";

/// Whether the loop keeps reading after a line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellOutcome {
    Continue,
    Exit,
}

/// Read-eval loop over operator commands
///
/// One command runs to completion before the next line is read. A failing or
/// panicking command is reported and the loop carries on.
pub struct CommandShell {
    node: Arc<Node>,
    runtime: Handle,
}

impl CommandShell {
    pub fn new(node: Arc<Node>, runtime: Handle) -> Self {
        CommandShell { node, runtime }
    }

    /// Run until `exit` or end of input
    pub fn run<R: BufRead, W: Write>(&self, input: R, output: &mut W) -> io::Result<ShellOutcome> {
        write!(output, "{PROMPT}")?;
        output.flush()?;
        for line in input.lines() {
            if self.execute_line(&line?, output)? == ShellOutcome::Exit {
                return Ok(ShellOutcome::Exit);
            }
            write!(output, "{PROMPT}")?;
            output.flush()?;
        }
        writeln!(output)?;
        Ok(ShellOutcome::Exit)
    }

    pub fn execute_line<W: Write>(&self, line: &str, output: &mut W) -> io::Result<ShellOutcome> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.is_empty() {
            return Ok(ShellOutcome::Continue);
        }

        let command = match ShellLine::try_parse_from(tokens.iter().copied()) {
            Ok(parsed) => parsed.command,
            Err(e) => {
                match e.kind() {
                    ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {}
                    _ => warn!("Rejected input {line:?}: {}", e.kind()),
                }
                write!(output, "{}", e.render())?;
                return Ok(ShellOutcome::Continue);
            }
        };

        let result = panic::catch_unwind(AssertUnwindSafe(|| self.dispatch(command)));
        let (text, outcome) = match result {
            Ok(Ok(done)) => done,
            Ok(Err(e)) => {
                error!("Command {:?} failed: {e}", tokens[0]);
                (format!("Error: {e}"), ShellOutcome::Continue)
            }
            Err(payload) => {
                let reason = panic_message(payload.as_ref());
                error!("Command {:?} panicked: {reason}", tokens[0]);
                (
                    format!("Internal error while running {}: {reason}", tokens[0]),
                    ShellOutcome::Continue,
                )
            }
        };
        writeln!(output, "{text}")?;
        output.flush()?;
        Ok(outcome)
    }

    fn dispatch(&self, command: ShellCommand) -> Result<(String, ShellOutcome)> {
        let node = &self.node;
        let text = match command {
            ShellCommand::Help => ShellLine::command().render_help().to_string(),
            ShellCommand::ConnectPeer { pubkey, ip, port } => {
                self.runtime
                    .block_on(node.controller.connect_peer(&pubkey, &ip, port))?;
                format!("Connected to {pubkey}@{ip}:{port}")
            }
            ShellCommand::ListPeers => {
                let peers = node.controller.list_peers();
                if peers.is_empty() {
                    "No connected peers".to_string()
                } else {
                    peers.join("\n")
                }
            }
            ShellCommand::OpenChannel {
                pubkey,
                channel_value,
                push_amount,
                user_channel_id,
            } => {
                let counterparty = parse_pubkey(&pubkey)
                    .map_err(|e| NodeError::Usage(format!("--pubkey: {e}")))?;
                let request = ChannelOpenRequest {
                    counterparty,
                    channel_value_msat: channel_value,
                    push_amount_msat: push_amount,
                    user_channel_id,
                };
                let outcome = self
                    .runtime
                    .block_on(node.orchestrator.open_channel(&request))?;
                describe_outcome("Channel accepted", &outcome)
            }
            ShellCommand::GetBlockInfo => {
                let info = self.runtime.block_on(node.controller.block_info())?;
                format!("Latest block: {} at height {}", info.hash, info.height)
            }
            ShellCommand::GetNodeInfo => {
                let status = node.controller.node_status();
                let inbound = match node.listen_addr {
                    Some(addr) => format!("listening on {addr}"),
                    None => "disabled".to_string(),
                };
                format!(
                    "Node Status: running\nNetwork: {}\nNode id: {}\nConnected peers: {}\nInbound peers: {inbound}",
                    status.network_name, status.node_id, status.peer_count
                )
            }
            ShellCommand::ListPending => {
                let records = node.orchestrator.pending()?;
                if records.is_empty() {
                    "No funding records".to_string()
                } else {
                    let mut text = String::new();
                    for record in records {
                        let _ = write!(
                            text,
                            "{} {} user_channel_id={} value={}msat push={}msat",
                            record.temporary_channel_id,
                            record.state,
                            record.user_channel_id,
                            record.channel_value_msat,
                            record.push_amount_msat
                        );
                        if let Some(txid) = &record.funding_txid {
                            let _ = write!(text, " funding_txid={txid}");
                        }
                        if let Some(channel_id) = &record.channel_id {
                            let _ = write!(text, " channel_id={channel_id}");
                        }
                        text.push('\n');
                    }
                    text.trim_end().to_string()
                }
            }
            ShellCommand::ResumeFunding { temp_channel_id } => {
                let id = TemporaryChannelId::from_str(&temp_channel_id)?;
                let outcome = self.runtime.block_on(node.orchestrator.resume(&id))?;
                describe_outcome("Funding handed off", &outcome)
            }
            ShellCommand::GetNewAddress => node.wallet.receive_address(),
            ShellCommand::GetBalance => {
                let balance = self.runtime.block_on(node.wallet.balance())?;
                format!(
                    "Confirmed: {} sat\nUnconfirmed: {} sat\nReserved: {} sat",
                    balance.confirmed_sat, balance.unconfirmed_sat, balance.reserved_sat
                )
            }
            ShellCommand::Shutdown => {
                info!("Shutdown requested from the shell");
                "Shutdown requested; stop the peer server and type `exit` to leave".to_string()
            }
            ShellCommand::Exit => {
                return Ok(("Shutting down".to_string(), ShellOutcome::Exit));
            }
        };
        Ok((text, ShellOutcome::Continue))
    }
}

fn describe_outcome(headline: &str, outcome: &ChannelOpenOutcome) -> String {
    format!(
        "{headline}: channel {} ({})\nTemporary channel id: {}\nFunding txid: {}",
        outcome.channel_id, outcome.state, outcome.temporary_channel_id, outcome.funding_txid
    )
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
