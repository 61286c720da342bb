// This is my main entry point for the node shell
// I load the config, start the node, then hand stdin over to the shell
use clap::Parser;
use lnshell::{ChainBackend, CommandShell, Config, ConfigOverrides, Node, Opt};
use log::{error, info, LevelFilter};
use std::io;
use std::process;
use std::sync::Arc;

fn main() {
    // Info level by default; RUST_LOG still wins when I need more detail
    env_logger::builder()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();

    // Process flags are the top config layer
    let opt = Opt::parse();
    let overrides = ConfigOverrides {
        home_dir: opt.home,
        network: opt.network,
        chain_url: opt.chain_url,
        listen: opt.listen,
    };

    if let Err(e) = run(&overrides) {
        error!("Error: {e}");
        process::exit(1);
    }
    process::exit(0);
}

fn run(overrides: &ConfigOverrides) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load(overrides)?;

    // The network side runs on tokio workers; the shell itself stays on this thread
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("lnshell-worker")
        .build()?;

    let backend = ChainBackend::esplora(&config)?;
    let node = runtime.block_on(Node::start(&config, backend))?;
    if let Some(addr) = node.listen_addr {
        info!("Accepting peers on {addr}");
    }
    info!("Using chain source {}", config.chain_source_url);
    println!("Type `help` for the list of commands");

    let shell = CommandShell::new(Arc::new(node), runtime.handle().clone());
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    shell.run(stdin.lock(), &mut stdout)?;
    info!("Shutting down");
    Ok(())
}
