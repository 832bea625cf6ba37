use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use coinflip_chain::memory::MemoryChain;
use coinflip_chain::rpc_client::HttpRpc;
use coinflip_chain::{abi, ChainRpc};
use coinflip_ops::{ClientConfig, FlipEngine, FlipEvent, FlipEventHandler};
use coinflip_session::{InjectedWallet, WalletProvider};
use coinflip_tx::Wager;
use coinflip_types::{bytes_to_hex, Address, Side};
use coinflip_units::{parse_ether, short_address};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "coinflip", about = "Bet on a coin flip against the CoinFlip contract", version)]
struct Cli {
    /// JSON config file (missing fields use the Sepolia defaults)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the wallet node's JSON-RPC URL
    #[arg(long, global = true)]
    rpc_url: Option<String>,

    /// Override the contract address
    #[arg(long, global = true)]
    contract: Option<String>,

    /// Override the block explorer base URL
    #[arg(long, global = true)]
    explorer_url: Option<String>,

    /// Log lifecycle events to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Run against an in-process chain with a funded account
    #[arg(long, global = true)]
    simulate: bool,

    /// Result of the next simulated flip
    #[arg(long, global = true, value_enum, default_value = "lose")]
    simulated_outcome: SimulatedOutcome,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Authorize the wallet and show the account and balance
    Connect,
    /// Place a wager
    Flip {
        /// heads or tails
        #[arg(long)]
        side: Side,
        /// Amount in ether, e.g. 0.01
        #[arg(long)]
        amount: String,
    },
    /// Show the contract owner
    Owner,
    /// Withdraw the contract balance (owner only)
    Withdraw,
    /// Print the calldata of a flip without sending it
    Calldata {
        #[arg(long)]
        side: Side,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum SimulatedOutcome {
    Win,
    Lose,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn load_config(cli: &Cli) -> Result<ClientConfig> {
    let mut config = match &cli.config {
        Some(path) => ClientConfig::from_json_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => ClientConfig::default(),
    };
    if let Some(url) = &cli.rpc_url {
        config.rpc_url = url.clone();
    }
    if let Some(contract) = &cli.contract {
        config.contract_address = contract.clone();
    }
    if let Some(url) = &cli.explorer_url {
        config.explorer_url = url.clone();
    }
    if cli.simulate {
        config.confirmation_poll_ms = 10;
        config.outcome_poll_ms = 10;
        config.outcome_grace_ms = 1_000;
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

/// Single funded account that also owns the simulated contract.
fn simulated_chain(config: &ClientConfig, outcome: SimulatedOutcome) -> Result<Arc<dyn ChainRpc>> {
    let contract = config.contract()?;
    let account = Address::repeat_byte(0xa1);
    let chain = MemoryChain::new(config.chain_id, contract, account);
    chain.add_account(account, parse_ether("10").context("simulated balance")?);
    chain.fund_contract(parse_ether("100").context("simulated bank")?);
    chain.push_outcome(matches!(outcome, SimulatedOutcome::Win));
    Ok(Arc::new(chain))
}

fn print_event(event: &FlipEvent) {
    match event {
        FlipEvent::Connected { account, balance } => {
            println!("Connected: {} ({} ETH)", short_address(account), balance);
        }
        FlipEvent::Disconnected => println!("Disconnected"),
        FlipEvent::Submitted { tx_hash, explorer_url } => {
            println!("Transaction: {}", tx_hash);
            println!("  {}", explorer_url);
        }
        FlipEvent::Confirmed { block_number, .. } => {
            println!("Confirmed in block {}", block_number);
        }
        FlipEvent::Outcome { message, amount, .. } => {
            println!("{} ({} ETH)", message, amount);
        }
        FlipEvent::BalanceRefreshed { balance } => println!("Balance: {} ETH", balance),
        FlipEvent::Failed { stage, message } => eprintln!("{} failed: {}", stage, message),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Command::Calldata { side } = &cli.command {
        println!("{}", bytes_to_hex(&abi::encode_flip(*side)));
        return Ok(());
    }

    let config = load_config(&cli)?;
    let rpc: Arc<dyn ChainRpc> = if cli.simulate {
        tracing::info!("using simulated chain");
        simulated_chain(&config, cli.simulated_outcome)?
    } else {
        Arc::new(HttpRpc::new(&config.rpc_url, Some(config.request_timeout_ms)))
    };
    let wallet: Arc<dyn WalletProvider> = Arc::new(InjectedWallet::new(rpc.clone()));

    let handler: FlipEventHandler = Box::new(|event: FlipEvent| print_event(&event));
    let mut engine = FlipEngine::new(config, rpc, Some(wallet), Some(handler))
        .context("initializing client")?;

    match cli.command {
        Command::Connect => {
            engine.connect().await.context("connect")?;
        }
        Command::Flip { side, amount } => {
            engine.connect().await.context("connect")?;
            let report = engine
                .flip(&Wager::new(side, amount))
                .await
                .context("flip")?;
            if report.outcome.is_none() {
                println!("Outcome not observed yet; check the transaction link above.");
            }
        }
        Command::Owner => {
            let owner = engine.contract_owner().await.context("reading owner")?;
            println!("{}", owner.to_checksum(None));
        }
        Command::Withdraw => {
            engine.connect().await.context("connect")?;
            let confirmation = engine.withdraw().await.context("withdraw")?;
            let balance = engine
                .current_balance()
                .await
                .map(|b| b.to_string())
                .unwrap_or_else(|_| "?".into());
            println!(
                "Withdrawn in block {}; balance {} ETH",
                confirmation.block_number, balance
            );
        }
        Command::Calldata { .. } => {}
    }

    Ok(())
}
