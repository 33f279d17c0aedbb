use anyhow::{bail, Context};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use hdsync_storage::{MemoryStore, SledStore, WalletStore};
use hdsync_types::{encode_address, HdAccountId, HdAccountIx, HdAddressIx, ResolvedBlock, WalletId};
use serde_json::json;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use crate::applier::BlockApplier;
use crate::config::{init_logging, StoreBackend, SyncConfig};
use crate::crypto::{derive_address, Credential};
use crate::keystore::{FileKeystore, KeyFile, Keystore};

/// Wallet synchronisation CLI
#[derive(Parser, Debug)]
#[command(name = "hdsync-wallet")]
#[command(about = "Apply blocks and chain switches to local HD wallet state")]
#[command(version)]
pub struct Cli {
    /// Optional TOML configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the configured data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Override the configured keystore directory
    #[arg(long, global = true)]
    pub keystore_dir: Option<PathBuf>,

    /// Override the configured store backend
    #[arg(long, global = true, value_enum)]
    pub backend: Option<BackendArg>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum BackendArg {
    Memory,
    Sled,
}

impl From<BackendArg> for StoreBackend {
    fn from(value: BackendArg) -> Self {
        match value {
            BackendArg::Memory => StoreBackend::Memory,
            BackendArg::Sled => StoreBackend::Sled,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate a wallet root, store its key and register it with the store
    NewWallet(NewWalletArgs),
    /// Apply a JSON array of resolved blocks, oldest first
    Apply(BlocksArgs),
    /// Roll back blocks and apply a replacement fork atomically
    SwitchFork(SwitchForkArgs),
    /// Show the chain tip and per-account balances
    Status(StatusArgs),
    /// Print the HD address at an account/address index
    DeriveAddress(DeriveAddressArgs),
}

#[derive(Args, Debug)]
pub struct NewWalletArgs {
    /// Human-readable wallet name
    #[arg(long)]
    pub name: String,

    /// Number of accounts to create up front
    #[arg(long, default_value_t = 1)]
    pub accounts: u32,

    /// Optional free-form notes embedded in the key metadata
    #[arg(long)]
    pub notes: Option<String>,
}

#[derive(Args, Debug)]
pub struct BlocksArgs {
    /// File holding a JSON array of resolved blocks
    #[arg(long)]
    pub blocks: PathBuf,
}

#[derive(Args, Debug)]
pub struct SwitchForkArgs {
    /// Number of applied blocks to discard
    #[arg(long)]
    pub rollback: usize,

    #[command(flatten)]
    pub fork: BlocksArgs,
}

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON instead of human-friendly text
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct DeriveAddressArgs {
    /// Wallet id (hex)
    #[arg(long)]
    pub wallet: String,

    #[arg(long, default_value_t = 0)]
    pub account: u32,

    #[arg(long, default_value_t = 0)]
    pub index: u32,
}

/// Entrypoint invoked by `src/bin/hdsync-wallet.rs`.
pub fn run_cli() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = resolve_config(&cli)?;
    init_logging(&config)?;

    let store = open_store(&config)?;
    let keystore = Arc::new(
        FileKeystore::open(&config.keystore_dir)
            .with_context(|| format!("opening keystore {}", config.keystore_dir.display()))?,
    );

    match cli.command {
        Commands::NewWallet(args) => handle_new_wallet(store.as_ref(), &keystore, args),
        Commands::Apply(args) => handle_apply(BlockApplier::new(store, keystore), args),
        Commands::SwitchFork(args) => handle_switch_fork(BlockApplier::new(store, keystore), args),
        Commands::Status(args) => handle_status(store.as_ref(), args),
        Commands::DeriveAddress(args) => handle_derive_address(&keystore, args),
    }
}

fn resolve_config(cli: &Cli) -> anyhow::Result<SyncConfig> {
    let mut config = SyncConfig::load(cli.config.as_deref())?;
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    if let Some(dir) = &cli.keystore_dir {
        config.keystore_dir = dir.clone();
    }
    if let Some(backend) = cli.backend {
        config.store_backend = backend.into();
    }
    Ok(config)
}

fn open_store(config: &SyncConfig) -> anyhow::Result<Arc<dyn WalletStore>> {
    Ok(match config.store_backend {
        StoreBackend::Memory => Arc::new(MemoryStore::with_policy(config.retention())),
        StoreBackend::Sled => Arc::new(
            SledStore::new(&config.data_dir, config.retention())
                .with_context(|| format!("opening store {}", config.data_dir.display()))?,
        ),
    })
}

fn read_blocks(args: &BlocksArgs) -> anyhow::Result<Vec<ResolvedBlock>> {
    let data = fs::read(&args.blocks)
        .with_context(|| format!("reading blocks from {}", args.blocks.display()))?;
    let blocks: Vec<ResolvedBlock> = serde_json::from_slice(&data)
        .with_context(|| format!("parsing blocks from {}", args.blocks.display()))?;
    Ok(blocks)
}

fn parse_wallet(text: &str) -> anyhow::Result<WalletId> {
    WalletId::from_hex(text).with_context(|| format!("invalid wallet id {text}"))
}

fn handle_new_wallet(
    store: &dyn WalletStore,
    keystore: &FileKeystore,
    args: NewWalletArgs,
) -> anyhow::Result<()> {
    if args.accounts == 0 {
        bail!("a wallet needs at least one account");
    }
    let credential = Credential::generate();
    let wallet = credential.wallet_id();
    KeyFile::from_credential(&credential, args.notes).save(&keystore.key_path(&wallet), false)?;

    store.create_wallet(wallet, &args.name)?;
    for ix in 0..args.accounts {
        store.create_account(HdAccountId::new(wallet, ix), &format!("{} #{ix}", args.name))?;
    }

    println!("✅ Wallet created");
    println!("   Wallet id: {wallet}");
    println!("   Accounts: {}", args.accounts);
    println!("   Key file: {}", keystore.key_path(&wallet).display());
    println!("   Tip: {}", store.tip()?);
    Ok(())
}

fn handle_apply(applier: BlockApplier, args: BlocksArgs) -> anyhow::Result<()> {
    let blocks = read_blocks(&args)?;
    let applied = applier.apply_blocks(&blocks)?;
    match applied {
        Some(slot) => println!("✅ Applied {} blocks, tip {slot}", blocks.len()),
        None => println!("No blocks to apply"),
    }
    Ok(())
}

fn handle_switch_fork(applier: BlockApplier, args: SwitchForkArgs) -> anyhow::Result<()> {
    let fork = read_blocks(&args.fork)?;
    applier
        .switch_to_fork(args.rollback, &fork)
        .with_context(|| format!("switching to fork after rolling back {}", args.rollback))?;
    println!(
        "✅ Switched fork: rolled back {}, applied {}, tip {}",
        args.rollback,
        fork.len(),
        applier.store().tip()?
    );
    Ok(())
}

fn handle_status(store: &dyn WalletStore, args: StatusArgs) -> anyhow::Result<()> {
    let tip = store.tip()?;
    let max_rollback = store.max_rollback()?;
    let mut wallets = Vec::new();
    for wallet in store.wallet_ids()? {
        let accounts: Vec<_> = store
            .accounts_of(&wallet)?
            .into_iter()
            .map(|account| {
                json!({
                    "account": account.id.to_string(),
                    "name": account.name,
                    "balance": account.balance().atomic(),
                    "utxo_count": account.utxo().len(),
                    "checkpoints": account.checkpoints().len(),
                })
            })
            .collect();
        wallets.push(json!({ "wallet": wallet.to_hex(), "accounts": accounts }));
    }

    if args.json {
        let payload = json!({ "tip": tip, "max_rollback": max_rollback, "wallets": wallets });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        println!("Tip: {tip}");
        println!("Max rollback: {max_rollback}");
        for wallet in &wallets {
            println!("Wallet {}", wallet["wallet"].as_str().unwrap_or_default());
            for account in wallet["accounts"].as_array().into_iter().flatten() {
                println!(
                    "   {} balance {}",
                    account["account"].as_str().unwrap_or_default(),
                    account["balance"]
                );
            }
        }
    }
    Ok(())
}

fn handle_derive_address(keystore: &FileKeystore, args: DeriveAddressArgs) -> anyhow::Result<()> {
    let wallet = parse_wallet(&args.wallet)?;
    let Some(credential) = keystore.load(&wallet)? else {
        bail!("no key file for wallet {wallet} in {}", keystore.dir().display());
    };
    let address = derive_address(&credential, HdAccountIx(args.account), HdAddressIx(args.index))?;
    println!("{}", encode_address(&address));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_switch_fork() {
        let cli = Cli::try_parse_from([
            "hdsync-wallet",
            "--backend",
            "memory",
            "switch-fork",
            "--rollback",
            "2",
            "--blocks",
            "fork.json",
        ])
        .unwrap();
        assert!(matches!(cli.backend, Some(BackendArg::Memory)));
        match cli.command {
            Commands::SwitchFork(args) => {
                assert_eq!(args.rollback, 2);
                assert_eq!(args.fork.blocks, PathBuf::from("fork.json"));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_rejects_unknown_subcommand() {
        assert!(Cli::try_parse_from(["hdsync-wallet", "send-payment"]).is_err());
    }
}
