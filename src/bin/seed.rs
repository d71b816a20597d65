//! Lists the showcase models on the configured marketplace contract

use anyhow::{Context, Result};
use clap::Parser;
use ethers::providers::Middleware;
use lunar_vault::config::VaultConfig;
use lunar_vault::format::strip_scheme;
use lunar_vault::marketplace::{EthersMarketplace, MarketplaceContract, showcase_models};
use std::collections::HashSet;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "lunar-vault-seed")]
#[command(about = "List the showcase models on the marketplace contract", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Sender account; defaults to the node's first unlocked account
    #[arg(long)]
    from: Option<String>,

    /// Override the contract address from config
    #[arg(long)]
    contract: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(&args.log_level)
        .init();

    let mut config = VaultConfig::load(args.config)?;
    if let Some(address) = args.contract {
        config.contract.address = Some(address);
    }
    config.validate()?;

    let address = config
        .contract
        .address
        .clone()
        .context("No contract address configured (LUNAR_VAULT_CONTRACT_ADDRESS)")?;

    let marketplace = EthersMarketplace::new(
        &config.contract.rpc_url,
        &address,
        config.contract.poll_interval(),
        config.contract.confirmation_max_attempts,
    )?;

    let from = match args.from {
        Some(from) => from,
        None => {
            let accounts = marketplace
                .provider()
                .get_accounts()
                .await
                .context("Failed to query node accounts")?;
            let first = accounts
                .first()
                .context("Node exposes no accounts; pass --from")?;
            format!("{:?}", first)
        }
    };

    tracing::info!(contract = %address, from = %from, "Seeding marketplace");

    let count = marketplace.model_count().await?;
    let mut listed = HashSet::new();
    for index in 0..count {
        let hash = marketplace.model_hash_at(index).await?;
        listed.insert(strip_scheme(&hash).to_string());
    }

    let mut seeded = 0usize;
    for model in showcase_models() {
        if listed.contains(strip_scheme(&model.content_hash)) {
            tracing::info!(model = %model.name, "Already listed, skipping");
            continue;
        }

        let tx_hash = marketplace
            .list_model(&from, &model.content_hash, &model.name, model.price_wei)
            .await
            .with_context(|| format!("Failed to list {}", model.name))?;

        tracing::info!(
            model = %model.name,
            price = %model.price,
            tx = %tx_hash,
            "Model listed"
        );
        seeded += 1;
    }

    tracing::info!(seeded, total = marketplace.model_count().await?, "Seeding complete");

    Ok(())
}
