//! Tidepool - Uniswap V3 Pool Operations Toolkit
//!
//! Quote swaps across fee tiers, execute exact-input swaps with real
//! slippage protection, inspect pool state, and plan liquidity positions.
//!
//! Run with: cargo run -- <command>

use alloy_primitives::{Address, U256};
use clap::{Parser, Subcommand};
use color_eyre::eyre::{eyre, Result};
use console::style;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod chain;
mod config;
mod executor;
mod gas;
mod liquidity;
mod price;
mod quoter;
mod ticks;

use chain::{ChainClient, FeeSource, PoolReader, WalletManager};
use config::Config;
use executor::{SwapExecutor, SwapOutcome, SwapReport, SwapRequest};
use quoter::{select_viable_tier, FeeTier, RouterQuoter};

// ============================================
// CLI
// ============================================

#[derive(Parser)]
#[command(name = "tidepool", about = "Uniswap V3 pool operations toolkit")]
struct Cli {
    /// Path to a TOML config file (environment variables otherwise)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Simulate a swap and print the best quote across fee tiers
    Quote {
        #[arg(long)]
        token_in: Address,
        #[arg(long)]
        token_out: Address,
        /// Input amount in the token's raw units
        #[arg(long)]
        amount: U256,
        /// Pin one fee tier in factory units (500, 3000, 10000)
        #[arg(long)]
        fee: Option<u32>,
    },

    /// Execute an exact-input swap through the router
    Swap {
        #[arg(long)]
        token_in: Address,
        #[arg(long)]
        token_out: Address,
        /// Input amount in the token's raw units
        #[arg(long)]
        amount: U256,
        /// Slippage tolerance in basis points (config default otherwise)
        #[arg(long)]
        slippage_bps: Option<u32>,
        /// Pin one fee tier instead of scanning cheapest-first
        #[arg(long)]
        fee: Option<u32>,
    },

    /// Show a pool's current price, tick, and liquidity
    PoolInfo {
        #[arg(long)]
        pool: Address,
        #[arg(long, default_value_t = 18)]
        decimals0: u8,
        #[arg(long, default_value_t = 18)]
        decimals1: u8,
    },

    /// Plan a liquidity position around a pool's current tick
    PlanLiquidity {
        #[arg(long)]
        pool: Address,
        /// Token0 to supply, in raw units
        #[arg(long)]
        amount0: U256,
        /// Token1 per token0 in whole-token terms
        #[arg(long)]
        price_ratio: f64,
        /// Half-width of the range in ticks
        #[arg(long, default_value_t = 3000)]
        width: i32,
    },

    /// Compute the sqrtPriceX96 to initialize a pool at a decimal price
    InitPrice {
        #[arg(long)]
        price: f64,
        #[arg(long, default_value_t = 18)]
        decimals0: u8,
        #[arg(long, default_value_t = 18)]
        decimals1: u8,
    },
}

fn print_banner() {
    println!();
    println!(
        "{}",
        style("═══════════════════════════════════════════════════════════════").cyan()
    );
    println!(
        "{}",
        style(" 🌊 TIDEPOOL - Uniswap V3 Pool Operations").cyan().bold()
    );
    println!(
        "{}",
        style("    Quotes | Swaps | Pool State | Liquidity Planning").cyan()
    );
    println!(
        "{}",
        style("═══════════════════════════════════════════════════════════════").cyan()
    );
    println!();
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Resolve the candidate tiers: one pinned tier, or the cheapest-first scan
fn candidate_tiers(fee: Option<u32>) -> Result<Vec<FeeTier>> {
    match fee {
        Some(units) => {
            let tier = FeeTier::from_fee_units(units)
                .ok_or_else(|| eyre!("unknown fee tier: {units} (use 500, 3000, or 10000)"))?;
            Ok(vec![tier])
        }
        None => Ok(FeeTier::cheapest_first().to_vec()),
    }
}

// ============================================
// COMMANDS
// ============================================

async fn run_quote(
    config: &Config,
    token_in: Address,
    token_out: Address,
    amount: U256,
    fee: Option<u32>,
) -> Result<()> {
    let quoter = RouterQuoter::new(config.rpc_url.clone(), config.factory()?, config.quoter()?);
    let candidates = candidate_tiers(fee)?;

    match select_viable_tier(&quoter, token_in, token_out, amount, &candidates).await {
        Ok(quote) => {
            println!(
                "{} {} tier: {} in → {} out (≈{} gas)",
                style("✓").green(),
                style(quote.fee_tier).cyan().bold(),
                quote.amount_in,
                quote.amount_out,
                quote.gas_estimate
            );
        }
        Err(no_tier) => {
            println!(
                "{} No viable fee tier (tried {:?})",
                style("✗").red(),
                no_tier.attempted
            );
        }
    }
    Ok(())
}

async fn run_swap(
    config: &Config,
    token_in: Address,
    token_out: Address,
    amount: U256,
    slippage_bps: Option<u32>,
    fee: Option<u32>,
) -> Result<()> {
    let wallet = WalletManager::from_env(&config.wallet_key_env, config.chain_id)?;
    let chain = ChainClient::new(
        config.rpc_url.clone(),
        wallet,
        config.etherscan_api_key.clone(),
    )?;
    let quoter = RouterQuoter::new(config.rpc_url.clone(), config.factory()?, config.quoter()?);
    let router = config.router()?;
    let sender = chain.sender();

    // Refuse to trade into a gas spike
    let fees = chain.fee_data().await?;
    let base_gwei = fees.base_fee_per_gas / 1_000_000_000;
    if base_gwei > config.max_gas_gwei as u128 {
        return Err(eyre!(
            "base fee {base_gwei} gwei exceeds MAX_GAS_GWEI {}",
            config.max_gas_gwei
        ));
    }

    let slippage_bps = slippage_bps.unwrap_or(config.default_slippage_bps);
    let request = SwapRequest {
        token_in,
        token_out,
        amount_in: amount,
        slippage_bps,
        recipient: sender,
        deadline: unix_now() + config.deadline_secs,
    };
    let candidates = candidate_tiers(fee)?;

    warn!("⚠️  Executing a swap with real funds on chain {}", config.chain_id);

    let executor = SwapExecutor::new(&chain, &quoter, router, sender, config.confirm_timeout());
    let outcome = executor.execute(request.clone(), &candidates).await?;

    match &outcome {
        SwapOutcome::Success { tx_hash, amount_out } => {
            println!(
                "{} Swap confirmed: {:?} (≥{} out after slippage floor, quoted {})",
                style("✓").green().bold(),
                tx_hash,
                request.min_amount_out(*amount_out),
                amount_out
            );
        }
        SwapOutcome::QuoteFailed { fee_tier } => {
            println!("{} The {} tier could not quote this swap", style("✗").red(), fee_tier);
        }
        SwapOutcome::InsufficientBalance => {
            println!("{} Balance below the requested input amount", style("✗").red());
        }
        SwapOutcome::InsufficientLiquidity => {
            println!("{} No fee tier has liquidity for this pair", style("✗").red());
        }
        SwapOutcome::Reverted { reason } => {
            println!("{} Swap reverted: {}", style("✗").red(), reason);
        }
        SwapOutcome::Timeout { tx_hash } => {
            println!(
                "{} Not confirmed in time - transaction {:?} may still land; re-query before retrying",
                style("⏳").yellow(),
                tx_hash
            );
        }
    }

    if config.report_log {
        let report =
            SwapReport::from_outcome(token_in, token_out, amount, slippage_bps, &outcome);
        report.append_to_file(&config.report_log_path)?;
        info!("Report appended to {}", config.report_log_path);
    }

    Ok(())
}

async fn run_pool_info(
    config: &Config,
    pool: Address,
    decimals0: u8,
    decimals1: u8,
) -> Result<()> {
    // Read-only command: a throwaway key is fine, nothing is signed
    let wallet = WalletManager::from_env(&config.wallet_key_env, config.chain_id).or_else(|_| {
        WalletManager::new(
            "0000000000000000000000000000000000000000000000000000000000000001",
            config.chain_id,
        )
    })?;
    let chain = ChainClient::new(config.rpc_url.clone(), wallet, None)?;

    let state = chain.pool_state(pool).await?;
    if !state.is_initialized() {
        println!(
            "{} Pool exists but is not initialized (sqrtPriceX96 == 0)",
            style("✗").yellow()
        );
        return Ok(());
    }

    let decimal_price = price::to_decimal_price(state.sqrt_price_x96, decimals0, decimals1)
        .map_err(|e| eyre!("{e}"))?;

    println!("{} Pool {:?}", style("✓").green(), pool);
    println!("   sqrtPriceX96: {}", state.sqrt_price_x96);
    println!("   Price:        {:.6} token1/token0", decimal_price);
    println!("   Tick:         {}", state.tick);
    println!("   Liquidity:    {}", state.liquidity);
    println!("   Tick spacing: {}", state.tick_spacing);
    Ok(())
}

async fn run_plan_liquidity(
    config: &Config,
    pool: Address,
    amount0: U256,
    price_ratio: f64,
    width: i32,
) -> Result<()> {
    let wallet = WalletManager::from_env(&config.wallet_key_env, config.chain_id)?;
    let chain = ChainClient::new(config.rpc_url.clone(), wallet, None)?;

    let state = chain.pool_state(pool).await?;
    let plan = liquidity::plan(&state, amount0, price_ratio, width).map_err(|e| eyre!("{e}"))?;

    println!("{} Liquidity plan for pool {:?}", style("✓").green(), pool);
    println!("   Tick range: [{}, {}]", plan.tick_lower, plan.tick_upper);
    println!("   Amount0:    {} (maximum)", plan.amount0);
    println!("   Amount1:    {} (maximum)", plan.amount1);
    println!(
        "   Mint via the position manager at {}",
        config.position_manager_address
    );
    Ok(())
}

fn run_init_price(price: f64, decimals0: u8, decimals1: u8) -> Result<()> {
    let sqrt_price = price::from_decimal_price(price, decimals0, decimals1)
        .map_err(|e| eyre!("{e}"))?;
    println!(
        "{} Initialize the pool with sqrtPriceX96 = {}",
        style("✓").green(),
        sqrt_price
    );
    Ok(())
}

// ============================================
// ENTRY POINT
// ============================================

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("tidepool=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    print_banner();

    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        error!("Please check your .env file");
        return Err(e);
    }
    config.print_summary();
    println!();

    match cli.command {
        Command::Quote {
            token_in,
            token_out,
            amount,
            fee,
        } => run_quote(&config, token_in, token_out, amount, fee).await,

        Command::Swap {
            token_in,
            token_out,
            amount,
            slippage_bps,
            fee,
        } => run_swap(&config, token_in, token_out, amount, slippage_bps, fee).await,

        Command::PoolInfo {
            pool,
            decimals0,
            decimals1,
        } => run_pool_info(&config, pool, decimals0, decimals1).await,

        Command::PlanLiquidity {
            pool,
            amount0,
            price_ratio,
            width,
        } => run_plan_liquidity(&config, pool, amount0, price_ratio, width).await,

        Command::InitPrice {
            price,
            decimals0,
            decimals1,
        } => run_init_price(price, decimals0, decimals1),
    }
}
