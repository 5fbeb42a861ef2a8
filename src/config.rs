//! Configuration for Tidepool
//!
//! All runtime parameters: network endpoint, protocol contract addresses,
//! swap defaults, and reporting. Loadable from environment variables (with
//! a .env file) or a TOML file.

use alloy_primitives::Address;
use eyre::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

// ============================================
// PROTOCOL ADDRESSES (Ethereum Mainnet)
// ============================================

/// Uniswap V3 factory
const DEFAULT_FACTORY: &str = "0x1F98431c8aD98523631AE4a59f267346ea31F984";

/// SwapRouter
const DEFAULT_ROUTER: &str = "0xE592427A0AEce92De3Edee1F18E0157C05861564";

/// QuoterV2
const DEFAULT_QUOTER: &str = "0x61fFE014bA17989E743c5F6cB21bF9697530B21e";

/// NonfungiblePositionManager
const DEFAULT_POSITION_MANAGER: &str = "0xC36442b4a4522E871399CD717aBDD847Ab11FE88";

// ============================================
// MAIN CONFIGURATION
// ============================================

/// Main configuration struct for Tidepool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // ========== Network Settings ==========
    /// Primary RPC URL (Alchemy/Infura recommended)
    pub rpc_url: String,

    /// Chain ID (1 = Ethereum Mainnet)
    pub chain_id: u64,

    // ========== Protocol Addresses ==========
    /// Uniswap V3 factory address
    pub factory_address: String,

    /// SwapRouter address (the contract approvals are granted to)
    pub router_address: String,

    /// QuoterV2 address
    pub quoter_address: String,

    /// NonfungiblePositionManager address (liquidity mints)
    pub position_manager_address: String,

    // ========== Swap Settings ==========
    /// Default slippage tolerance in basis points (100 = 1%)
    pub default_slippage_bps: u32,

    /// Seconds ahead of now to set the on-chain swap deadline
    pub deadline_secs: u64,

    /// How long to wait for a swap to confirm before reporting Timeout
    pub confirm_timeout_secs: u64,

    /// Maximum acceptable gas price in gwei
    /// Abort if gas exceeds this (prevents executing during spikes)
    pub max_gas_gwei: u64,

    // ========== Wallet Settings ==========
    /// Environment variable holding the signing key (the key itself is
    /// never stored in config files)
    pub wallet_key_env: String,

    // ========== Reporting ==========
    /// Enable/disable swap report logging
    pub report_log: bool,

    /// Path to the JSON-lines swap report file
    pub report_log_path: String,

    // ========== API Keys ==========
    /// Etherscan API key for the gas oracle fallback
    pub etherscan_api_key: Option<String>,
}

impl Config {
    /// Load configuration from environment variables and .env file
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            // Network
            rpc_url: env::var("RPC_URL").unwrap_or_else(|_| "https://eth.llamarpc.com".to_string()),
            chain_id: env::var("CHAIN_ID")
                .unwrap_or_else(|_| "1".to_string())
                .parse()
                .unwrap_or(1),

            // Protocol addresses
            factory_address: env::var("FACTORY_ADDRESS")
                .unwrap_or_else(|_| DEFAULT_FACTORY.to_string()),
            router_address: env::var("ROUTER_ADDRESS")
                .unwrap_or_else(|_| DEFAULT_ROUTER.to_string()),
            quoter_address: env::var("QUOTER_ADDRESS")
                .unwrap_or_else(|_| DEFAULT_QUOTER.to_string()),
            position_manager_address: env::var("POSITION_MANAGER_ADDRESS")
                .unwrap_or_else(|_| DEFAULT_POSITION_MANAGER.to_string()),

            // Swap settings
            default_slippage_bps: env::var("DEFAULT_SLIPPAGE_BPS")
                .unwrap_or_else(|_| "50".to_string())
                .parse()
                .unwrap_or(50),
            deadline_secs: env::var("DEADLINE_SECS")
                .unwrap_or_else(|_| "600".to_string())
                .parse()
                .unwrap_or(600),
            confirm_timeout_secs: env::var("CONFIRM_TIMEOUT_SECS")
                .unwrap_or_else(|_| "180".to_string())
                .parse()
                .unwrap_or(180),
            max_gas_gwei: env::var("MAX_GAS_GWEI")
                .unwrap_or_else(|_| "50".to_string())
                .parse()
                .unwrap_or(50),

            // Wallet
            wallet_key_env: env::var("WALLET_KEY_ENV")
                .unwrap_or_else(|_| "PRIVATE_KEY".to_string()),

            // Reporting
            report_log: env::var("REPORT_LOG")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .unwrap_or(true),
            report_log_path: env::var("REPORT_LOG_PATH")
                .unwrap_or_else(|_| "./logs/swaps.jsonl".to_string()),

            // API Keys
            etherscan_api_key: env::var("ETHERSCAN_API_KEY").ok(),
        })
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn factory(&self) -> Result<Address> {
        parse_address("factory", &self.factory_address)
    }

    pub fn router(&self) -> Result<Address> {
        parse_address("router", &self.router_address)
    }

    pub fn quoter(&self) -> Result<Address> {
        parse_address("quoter", &self.quoter_address)
    }

    pub fn position_manager(&self) -> Result<Address> {
        parse_address("position manager", &self.position_manager_address)
    }

    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_secs(self.confirm_timeout_secs)
    }

    /// Validate configuration before talking to the network
    pub fn validate(&self) -> Result<()> {
        if self.rpc_url.is_empty() || self.rpc_url.contains("YOUR_API_KEY") {
            return Err(eyre::eyre!(
                "Invalid RPC_URL - please set a valid Alchemy/Infura URL"
            ));
        }

        self.factory()?;
        self.router()?;
        self.quoter()?;
        self.position_manager()?;

        if self.default_slippage_bps > 10_000 {
            return Err(eyre::eyre!(
                "DEFAULT_SLIPPAGE_BPS must be <= 10000 (currently {})",
                self.default_slippage_bps
            ));
        }
        if self.deadline_secs == 0 {
            return Err(eyre::eyre!("DEADLINE_SECS must be positive"));
        }
        if self.confirm_timeout_secs == 0 {
            return Err(eyre::eyre!("CONFIRM_TIMEOUT_SECS must be positive"));
        }

        Ok(())
    }

    /// Print configuration summary
    pub fn print_summary(&self) {
        println!("╔════════════════════════════════════════════════════════════╗");
        println!("║                 TIDEPOOL - CONFIGURATION                   ║");
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║ Chain ID:          {:^40} ║", self.chain_id);
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║ SWAP DEFAULTS                                              ║");
        println!("║ • Slippage:        {:>36} bps ║", self.default_slippage_bps);
        println!("║ • Deadline:        {:>39}s ║", self.deadline_secs);
        println!("║ • Confirm Wait:    {:>39}s ║", self.confirm_timeout_secs);
        println!("║ • Max Gas:         {:>35} gwei ║", self.max_gas_gwei);
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║ GAS ORACLE                                                 ║");
        println!(
            "║ • Etherscan API:   {:^40} ║",
            if self.etherscan_api_key.is_some() {
                "✓ Configured"
            } else {
                "✗ Using RPC"
            }
        );
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║ REPORTING                                                  ║");
        println!(
            "║ • Swap Reports:    {:^40} ║",
            if self.report_log {
                "✓ Enabled"
            } else {
                "✗ Disabled"
            }
        );
        println!("╚════════════════════════════════════════════════════════════╝");
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rpc_url: "https://eth.llamarpc.com".to_string(),
            chain_id: 1,
            factory_address: DEFAULT_FACTORY.to_string(),
            router_address: DEFAULT_ROUTER.to_string(),
            quoter_address: DEFAULT_QUOTER.to_string(),
            position_manager_address: DEFAULT_POSITION_MANAGER.to_string(),
            default_slippage_bps: 50,
            deadline_secs: 600,
            confirm_timeout_secs: 180,
            max_gas_gwei: 50,
            wallet_key_env: "PRIVATE_KEY".to_string(),
            report_log: true,
            report_log_path: "./logs/swaps.jsonl".to_string(),
            etherscan_api_key: None,
        }
    }
}

fn parse_address(label: &str, value: &str) -> Result<Address> {
    Address::from_str(value).map_err(|_| eyre::eyre!("invalid {label} address: {value}"))
}

// ============================================
// TESTS
// ============================================
