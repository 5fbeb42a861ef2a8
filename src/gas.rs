//! Gas Planning - EIP-1559 Fee Parameters with Safety Margins
//!
//! Two halves:
//! - [`FeeOracle`] fetches current network fee data (RPC first, Etherscan
//!   gas oracle as fallback, fixed conservative default as last resort)
//!   and caches it briefly to stay under rate limits.
//! - [`GasPolicy`] turns a gas estimate plus fee data into a [`GasPlan`]:
//!   the limit multiplier absorbs estimation variance between simulation
//!   and inclusion, the base-fee multiplier absorbs one to two blocks of
//!   base-fee escalation.

use alloy_provider::{Provider, ProviderBuilder};
use eyre::{eyre, Result};
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, trace, warn};

// ============================================
// CONSTANTS
// ============================================

/// Etherscan API base URL (v2 supports multiple chains)
const ETHERSCAN_API_URL: &str = "https://api.etherscan.io/v2/api";

/// Cache duration for fee data (avoid hitting rate limits)
const CACHE_DURATION_SECS: u64 = 10;

/// Timeout for API calls
const API_TIMEOUT_SECS: u64 = 5;

/// Minimum sane base fee (0.01 gwei)
const MIN_FEE_WEI: u128 = 10_000_000;

/// Maximum sane base fee (1000 gwei - extreme congestion)
const MAX_FEE_WEI: u128 = 1_000_000_000_000;

/// Default fallback base fee if all sources fail (20 gwei)
const FALLBACK_BASE_FEE_WEI: u128 = 20_000_000_000;

/// Default fallback priority fee (1.5 gwei)
const FALLBACK_PRIORITY_FEE_WEI: u128 = 1_500_000_000;

/// Gas limit used when estimation itself reverts. Callers must still
/// handle a possible revert at submission time.
pub const FALLBACK_GAS_LIMIT: u64 = 1_000_000;

// ============================================
// FEE DATA
// ============================================

/// Current network fee data, in wei
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeData {
    pub base_fee_per_gas: u128,
    pub priority_fee_per_gas: u128,
}

/// Where a [`FeeData`] sample came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeSourceKind {
    RpcProvider,
    Etherscan,
    Fallback,
}

impl std::fmt::Display for FeeSourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeeSourceKind::RpcProvider => write!(f, "RPC"),
            FeeSourceKind::Etherscan => write!(f, "Etherscan"),
            FeeSourceKind::Fallback => write!(f, "Fallback"),
        }
    }
}

#[derive(Debug, Clone)]
struct CachedFees {
    fees: FeeData,
    source: FeeSourceKind,
    fetched_at: Instant,
}

impl CachedFees {
    fn is_stale(&self) -> bool {
        self.fetched_at.elapsed() > Duration::from_secs(CACHE_DURATION_SECS)
    }
}

// ============================================
// GAS PLAN & POLICY
// ============================================

/// Bounded gas parameters for one transaction attempt. Derived fresh per
/// attempt - fee data is time-sensitive and plans are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasPlan {
    pub gas_limit: u64,
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
}

/// Policy knobs for turning estimates into a [`GasPlan`]
#[derive(Debug, Clone, Copy)]
pub struct GasPolicy {
    /// Gas limit multiplier in percent (120 = +20% buffer)
    pub limit_multiplier_pct: u64,
    /// Base fee multiplier for maxFeePerGas
    pub base_fee_multiplier: u128,
    /// Limit used when gas estimation failed outright
    pub fallback_gas_limit: u64,
}

impl Default for GasPolicy {
    fn default() -> Self {
        Self {
            limit_multiplier_pct: 120,
            base_fee_multiplier: 2,
            fallback_gas_limit: FALLBACK_GAS_LIMIT,
        }
    }
}

impl GasPolicy {
    /// Build a gas plan from an estimate and current fee data.
    ///
    /// gasLimit = estimate * multiplier / 100 (or the fallback when the
    /// simulated call reverted and no estimate exists);
    /// maxFeePerGas = baseFee * multiplier + priorityFee.
    pub fn plan(&self, estimated_gas: Option<u64>, fees: &FeeData) -> GasPlan {
        let gas_limit = match estimated_gas {
            Some(estimate) => estimate
                .saturating_mul(self.limit_multiplier_pct)
                / 100,
            None => {
                debug!(
                    "Gas estimation unavailable, using fallback limit {}",
                    self.fallback_gas_limit
                );
                self.fallback_gas_limit
            }
        };

        let max_fee_per_gas = fees
            .base_fee_per_gas
            .saturating_mul(self.base_fee_multiplier)
            .saturating_add(fees.priority_fee_per_gas);

        GasPlan {
            gas_limit,
            max_fee_per_gas,
            max_priority_fee_per_gas: fees.priority_fee_per_gas,
        }
    }
}

// ============================================
// ETHERSCAN API RESPONSE TYPES
// ============================================

#[derive(Debug, Deserialize)]
struct GasTrackerResponse {
    status: String,
    message: String,
    result: Option<GasTrackerResult>,
}

#[derive(Debug, Deserialize)]
struct GasTrackerResult {
    #[serde(rename = "ProposeGasPrice")]
    propose_gas_price: Option<String>,
    #[serde(rename = "suggestBaseFee")]
    suggest_base_fee: Option<String>,
}

// ============================================
// FEE ORACLE
// ============================================

/// Cached network fee data source
pub struct FeeOracle {
    http_client: Client,
    api_key: Option<String>,
    chain_id: u64,
    rpc_url: String,
    cache: Arc<RwLock<Option<CachedFees>>>,
}

impl FeeOracle {
    pub fn new(api_key: Option<String>, chain_id: u64, rpc_url: String) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(API_TIMEOUT_SECS))
            .build()
            .map_err(|e| eyre!("failed to create HTTP client: {e}"))?;

        Ok(Self {
            http_client,
            api_key,
            chain_id,
            rpc_url,
            cache: Arc::new(RwLock::new(None)),
        })
    }

    /// Get current fee data (with caching)
    pub async fn fee_data(&self) -> FeeData {
        {
            let cache = self.cache.read().await;
            if let Some(ref cached) = *cache {
                if !cached.is_stale() {
                    trace!(
                        "Using cached fee data from {}: base {} wei",
                        cached.source,
                        cached.fees.base_fee_per_gas
                    );
                    return cached.fees;
                }
            }
        }

        let (fees, source) = self.fetch_fees().await;

        {
            let mut cache = self.cache.write().await;
            *cache = Some(CachedFees {
                fees,
                source,
                fetched_at: Instant::now(),
            });
        }

        fees
    }

    /// Fetch fee data (RPC first, then Etherscan, then fallback)
    async fn fetch_fees(&self) -> (FeeData, FeeSourceKind) {
        match self.fetch_from_rpc().await {
            Ok(fees) => {
                debug!(
                    "⛽ Fees from RPC: base {} wei, priority {} wei",
                    fees.base_fee_per_gas, fees.priority_fee_per_gas
                );
                return (fees, FeeSourceKind::RpcProvider);
            }
            Err(e) => {
                warn!("RPC fee fetch failed: {}", e);
            }
        }

        if let Some(ref api_key) = self.api_key {
            match self.fetch_from_etherscan(api_key).await {
                Ok(fees) => {
                    debug!(
                        "⛽ Fees from Etherscan: base {} wei, priority {} wei",
                        fees.base_fee_per_gas, fees.priority_fee_per_gas
                    );
                    return (fees, FeeSourceKind::Etherscan);
                }
                Err(e) => {
                    warn!("Etherscan fee fetch failed: {}", e);
                }
            }
        }

        warn!(
            "Using fallback fee data: base {} wei",
            FALLBACK_BASE_FEE_WEI
        );
        (
            FeeData {
                base_fee_per_gas: FALLBACK_BASE_FEE_WEI,
                priority_fee_per_gas: FALLBACK_PRIORITY_FEE_WEI,
            },
            FeeSourceKind::Fallback,
        )
    }

    async fn fetch_from_rpc(&self) -> Result<FeeData> {
        let provider = ProviderBuilder::new().connect_http(self.rpc_url.parse()?);

        let gas_price = provider.get_gas_price().await?;
        let priority_fee = provider.get_max_priority_fee_per_gas().await?;

        // gas price quotes base + tip; recover the base fee from the two
        let base_fee = gas_price.saturating_sub(priority_fee).max(MIN_FEE_WEI);

        Ok(FeeData {
            base_fee_per_gas: base_fee.clamp(MIN_FEE_WEI, MAX_FEE_WEI),
            priority_fee_per_gas: priority_fee.min(MAX_FEE_WEI),
        })
    }

    async fn fetch_from_etherscan(&self, api_key: &str) -> Result<FeeData> {
        let url = format!(
            "{}?chainid={}&module=gastracker&action=gasoracle&apikey={}",
            ETHERSCAN_API_URL, self.chain_id, api_key
        );

        let response: GasTrackerResponse =
            self.http_client.get(&url).send().await?.json().await?;

        if response.status != "1" {
            return Err(eyre!("gas tracker failed: {}", response.message));
        }

        let result = response
            .result
            .ok_or_else(|| eyre!("no gas tracker result"))?;

        let base_fee = result
            .suggest_base_fee
            .and_then(|s| s.parse::<f64>().ok())
            .map(gwei_to_wei)
            .ok_or_else(|| eyre!("gas tracker response missing base fee"))?;

        // Propose price covers base + tip; the difference is the tip
        let priority_fee = result
            .propose_gas_price
            .and_then(|s| s.parse::<f64>().ok())
            .map(gwei_to_wei)
            .map(|propose| propose.saturating_sub(base_fee))
            .filter(|tip| *tip > 0)
            .unwrap_or(FALLBACK_PRIORITY_FEE_WEI);

        Ok(FeeData {
            base_fee_per_gas: base_fee.clamp(MIN_FEE_WEI, MAX_FEE_WEI),
            priority_fee_per_gas: priority_fee.min(MAX_FEE_WEI),
        })
    }
}

fn gwei_to_wei(gwei: f64) -> u128 {
    (gwei * 1e9) as u128
}

// ============================================
// TESTS
// ============================================
