//! Swap Quoting - QuoterV2 Simulation and Fee Tier Selection
//!
//! Every fee tier hosts an independent pool for the same token pair, so a
//! swap first has to find a tier with a live, liquid pool. The quoter runs
//! the official QuoterV2 contract via eth_call (read-only, no state
//! committed); the selector walks candidate tiers in caller priority order
//! and takes the first one that quotes successfully.
//!
//! OPTIMIZATION: pool addresses are immutable per (pair, tier), so factory
//! lookups are cached globally after the first hit.

use alloy_primitives::{Address, U256};
use alloy_provider::{Provider, ProviderBuilder};
use alloy_rpc_types::TransactionRequest;
use alloy_sol_types::{sol, SolCall};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;
use tracing::{debug, warn};

lazy_static! {
    /// Global cache of factory pool lookups (immutable per pair + tier).
    /// Address::ZERO entries are NOT cached: a pool can be created later.
    static ref POOL_CACHE: RwLock<HashMap<(Address, Address, u32), Address>> =
        RwLock::new(HashMap::new());
}

// ============================================
// SOLIDITY INTERFACES
// ============================================

sol! {
    /// Uniswap V3 QuoterV2 interface
    #[derive(Debug)]
    interface IQuoterV2 {
        struct QuoteExactInputSingleParams {
            address tokenIn;
            address tokenOut;
            uint256 amountIn;
            uint24 fee;
            uint160 sqrtPriceLimitX96;
        }

        function quoteExactInputSingle(QuoteExactInputSingleParams memory params)
            external
            returns (
                uint256 amountOut,
                uint160 sqrtPriceX96After,
                uint32 initializedTicksCrossed,
                uint256 gasEstimate
            );
    }

    /// Uniswap V3 Factory interface (pool existence check)
    #[derive(Debug)]
    interface IUniswapV3Factory {
        function getPool(address tokenA, address tokenB, uint24 fee)
            external view returns (address pool);
    }
}

// ============================================
// FEE TIERS
// ============================================

/// The enumerated fee tiers a V3 factory deploys pools for. Each tier
/// fixes both the swap fee and the pool's tick spacing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeeTier {
    /// 0.05% fee, tick spacing 10
    Lowest,
    /// 0.3% fee, tick spacing 60
    Medium,
    /// 1% fee, tick spacing 200
    High,
}

impl FeeTier {
    /// Fee in the factory's hundredths-of-a-bip units (500 = 0.05%)
    pub const fn fee_units(self) -> u32 {
        match self {
            FeeTier::Lowest => 500,
            FeeTier::Medium => 3000,
            FeeTier::High => 10000,
        }
    }

    /// Minimum distance between initializable ticks for this tier
    pub const fn tick_spacing(self) -> i32 {
        match self {
            FeeTier::Lowest => 10,
            FeeTier::Medium => 60,
            FeeTier::High => 200,
        }
    }

    /// All tiers ordered cheapest fee first - the system's default
    /// candidate priority for swaps
    pub const fn cheapest_first() -> [FeeTier; 3] {
        [FeeTier::Lowest, FeeTier::Medium, FeeTier::High]
    }

    pub fn from_fee_units(units: u32) -> Option<FeeTier> {
        match units {
            500 => Some(FeeTier::Lowest),
            3000 => Some(FeeTier::Medium),
            10000 => Some(FeeTier::High),
            _ => None,
        }
    }
}

impl std::fmt::Display for FeeTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeeTier::Lowest => write!(f, "0.05%"),
            FeeTier::Medium => write!(f, "0.3%"),
            FeeTier::High => write!(f, "1%"),
        }
    }
}

// ============================================
// QUOTES
// ============================================

/// A non-committing simulated trade result for one fee tier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeQuote {
    pub amount_in: U256,
    pub amount_out: U256,
    pub fee_tier: FeeTier,
    /// QuoterV2's gas estimate for the underlying swap
    pub gas_estimate: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuoteError {
    /// The factory has no pool deployed for this pair at this tier
    #[error("no pool exists for fee tier {0}")]
    NoPool(FeeTier),

    /// The quoter call reverted (empty pool, bad pair, amount too large)
    #[error("quote failed for fee tier {fee_tier}: {reason}")]
    QuoteFailed { fee_tier: FeeTier, reason: String },

    /// Transport-level failure talking to the node
    #[error("rpc error: {0}")]
    Rpc(String),
}

/// Read-only quote source for a hypothetical trade. Implementations must
/// not mutate chain state.
pub trait QuoteSource {
    fn quote(
        &self,
        token_in: Address,
        token_out: Address,
        fee_tier: FeeTier,
        amount_in: U256,
    ) -> impl std::future::Future<Output = Result<TradeQuote, QuoteError>> + Send;
}

// ============================================
// ROUTER QUOTER
// ============================================

/// QuoterV2-backed implementation of [`QuoteSource`]
pub struct RouterQuoter {
    rpc_url: String,
    factory: Address,
    quoter: Address,
}

impl RouterQuoter {
    pub fn new(rpc_url: String, factory: Address, quoter: Address) -> Self {
        Self {
            rpc_url,
            factory,
            quoter,
        }
    }

    async fn call_contract(&self, to: Address, calldata: Vec<u8>) -> Result<Vec<u8>, QuoteError> {
        let provider = ProviderBuilder::new()
            .connect_http(self.rpc_url.parse().map_err(|e| QuoteError::Rpc(format!("{e}")))?);

        let tx = TransactionRequest::default().to(to).input(calldata.into());

        let result = provider
            .call(tx)
            .await
            .map_err(|e| QuoteError::Rpc(format!("eth_call failed: {e}")))?;

        Ok(result.to_vec())
    }

    /// Look up the pool for a pair + tier via the factory (CACHED - the
    /// factory mapping is append-only, existing entries never change)
    pub async fn pool_for(
        &self,
        token_a: Address,
        token_b: Address,
        fee_tier: FeeTier,
    ) -> Result<Option<Address>, QuoteError> {
        let key = pool_cache_key(token_a, token_b, fee_tier);
        if let Some(pool) = POOL_CACHE.read().unwrap().get(&key) {
            return Ok(Some(*pool));
        }

        let calldata = IUniswapV3Factory::getPoolCall {
            tokenA: token_a,
            tokenB: token_b,
            fee: fee_tier.fee_units().try_into().unwrap(),
        }
        .abi_encode();

        let output = self.call_contract(self.factory, calldata).await?;
        let pool = IUniswapV3Factory::getPoolCall::abi_decode_returns(&output)
            .map_err(|e| QuoteError::Rpc(format!("failed to decode getPool: {e}")))?;

        if pool == Address::ZERO {
            return Ok(None);
        }

        POOL_CACHE.write().unwrap().insert(key, pool);
        debug!("Cached pool {:?} for {} tier", pool, fee_tier);
        Ok(Some(pool))
    }
}

/// getPool is symmetric in its token arguments, so the pair is sorted
/// before keying - both argument orders share one cache entry
fn pool_cache_key(
    token_a: Address,
    token_b: Address,
    fee_tier: FeeTier,
) -> (Address, Address, u32) {
    let (low, high) = if token_a <= token_b {
        (token_a, token_b)
    } else {
        (token_b, token_a)
    };
    (low, high, fee_tier.fee_units())
}

impl QuoteSource for RouterQuoter {
    async fn quote(
        &self,
        token_in: Address,
        token_out: Address,
        fee_tier: FeeTier,
        amount_in: U256,
    ) -> Result<TradeQuote, QuoteError> {
        debug!(
            "Quoting {} -> {} at {} tier, amount {}",
            token_in, token_out, fee_tier, amount_in
        );

        if self.pool_for(token_in, token_out, fee_tier).await?.is_none() {
            return Err(QuoteError::NoPool(fee_tier));
        }

        let params = IQuoterV2::QuoteExactInputSingleParams {
            tokenIn: token_in,
            tokenOut: token_out,
            amountIn: amount_in,
            fee: fee_tier.fee_units().try_into().unwrap(),
            sqrtPriceLimitX96: alloy_primitives::Uint::<160, 3>::ZERO,
        };
        let calldata = IQuoterV2::quoteExactInputSingleCall { params }.abi_encode();

        match self.call_contract(self.quoter, calldata).await {
            Ok(output) => {
                let decoded = IQuoterV2::quoteExactInputSingleCall::abi_decode_returns(&output)
                    .map_err(|e| QuoteError::Rpc(format!("failed to decode quoter output: {e}")))?;

                Ok(TradeQuote {
                    amount_in,
                    amount_out: decoded.amountOut,
                    fee_tier,
                    gas_estimate: decoded.gasEstimate.to(),
                })
            }
            // The quoter reverts when the pool cannot fill the trade;
            // that is a per-tier outcome, not a transport failure
            Err(QuoteError::Rpc(reason)) => Err(QuoteError::QuoteFailed { fee_tier, reason }),
            Err(other) => Err(other),
        }
    }
}

// ============================================
// FEE TIER SELECTION
// ============================================

/// All candidate tiers were attempted and none produced a quote
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no viable fee tier among {attempted:?}")]
pub struct NoViableTier {
    pub attempted: Vec<FeeTier>,
}

/// Try candidate tiers in the caller's priority order and return the first
/// successful quote. Priority order IS the tie-break policy: the scan stops
/// at the first hit and never compares quotes across tiers.
pub async fn select_viable_tier<Q: QuoteSource>(
    quoter: &Q,
    token_in: Address,
    token_out: Address,
    amount_in: U256,
    candidates: &[FeeTier],
) -> Result<TradeQuote, NoViableTier> {
    let mut attempted = Vec::with_capacity(candidates.len());

    for &tier in candidates {
        attempted.push(tier);
        match quoter.quote(token_in, token_out, tier, amount_in).await {
            Ok(quote) => {
                debug!(
                    "Tier {} viable: {} in -> {} out",
                    tier, quote.amount_in, quote.amount_out
                );
                return Ok(quote);
            }
            Err(e) => {
                warn!("Tier {} not viable: {}", tier, e);
            }
        }
    }

    Err(NoViableTier { attempted })
}

// ============================================
// TESTS
// ============================================
