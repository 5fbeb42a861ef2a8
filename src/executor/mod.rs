//! Swap Execution Engine
//!
//! Drives one swap from request to structured outcome:
//!
//! Idle -> BalanceChecked -> Approved -> TierSelected -> GasPlanned
//!      -> Submitted -> { Confirmed | Reverted | TimedOut }
//!
//! Exactly one swap transaction is sent per successful run. Everything
//! before submission is side-effect free except the conditional approval,
//! and the approval is always for the exact amount - never unlimited, so a
//! compromised router can take at most one trade's worth.
//!
//! ⚠️  This module moves real funds when pointed at a live network.

mod report;

pub use report::SwapReport;

use alloy_primitives::{Address, Bytes, B256, U256};
use alloy_sol_types::{sol, SolCall};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::chain::{FeeSource, TokenLedger, TxSubmitter};
use crate::gas::GasPolicy;
use crate::quoter::{select_viable_tier, FeeTier, QuoteSource, TradeQuote};

// ============================================
// SOLIDITY INTERFACE
// ============================================

sol! {
    /// SwapRouter exact-input interface
    #[derive(Debug)]
    interface ISwapRouter {
        struct ExactInputSingleParams {
            address tokenIn;
            address tokenOut;
            uint24 fee;
            address recipient;
            uint256 deadline;
            uint256 amountIn;
            uint256 amountOutMinimum;
            uint160 sqrtPriceLimitX96;
        }

        function exactInputSingle(ExactInputSingleParams calldata params)
            external payable returns (uint256 amountOut);
    }
}

// ============================================
// REQUEST & OUTCOME TYPES
// ============================================

/// One swap to perform. Consumed exactly once by [`SwapExecutor::execute`].
#[derive(Debug, Clone)]
pub struct SwapRequest {
    pub token_in: Address,
    pub token_out: Address,
    pub amount_in: U256,
    /// Slippage tolerance in basis points (100 = 1%)
    pub slippage_bps: u32,
    pub recipient: Address,
    /// Unix timestamp enforced on-chain by the router
    pub deadline: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("amount in is zero")]
    ZeroAmount,
    #[error("token in and token out are the same")]
    IdenticalTokens,
    #[error("slippage {0} bps exceeds 100%")]
    SlippageTooLarge(u32),
    #[error("deadline {deadline} already passed (now {now})")]
    DeadlineExpired { deadline: u64, now: u64 },
    #[error("recipient is the zero address")]
    ZeroRecipient,
}

impl SwapRequest {
    /// Fatal, never retried: a malformed request cannot succeed on-chain
    pub fn validate(&self, now: u64) -> Result<(), ValidationError> {
        if self.amount_in.is_zero() {
            return Err(ValidationError::ZeroAmount);
        }
        if self.token_in == self.token_out {
            return Err(ValidationError::IdenticalTokens);
        }
        if self.slippage_bps > 10_000 {
            return Err(ValidationError::SlippageTooLarge(self.slippage_bps));
        }
        if self.deadline <= now {
            return Err(ValidationError::DeadlineExpired {
                deadline: self.deadline,
                now,
            });
        }
        if self.recipient == Address::ZERO {
            return Err(ValidationError::ZeroRecipient);
        }
        Ok(())
    }

    /// Minimum acceptable output after applying the slippage tolerance to
    /// a quote: amountOut * (10000 - slippageBps) / 10000. Tolerances at
    /// or past 100% floor to zero; `validate` rejects them before any
    /// network call, but this must hold on its own for unvalidated
    /// requests too.
    pub fn min_amount_out(&self, quoted_out: U256) -> U256 {
        let keep_bps = 10_000u32.saturating_sub(self.slippage_bps);
        quoted_out * U256::from(keep_bps) / U256::from(10_000u32)
    }
}

/// Progress marker for logging and error context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapPhase {
    Idle,
    BalanceChecked,
    Approved,
    TierSelected,
    GasPlanned,
    Submitted,
}

impl std::fmt::Display for SwapPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SwapPhase::Idle => write!(f, "idle"),
            SwapPhase::BalanceChecked => write!(f, "balance-checked"),
            SwapPhase::Approved => write!(f, "approved"),
            SwapPhase::TierSelected => write!(f, "tier-selected"),
            SwapPhase::GasPlanned => write!(f, "gas-planned"),
            SwapPhase::Submitted => write!(f, "submitted"),
        }
    }
}

/// Structured result of one execution attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwapOutcome {
    /// Swap confirmed on-chain. `amount_out` is the quoted amount; the
    /// router enforced at least the slippage-adjusted minimum.
    Success { tx_hash: B256, amount_out: U256 },

    /// The single requested tier could not produce a quote
    QuoteFailed { fee_tier: FeeTier },

    /// Sender balance below amount in; nothing was submitted
    InsufficientBalance,

    /// No candidate tier has a pool that can fill the trade
    InsufficientLiquidity,

    /// The transaction was mined and rejected
    Reverted { reason: String },

    /// Confirmation wait expired. The transaction may still land later -
    /// the caller must re-query the chain before deciding anything.
    Timeout { tx_hash: B256 },
}

impl SwapOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SwapOutcome::Success { .. })
    }
}

/// Failures that prevent reaching any outcome at all
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SwapError {
    #[error("invalid swap request: {0}")]
    Validation(#[from] ValidationError),

    #[error("rpc failure while {phase}: {message}")]
    Rpc { phase: SwapPhase, message: String },
}

// ============================================
// EXECUTOR
// ============================================

/// The swap execution engine. Generic over its collaborators so the full
/// state machine runs against mocks in tests.
pub struct SwapExecutor<'a, C, Q> {
    chain: &'a C,
    quoter: &'a Q,
    /// SwapRouter contract the approval is granted to
    router: Address,
    /// Account the input tokens are pulled from
    sender: Address,
    gas_policy: GasPolicy,
    /// How long to wait for the swap to confirm
    confirm_timeout: Duration,
}

impl<'a, C, Q> SwapExecutor<'a, C, Q>
where
    C: TokenLedger + TxSubmitter + FeeSource,
    Q: QuoteSource,
{
    pub fn new(
        chain: &'a C,
        quoter: &'a Q,
        router: Address,
        sender: Address,
        confirm_timeout: Duration,
    ) -> Self {
        Self {
            chain,
            quoter,
            router,
            sender,
            gas_policy: GasPolicy::default(),
            confirm_timeout,
        }
    }

    pub fn with_gas_policy(mut self, policy: GasPolicy) -> Self {
        self.gas_policy = policy;
        self
    }

    /// Run the swap state machine to completion.
    ///
    /// Precondition failures (balance, liquidity) come back as outcomes,
    /// not errors; only malformed requests and transport failures error.
    /// No automatic retries: trying the next fee tier inside the selector
    /// is the only built-in fallback.
    pub async fn execute(
        &self,
        request: SwapRequest,
        candidate_tiers: &[FeeTier],
    ) -> Result<SwapOutcome, SwapError> {
        let now = unix_now();
        request.validate(now)?;
        let mut phase = SwapPhase::Idle;

        // 1. Balance check - nothing is submitted if the sender cannot pay
        let balance = self
            .chain
            .balance_of(request.token_in, self.sender)
            .await
            .map_err(|e| rpc_error(phase, e))?;
        if balance < request.amount_in {
            info!(
                "Insufficient balance: have {}, need {}",
                balance, request.amount_in
            );
            return Ok(SwapOutcome::InsufficientBalance);
        }
        phase = SwapPhase::BalanceChecked;
        debug!("Phase {}: balance {} covers swap", phase, balance);

        // 2. Exact-amount approval, only if the allowance falls short
        let allowance = self
            .chain
            .allowance(request.token_in, self.sender, self.router)
            .await
            .map_err(|e| rpc_error(phase, e))?;
        if allowance < request.amount_in {
            info!(
                "Allowance {} short of {}, approving exact amount",
                allowance, request.amount_in
            );
            self.chain
                .approve(request.token_in, self.router, request.amount_in)
                .await
                .map_err(|e| rpc_error(phase, e))?;
        } else {
            debug!("Existing allowance {} is sufficient", allowance);
        }
        phase = SwapPhase::Approved;

        // 3. Fee tier selection
        let quote = match select_viable_tier(
            self.quoter,
            request.token_in,
            request.token_out,
            request.amount_in,
            candidate_tiers,
        )
        .await
        {
            Ok(quote) => quote,
            Err(no_tier) => {
                warn!("No viable fee tier: {}", no_tier);
                // A pinned single tier failing is that tier's failure; an
                // exhausted scan means the pair has no liquidity path
                return Ok(match candidate_tiers {
                    [only] => SwapOutcome::QuoteFailed { fee_tier: *only },
                    _ => SwapOutcome::InsufficientLiquidity,
                });
            }
        };
        phase = SwapPhase::TierSelected;
        info!(
            "Phase {}: {} tier quotes {} -> {}",
            phase, quote.fee_tier, quote.amount_in, quote.amount_out
        );

        // 4. Slippage floor and calldata for the exact swap call
        let amount_out_minimum = request.min_amount_out(quote.amount_out);
        let calldata = self.swap_calldata(&request, &quote, amount_out_minimum);

        // 5. Gas plan from the exact call's estimate; fee data is fetched
        //    fresh because plans are never reused across attempts
        let estimate = self
            .chain
            .estimate_call_gas(self.router, calldata.clone(), U256::ZERO)
            .await
            .map_err(|e| rpc_error(phase, e))?;
        let fees = self.chain.fee_data().await.map_err(|e| rpc_error(phase, e))?;
        let plan = self.gas_policy.plan(estimate, &fees);
        phase = SwapPhase::GasPlanned;
        debug!(
            "Phase {}: limit {}, max fee {} wei",
            phase, plan.gas_limit, plan.max_fee_per_gas
        );

        // 6. Submit and wait for inclusion
        let tx_hash = self
            .chain
            .submit_call(self.router, calldata, U256::ZERO, &plan)
            .await
            .map_err(|e| rpc_error(phase, e))?;
        phase = SwapPhase::Submitted;
        info!("Phase {}: swap transaction {:?}", phase, tx_hash);

        match self
            .chain
            .wait_for_receipt(tx_hash, self.confirm_timeout)
            .await
            .map_err(|e| rpc_error(phase, e))?
        {
            Some(receipt) if receipt.success => {
                info!(
                    "✅ Swap confirmed in block {} ({} gas)",
                    receipt.block_number, receipt.gas_used
                );
                Ok(SwapOutcome::Success {
                    tx_hash,
                    amount_out: quote.amount_out,
                })
            }
            Some(receipt) => {
                let reason = receipt
                    .revert_reason
                    .unwrap_or_else(|| "execution reverted".to_string());
                warn!(
                    "❌ Swap reverted in block {}: {}",
                    receipt.block_number, reason
                );
                Ok(SwapOutcome::Reverted { reason })
            }
            None => {
                // Ambiguous by design: the transaction cannot be retracted
                // and may still be mined after we stop watching
                warn!("⏳ Swap not confirmed within {:?}", self.confirm_timeout);
                Ok(SwapOutcome::Timeout { tx_hash })
            }
        }
    }

    fn swap_calldata(
        &self,
        request: &SwapRequest,
        quote: &TradeQuote,
        amount_out_minimum: U256,
    ) -> Bytes {
        let params = ISwapRouter::ExactInputSingleParams {
            tokenIn: request.token_in,
            tokenOut: request.token_out,
            fee: quote.fee_tier.fee_units().try_into().unwrap(),
            recipient: request.recipient,
            deadline: U256::from(request.deadline),
            amountIn: request.amount_in,
            amountOutMinimum: amount_out_minimum,
            sqrtPriceLimitX96: alloy_primitives::Uint::<160, 3>::ZERO,
        };
        ISwapRouter::exactInputSingleCall { params }.abi_encode().into()
    }
}

fn rpc_error(phase: SwapPhase, e: eyre::Report) -> SwapError {
    SwapError::Rpc {
        phase,
        message: format!("{e}"),
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ReceiptInfo;
    use crate::gas::{FeeData, GasPlan};
    use crate::quoter::QuoteError;
    use eyre::Result;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const FAR_DEADLINE: u64 = 4_000_000_000; // year 2096

    fn request(amount: u64) -> SwapRequest {
        SwapRequest {
            token_in: Address::repeat_byte(0x11),
            token_out: Address::repeat_byte(0x22),
            amount_in: U256::from(amount),
            slippage_bps: 50,
            recipient: Address::repeat_byte(0x33),
            deadline: FAR_DEADLINE,
        }
    }

    /// Scripted chain whose counters prove which side effects happened
    struct MockChain {
        balance: U256,
        allowance: U256,
        /// None = gas estimation reverts
        gas_estimate: Option<u64>,
        /// None = receipt never arrives (timeout)
        receipt: Option<ReceiptInfo>,
        approvals: AtomicUsize,
        submissions: AtomicUsize,
    }

    impl MockChain {
        fn new(balance: u64, allowance: u64) -> Self {
            Self {
                balance: U256::from(balance),
                allowance: U256::from(allowance),
                gas_estimate: Some(150_000),
                receipt: Some(ReceiptInfo {
                    tx_hash: B256::repeat_byte(0xaa),
                    success: true,
                    gas_used: 140_000,
                    block_number: 123,
                    revert_reason: None,
                }),
                approvals: AtomicUsize::new(0),
                submissions: AtomicUsize::new(0),
            }
        }

        fn reverting(mut self, reason: &str) -> Self {
            self.receipt = Some(ReceiptInfo {
                tx_hash: B256::repeat_byte(0xaa),
                success: false,
                gas_used: 90_000,
                block_number: 123,
                revert_reason: Some(reason.to_string()),
            });
            self
        }

        fn never_confirming(mut self) -> Self {
            self.receipt = None;
            self
        }
    }

    impl TokenLedger for MockChain {
        async fn balance_of(&self, _token: Address, _owner: Address) -> Result<U256> {
            Ok(self.balance)
        }

        async fn allowance(
            &self,
            _token: Address,
            _owner: Address,
            _spender: Address,
        ) -> Result<U256> {
            Ok(self.allowance)
        }

        async fn approve(
            &self,
            _token: Address,
            _spender: Address,
            _amount: U256,
        ) -> Result<ReceiptInfo> {
            self.approvals.fetch_add(1, Ordering::SeqCst);
            Ok(ReceiptInfo {
                tx_hash: B256::repeat_byte(0xbb),
                success: true,
                gas_used: 46_000,
                block_number: 122,
                revert_reason: None,
            })
        }
    }

    impl FeeSource for MockChain {
        async fn fee_data(&self) -> Result<FeeData> {
            Ok(FeeData {
                base_fee_per_gas: 30_000_000_000,
                priority_fee_per_gas: 1_000_000_000,
            })
        }
    }

    impl TxSubmitter for MockChain {
        async fn estimate_call_gas(
            &self,
            _to: Address,
            _calldata: Bytes,
            _value: U256,
        ) -> Result<Option<u64>> {
            Ok(self.gas_estimate)
        }

        async fn submit_call(
            &self,
            _to: Address,
            _calldata: Bytes,
            _value: U256,
            _plan: &GasPlan,
        ) -> Result<B256> {
            self.submissions.fetch_add(1, Ordering::SeqCst);
            Ok(B256::repeat_byte(0xaa))
        }

        async fn wait_for_receipt(
            &self,
            _tx_hash: B256,
            _timeout: Duration,
        ) -> Result<Option<ReceiptInfo>> {
            Ok(self.receipt.clone())
        }
    }

    /// Quoter that always succeeds at the given tier
    struct FixedQuoter {
        tier: FeeTier,
        out: U256,
    }

    impl QuoteSource for FixedQuoter {
        async fn quote(
            &self,
            _token_in: Address,
            _token_out: Address,
            fee_tier: FeeTier,
            amount_in: U256,
        ) -> Result<TradeQuote, QuoteError> {
            if fee_tier == self.tier {
                Ok(TradeQuote {
                    amount_in,
                    amount_out: self.out,
                    fee_tier,
                    gas_estimate: 130_000,
                })
            } else {
                Err(QuoteError::NoPool(fee_tier))
            }
        }
    }

    /// Quoter with no liquidity anywhere
    struct DeadQuoter;

    impl QuoteSource for DeadQuoter {
        async fn quote(
            &self,
            _token_in: Address,
            _token_out: Address,
            fee_tier: FeeTier,
            _amount_in: U256,
        ) -> Result<TradeQuote, QuoteError> {
            Err(QuoteError::NoPool(fee_tier))
        }
    }

    fn executor<'a, C, Q>(chain: &'a C, quoter: &'a Q) -> SwapExecutor<'a, C, Q> {
        SwapExecutor {
            chain,
            quoter,
            router: Address::repeat_byte(0x99),
            sender: Address::repeat_byte(0x44),
            gas_policy: GasPolicy::default(),
            confirm_timeout: Duration::from_secs(60),
        }
    }

    #[tokio::test]
    async fn insufficient_balance_submits_nothing() {
        let chain = MockChain::new(50, 0);
        let quoter = FixedQuoter {
            tier: FeeTier::Medium,
            out: U256::from(1000u32),
        };

        let outcome = executor(&chain, &quoter)
            .execute(request(100), &FeeTier::cheapest_first())
            .await
            .unwrap();

        assert_eq!(outcome, SwapOutcome::InsufficientBalance);
        assert_eq!(chain.approvals.load(Ordering::SeqCst), 0);
        assert_eq!(chain.submissions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn happy_path_confirms_with_one_submission() {
        let chain = MockChain::new(1000, 0);
        let quoter = FixedQuoter {
            tier: FeeTier::Medium,
            out: U256::from(2000u32),
        };

        let outcome = executor(&chain, &quoter)
            .execute(request(100), &FeeTier::cheapest_first())
            .await
            .unwrap();

        assert_eq!(
            outcome,
            SwapOutcome::Success {
                tx_hash: B256::repeat_byte(0xaa),
                amount_out: U256::from(2000u32),
            }
        );
        // Allowance was zero, so exactly one exact-amount approval
        assert_eq!(chain.approvals.load(Ordering::SeqCst), 1);
        assert_eq!(chain.submissions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn sufficient_allowance_skips_approval() {
        let chain = MockChain::new(1000, 1000);
        let quoter = FixedQuoter {
            tier: FeeTier::Medium,
            out: U256::from(2000u32),
        };

        let outcome = executor(&chain, &quoter)
            .execute(request(100), &FeeTier::cheapest_first())
            .await
            .unwrap();

        assert!(outcome.is_success());
        assert_eq!(chain.approvals.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn no_liquidity_reports_without_submitting() {
        let chain = MockChain::new(1000, 1000);

        let outcome = executor(&chain, &DeadQuoter)
            .execute(request(100), &FeeTier::cheapest_first())
            .await
            .unwrap();

        assert_eq!(outcome, SwapOutcome::InsufficientLiquidity);
        assert_eq!(chain.submissions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn pinned_tier_failure_names_the_tier() {
        let chain = MockChain::new(1000, 1000);

        let outcome = executor(&chain, &DeadQuoter)
            .execute(request(100), &[FeeTier::High])
            .await
            .unwrap();

        assert_eq!(
            outcome,
            SwapOutcome::QuoteFailed {
                fee_tier: FeeTier::High
            }
        );
    }

    #[tokio::test]
    async fn revert_carries_decoded_reason() {
        let chain = MockChain::new(1000, 1000).reverting("Too little received");
        let quoter = FixedQuoter {
            tier: FeeTier::Medium,
            out: U256::from(2000u32),
        };

        let outcome = executor(&chain, &quoter)
            .execute(request(100), &FeeTier::cheapest_first())
            .await
            .unwrap();

        assert_eq!(
            outcome,
            SwapOutcome::Reverted {
                reason: "Too little received".to_string()
            }
        );
    }

    #[tokio::test]
    async fn timeout_is_ambiguous_not_failure() {
        let chain = MockChain::new(1000, 1000).never_confirming();
        let quoter = FixedQuoter {
            tier: FeeTier::Medium,
            out: U256::from(2000u32),
        };

        let outcome = executor(&chain, &quoter)
            .execute(request(100), &FeeTier::cheapest_first())
            .await
            .unwrap();

        // The transaction WAS submitted; the hash comes back so the
        // caller can re-query
        assert_eq!(
            outcome,
            SwapOutcome::Timeout {
                tx_hash: B256::repeat_byte(0xaa)
            }
        );
        assert_eq!(chain.submissions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_gas_estimate_still_submits_with_fallback_limit() {
        let mut chain = MockChain::new(1000, 1000);
        chain.gas_estimate = None;
        let quoter = FixedQuoter {
            tier: FeeTier::Medium,
            out: U256::from(2000u32),
        };

        let outcome = executor(&chain, &quoter)
            .execute(request(100), &FeeTier::cheapest_first())
            .await
            .unwrap();

        // Estimation reverting degrades to the fallback limit rather than
        // failing the whole operation
        assert!(outcome.is_success());
        assert_eq!(chain.submissions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn validation_rejects_before_any_network_call() {
        let chain = MockChain::new(1000, 1000);
        let quoter = FixedQuoter {
            tier: FeeTier::Medium,
            out: U256::from(2000u32),
        };

        let err = executor(&chain, &quoter)
            .execute(request(0), &FeeTier::cheapest_first())
            .await
            .unwrap_err();
        assert_eq!(err, SwapError::Validation(ValidationError::ZeroAmount));

        let mut bad = request(100);
        bad.slippage_bps = 10_001;
        assert!(matches!(
            executor(&chain, &quoter)
                .execute(bad, &FeeTier::cheapest_first())
                .await,
            Err(SwapError::Validation(ValidationError::SlippageTooLarge(_)))
        ));

        let mut bad = request(100);
        bad.deadline = 1;
        assert!(matches!(
            executor(&chain, &quoter)
                .execute(bad, &FeeTier::cheapest_first())
                .await,
            Err(SwapError::Validation(ValidationError::DeadlineExpired { .. }))
        ));

        let mut bad = request(100);
        bad.token_out = bad.token_in;
        assert!(matches!(
            executor(&chain, &quoter)
                .execute(bad, &FeeTier::cheapest_first())
                .await,
            Err(SwapError::Validation(ValidationError::IdenticalTokens))
        ));

        assert_eq!(chain.approvals.load(Ordering::SeqCst), 0);
        assert_eq!(chain.submissions.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn slippage_floor_math() {
        let req = request(100);
        // 50 bps on 10000 -> 9950
        assert_eq!(
            req.min_amount_out(U256::from(10_000u32)),
            U256::from(9_950u32)
        );

        let mut zero_slip = request(100);
        zero_slip.slippage_bps = 0;
        assert_eq!(
            zero_slip.min_amount_out(U256::from(10_000u32)),
            U256::from(10_000u32)
        );

        let mut full_slip = request(100);
        full_slip.slippage_bps = 10_000;
        assert_eq!(full_slip.min_amount_out(U256::from(10_000u32)), U256::ZERO);

        // Past 100% saturates to zero instead of underflowing, even on a
        // request that never went through validation
        let mut over_slip = request(100);
        over_slip.slippage_bps = 20_000;
        assert_eq!(over_slip.min_amount_out(U256::from(10_000u32)), U256::ZERO);
    }
}
