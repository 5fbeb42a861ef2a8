//! Chain Collaborators - Pool State, Tokens, Fees, and Transactions
//!
//! The core never talks to the network directly; it goes through the
//! traits in this module so the swap and liquidity flows can run against
//! mocks in tests. [`ChainClient`] is the production implementation: an
//! alloy HTTP provider plus a [`WalletManager`] that signs EIP-1559
//! transactions with a locally held key.
//!
//! All of this is explicit context passed into each call - there is no
//! process-wide network or signer singleton.

use alloy_consensus::{SignableTransaction, Transaction as TxFields, TxEip1559};
use alloy_primitives::{hex, Address, Bytes, B256, U256};
use alloy_provider::{Provider, ProviderBuilder};
use alloy_rpc_types::{BlockId, TransactionRequest};
use alloy_signer::Signer;
use alloy_signer_local::PrivateKeySigner;
use alloy_sol_types::{sol, Revert, SolCall, SolError};
use eyre::{eyre, Result};
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::gas::{FeeData, FeeOracle, GasPlan};

// ============================================
// SOLIDITY INTERFACES
// ============================================

sol! {
    interface IERC20 {
        function balanceOf(address account) external view returns (uint256);
        function allowance(address owner, address spender) external view returns (uint256);
        function approve(address spender, uint256 amount) external returns (bool);
    }

    interface IUniswapV3Pool {
        function slot0() external view returns (
            uint160 sqrtPriceX96, int24 tick, uint16 observationIndex,
            uint16 observationCardinality, uint16 observationCardinalityNext,
            uint8 feeProtocol, bool unlocked
        );
        function liquidity() external view returns (uint128);
        function tickSpacing() external view returns (int24);
        function token0() external view returns (address);
        function token1() external view returns (address);
    }
}

// ============================================
// VALUE TYPES
// ============================================

/// Snapshot of a pool's current trading state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolState {
    /// Zero means the pool exists but was never initialized
    pub sqrt_price_x96: U256,
    pub tick: i32,
    pub liquidity: u128,
    pub tick_spacing: i32,
}

impl PoolState {
    pub fn is_initialized(&self) -> bool {
        !self.sqrt_price_x96.is_zero()
    }
}

/// Outcome of a mined transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptInfo {
    pub tx_hash: B256,
    pub success: bool,
    pub gas_used: u64,
    pub block_number: u64,
    /// Decoded revert reason, when the node surfaces one
    pub revert_reason: Option<String>,
}

// ============================================
// COLLABORATOR TRAITS
// ============================================

/// ERC-20 balance / allowance queries and approvals
pub trait TokenLedger {
    fn balance_of(
        &self,
        token: Address,
        owner: Address,
    ) -> impl Future<Output = Result<U256>> + Send;

    fn allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> impl Future<Output = Result<U256>> + Send;

    /// Submit an approval and wait for it to confirm
    fn approve(
        &self,
        token: Address,
        spender: Address,
        amount: U256,
    ) -> impl Future<Output = Result<ReceiptInfo>> + Send;
}

/// Current network fee data
pub trait FeeSource {
    fn fee_data(&self) -> impl Future<Output = Result<FeeData>> + Send;
}

/// Transaction submission and confirmation tracking
pub trait TxSubmitter {
    /// Simulate the call and estimate its gas. Returns Ok(None) when the
    /// simulation reverts - the caller falls back to a fixed limit and
    /// must still handle a revert at submission time.
    fn estimate_call_gas(
        &self,
        to: Address,
        calldata: Bytes,
        value: U256,
    ) -> impl Future<Output = Result<Option<u64>>> + Send;

    /// Sign and broadcast; returns the transaction hash immediately
    fn submit_call(
        &self,
        to: Address,
        calldata: Bytes,
        value: U256,
        plan: &GasPlan,
    ) -> impl Future<Output = Result<B256>> + Send;

    /// Poll for the receipt until `timeout`. Ok(None) means the wait was
    /// abandoned - the transaction may still land later, so a timeout is
    /// never evidence of failure.
    fn wait_for_receipt(
        &self,
        tx_hash: B256,
        timeout: Duration,
    ) -> impl Future<Output = Result<Option<ReceiptInfo>>> + Send;
}

/// Read-only pool state queries
pub trait PoolReader {
    fn pool_state(&self, pool: Address) -> impl Future<Output = Result<PoolState>> + Send;
}

// ============================================
// WALLET MANAGER
// ============================================

/// Holds the signing key and tracks the account nonce.
///
/// Never log or expose the private key.
pub struct WalletManager {
    signer: PrivateKeySigner,
    chain_id: u64,
    current_nonce: u64,
}

impl WalletManager {
    pub fn new(private_key: &str, chain_id: u64) -> Result<Self> {
        let key = private_key.trim_start_matches("0x");
        let signer = PrivateKeySigner::from_str(key)
            .map_err(|e| eyre!("failed to parse private key: {e}"))?;
        info!("✓ Wallet loaded: {:?}", signer.address());

        Ok(Self {
            signer,
            chain_id,
            current_nonce: 0,
        })
    }

    /// Load the key from the given environment variable
    pub fn from_env(var: &str, chain_id: u64) -> Result<Self> {
        let key = std::env::var(var).map_err(|_| eyre!("{var} is not set"))?;
        Self::new(&key, chain_id)
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Refresh the nonce from the network
    pub async fn update_nonce(&mut self, rpc_url: &str) -> Result<()> {
        let provider = ProviderBuilder::new().connect_http(rpc_url.parse()?);
        self.current_nonce = provider.get_transaction_count(self.signer.address()).await?;
        debug!("Updated nonce to: {}", self.current_nonce);
        Ok(())
    }

    /// Get and increment the nonce
    pub fn get_nonce(&mut self) -> u64 {
        let nonce = self.current_nonce;
        self.current_nonce += 1;
        nonce
    }

    /// Sign an EIP-1559 transaction and return the raw RLP bytes
    pub async fn sign_transaction(
        &mut self,
        to: Address,
        calldata: Bytes,
        value: U256,
        plan: &GasPlan,
    ) -> Result<Bytes> {
        let nonce = self.get_nonce();

        let tx = TxEip1559 {
            chain_id: self.chain_id,
            nonce,
            gas_limit: plan.gas_limit,
            max_fee_per_gas: plan.max_fee_per_gas,
            max_priority_fee_per_gas: plan.max_priority_fee_per_gas,
            to: alloy_primitives::TxKind::Call(to),
            value,
            input: calldata,
            access_list: Default::default(),
        };

        let sig_hash = tx.signature_hash();
        let signature = self
            .signer
            .sign_hash(&sig_hash)
            .await
            .map_err(|e| eyre!("failed to sign transaction: {e}"))?;

        let signed = alloy_consensus::TxEnvelope::Eip1559(alloy_consensus::Signed::new_unchecked(
            tx,
            signature,
            B256::from(self.signer.address().into_word()),
        ));

        let mut encoded = Vec::new();
        alloy_rlp::Encodable::encode(&signed, &mut encoded);

        debug!(
            "Signed EIP-1559 transaction: to={:?}, nonce={}, gas_limit={}, max_fee={}",
            to, nonce, plan.gas_limit, plan.max_fee_per_gas
        );

        Ok(Bytes::from(encoded))
    }
}

// ============================================
// CHAIN CLIENT
// ============================================

/// How often to poll for a pending receipt
const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Confirmation wait for internal transactions (approvals)
const APPROVAL_TIMEOUT: Duration = Duration::from_secs(180);

/// Production implementation of all collaborator traits over an HTTP
/// provider
pub struct ChainClient {
    rpc_url: String,
    wallet: Mutex<WalletManager>,
    sender: Address,
    fee_oracle: FeeOracle,
}

impl ChainClient {
    pub fn new(
        rpc_url: String,
        wallet: WalletManager,
        etherscan_api_key: Option<String>,
    ) -> Result<Self> {
        let sender = wallet.address();
        let fee_oracle = FeeOracle::new(etherscan_api_key, wallet.chain_id(), rpc_url.clone())?;
        Ok(Self {
            rpc_url,
            wallet: Mutex::new(wallet),
            sender,
            fee_oracle,
        })
    }

    /// The transaction sender (the wallet's address)
    pub fn sender(&self) -> Address {
        self.sender
    }

    fn provider(&self) -> Result<impl Provider> {
        Ok(ProviderBuilder::new().connect_http(self.rpc_url.parse()?))
    }

    async fn eth_call(&self, to: Address, calldata: Vec<u8>) -> Result<Vec<u8>> {
        let provider = self.provider()?;
        let tx = TransactionRequest::default().to(to).input(calldata.into());
        let result = provider
            .call(tx)
            .await
            .map_err(|e| eyre!("eth_call failed: {e}"))?;
        Ok(result.to_vec())
    }

    async fn sign_and_broadcast(
        &self,
        to: Address,
        calldata: Bytes,
        value: U256,
        plan: &GasPlan,
    ) -> Result<B256> {
        let raw = {
            let mut wallet = self.wallet.lock().await;
            // Refresh from the network before every submission; a resubmit
            // with a new nonce is a distinct attempt, never a retry
            wallet.update_nonce(&self.rpc_url).await?;
            wallet.sign_transaction(to, calldata, value, plan).await?
        };

        let provider = self.provider()?;
        let pending = provider
            .send_raw_transaction(&raw)
            .await
            .map_err(|e| eyre!("failed to broadcast transaction: {e}"))?;
        let tx_hash = *pending.tx_hash();
        info!("Transaction broadcast: {:?}", tx_hash);
        Ok(tx_hash)
    }

    /// Replay a failed transaction's call at its block to recover the
    /// revert reason the node reports. Best-effort: any lookup failure
    /// just yields no reason.
    async fn recover_revert_reason(&self, tx_hash: B256, block_number: u64) -> Option<String> {
        let provider = self.provider().ok()?;
        let tx = provider.get_transaction_by_hash(tx_hash).await.ok()??;

        let replay = TransactionRequest::default()
            .from(self.sender)
            .to(tx.to()?)
            .input(tx.input().clone().into())
            .value(tx.value());

        match provider
            .call(replay)
            .block(BlockId::number(block_number))
            .await
        {
            // The replay succeeding tells us nothing about why the real
            // transaction failed
            Ok(_) => None,
            Err(e) => extract_revert_reason(&e.to_string()),
        }
    }
}

/// Pull a human-readable reason out of a node's revert error: either
/// ABI-encoded Error(string) data embedded as hex, or the geth-style
/// "execution reverted: <reason>" message.
fn extract_revert_reason(message: &str) -> Option<String> {
    if let Some(start) = message.find("0x08c379a0") {
        let hex_data: String = message[start + 2..]
            .chars()
            .take_while(|c| c.is_ascii_hexdigit())
            .collect();
        if let Ok(data) = hex::decode(&hex_data) {
            if let Ok(revert) = Revert::abi_decode(&data) {
                return Some(revert.reason);
            }
        }
    }

    let marker = "execution reverted: ";
    let idx = message.find(marker)?;
    let tail = &message[idx + marker.len()..];
    let reason = tail.split('"').next().unwrap_or(tail).trim();
    if reason.is_empty() {
        None
    } else {
        Some(reason.to_string())
    }
}

impl TokenLedger for ChainClient {
    async fn balance_of(&self, token: Address, owner: Address) -> Result<U256> {
        let calldata = IERC20::balanceOfCall { account: owner }.abi_encode();
        let output = self.eth_call(token, calldata).await?;
        IERC20::balanceOfCall::abi_decode_returns(&output)
            .map_err(|e| eyre!("failed to decode balanceOf: {e}"))
    }

    async fn allowance(&self, token: Address, owner: Address, spender: Address) -> Result<U256> {
        let calldata = IERC20::allowanceCall { owner, spender }.abi_encode();
        let output = self.eth_call(token, calldata).await?;
        IERC20::allowanceCall::abi_decode_returns(&output)
            .map_err(|e| eyre!("failed to decode allowance: {e}"))
    }

    async fn approve(&self, token: Address, spender: Address, amount: U256) -> Result<ReceiptInfo> {
        debug!("Approving {} to spend {} of {:?}", spender, amount, token);

        let calldata: Bytes = IERC20::approveCall { spender, amount }.abi_encode().into();
        let estimate = self
            .estimate_call_gas(token, calldata.clone(), U256::ZERO)
            .await?;
        let fees = self.fee_data().await?;
        let plan = crate::gas::GasPolicy::default().plan(estimate, &fees);

        let tx_hash = self
            .sign_and_broadcast(token, calldata, U256::ZERO, &plan)
            .await?;

        match self.wait_for_receipt(tx_hash, APPROVAL_TIMEOUT).await? {
            Some(receipt) if receipt.success => Ok(receipt),
            Some(receipt) => Err(eyre!(
                "approval reverted in block {}: {:?}",
                receipt.block_number,
                tx_hash
            )),
            None => Err(eyre!("approval not confirmed in time: {:?}", tx_hash)),
        }
    }
}

impl FeeSource for ChainClient {
    async fn fee_data(&self) -> Result<FeeData> {
        // The oracle handles source fallback and caching; it always
        // produces a usable sample
        Ok(self.fee_oracle.fee_data().await)
    }
}

impl TxSubmitter for ChainClient {
    async fn estimate_call_gas(
        &self,
        to: Address,
        calldata: Bytes,
        value: U256,
    ) -> Result<Option<u64>> {
        let provider = self.provider()?;
        let tx = TransactionRequest::default()
            .from(self.sender)
            .to(to)
            .input(calldata.into())
            .value(value);

        match provider.estimate_gas(tx).await {
            Ok(gas) => Ok(Some(gas as u64)),
            Err(e) => {
                // Most commonly the simulated call would revert
                warn!("Gas estimation failed: {}", e);
                Ok(None)
            }
        }
    }

    async fn submit_call(
        &self,
        to: Address,
        calldata: Bytes,
        value: U256,
        plan: &GasPlan,
    ) -> Result<B256> {
        self.sign_and_broadcast(to, calldata, value, plan).await
    }

    async fn wait_for_receipt(
        &self,
        tx_hash: B256,
        timeout: Duration,
    ) -> Result<Option<ReceiptInfo>> {
        let provider = self.provider()?;
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            if let Some(receipt) = provider
                .get_transaction_receipt(tx_hash)
                .await
                .map_err(|e| eyre!("receipt query failed: {e}"))?
            {
                let block_number = receipt.block_number.unwrap_or_default();
                let revert_reason = if receipt.status() {
                    None
                } else {
                    self.recover_revert_reason(tx_hash, block_number).await
                };
                return Ok(Some(ReceiptInfo {
                    tx_hash,
                    success: receipt.status(),
                    gas_used: receipt.gas_used as u64,
                    block_number,
                    revert_reason,
                }));
            }

            if tokio::time::Instant::now() >= deadline {
                // Abandoning the wait does not cancel the transaction
                debug!("Receipt wait timed out for {:?}", tx_hash);
                return Ok(None);
            }
            tokio::time::sleep(RECEIPT_POLL_INTERVAL).await;
        }
    }
}

impl PoolReader for ChainClient {
    async fn pool_state(&self, pool: Address) -> Result<PoolState> {
        let slot0_out = self
            .eth_call(pool, IUniswapV3Pool::slot0Call {}.abi_encode())
            .await?;
        let slot0 = IUniswapV3Pool::slot0Call::abi_decode_returns(&slot0_out)
            .map_err(|e| eyre!("failed to decode slot0: {e}"))?;

        let liquidity_out = self
            .eth_call(pool, IUniswapV3Pool::liquidityCall {}.abi_encode())
            .await?;
        let liquidity = IUniswapV3Pool::liquidityCall::abi_decode_returns(&liquidity_out)
            .map_err(|e| eyre!("failed to decode liquidity: {e}"))?;

        let spacing_out = self
            .eth_call(pool, IUniswapV3Pool::tickSpacingCall {}.abi_encode())
            .await?;
        let tick_spacing = IUniswapV3Pool::tickSpacingCall::abi_decode_returns(&spacing_out)
            .map_err(|e| eyre!("failed to decode tickSpacing: {e}"))?;

        Ok(PoolState {
            sqrt_price_x96: slot0.sqrtPriceX96.to::<U256>(),
            tick: slot0.tick.as_i32(),
            liquidity,
            tick_spacing: tick_spacing.as_i32(),
        })
    }
}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    // Well-known hardhat test key, never used with real funds
    const TEST_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    #[test]
    fn wallet_parses_key_with_and_without_prefix() {
        let with_prefix = WalletManager::new(TEST_KEY, 1).unwrap();
        let without_prefix = WalletManager::new(TEST_KEY.trim_start_matches("0x"), 1).unwrap();
        assert_eq!(with_prefix.address(), without_prefix.address());
    }

    #[test]
    fn wallet_rejects_garbage_key() {
        assert!(WalletManager::new("not-a-key", 1).is_err());
    }

    #[test]
    fn nonce_increments_locally() {
        let mut wallet = WalletManager::new(TEST_KEY, 1).unwrap();
        assert_eq!(wallet.get_nonce(), 0);
        assert_eq!(wallet.get_nonce(), 1);
        assert_eq!(wallet.get_nonce(), 2);
    }

    #[tokio::test]
    async fn signing_produces_raw_eip1559_bytes() {
        let mut wallet = WalletManager::new(TEST_KEY, 1).unwrap();
        let plan = GasPlan {
            gas_limit: 21_000,
            max_fee_per_gas: 30_000_000_000,
            max_priority_fee_per_gas: 1_000_000_000,
        };
        let raw = wallet
            .sign_transaction(Address::ZERO, Bytes::new(), U256::ZERO, &plan)
            .await
            .unwrap();
        assert!(!raw.is_empty());
        // Signing is deterministic for a fixed key and payload
        let mut wallet2 = WalletManager::new(TEST_KEY, 1).unwrap();
        let raw2 = wallet2
            .sign_transaction(Address::ZERO, Bytes::new(), U256::ZERO, &plan)
            .await
            .unwrap();
        assert_eq!(raw, raw2);
    }

    #[test]
    fn revert_reason_from_geth_style_message() {
        let message = r#"server returned an error response: error code 3: execution reverted: Too little received"#;
        assert_eq!(
            extract_revert_reason(message),
            Some("Too little received".to_string())
        );
    }

    #[test]
    fn revert_reason_from_abi_encoded_error_data() {
        let encoded = Revert {
            reason: "STF".to_string(),
        }
        .abi_encode();
        let message = format!(
            r#"execution reverted, data: "0x{}""#,
            hex::encode(&encoded)
        );
        assert_eq!(extract_revert_reason(&message), Some("STF".to_string()));
    }

    #[test]
    fn unrelated_errors_yield_no_reason() {
        assert_eq!(extract_revert_reason("connection refused"), None);
        assert_eq!(extract_revert_reason("execution reverted: "), None);
    }

    #[test]
    fn uninitialized_pool_state_is_detectable() {
        let state = PoolState {
            sqrt_price_x96: U256::ZERO,
            tick: 0,
            liquidity: 0,
            tick_spacing: 60,
        };
        assert!(!state.is_initialized());
    }
}
