//! Swap reports - one JSON line per execution attempt

use alloy_primitives::{Address, U256};
use chrono::{DateTime, Utc};
use eyre::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::Path;

use crate::quoter::FeeTier;

use super::SwapOutcome;

/// Record of one swap attempt, appended to the report file as a JSON line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapReport {
    pub timestamp: DateTime<Utc>,
    pub token_in: Address,
    pub token_out: Address,
    pub amount_in: U256,
    pub slippage_bps: u32,
    pub fee_tier: Option<FeeTier>,
    pub outcome: String,
    pub tx_hash: Option<String>,
    pub amount_out: Option<U256>,
    /// Decoded revert reason, when the attempt reverted
    pub reason: Option<String>,
}

impl SwapReport {
    pub fn from_outcome(
        token_in: Address,
        token_out: Address,
        amount_in: U256,
        slippage_bps: u32,
        outcome: &SwapOutcome,
    ) -> Self {
        let (label, tx_hash, amount_out, fee_tier, reason) = match outcome {
            SwapOutcome::Success { tx_hash, amount_out } => (
                "success",
                Some(format!("{tx_hash:?}")),
                Some(*amount_out),
                None,
                None,
            ),
            SwapOutcome::QuoteFailed { fee_tier } => {
                ("quote-failed", None, None, Some(*fee_tier), None)
            }
            SwapOutcome::InsufficientBalance => ("insufficient-balance", None, None, None, None),
            SwapOutcome::InsufficientLiquidity => {
                ("insufficient-liquidity", None, None, None, None)
            }
            SwapOutcome::Reverted { reason } => {
                ("reverted", None, None, None, Some(reason.clone()))
            }
            SwapOutcome::Timeout { tx_hash } => {
                ("timeout", Some(format!("{tx_hash:?}")), None, None, None)
            }
        };

        Self {
            timestamp: Utc::now(),
            token_in,
            token_out,
            amount_in,
            slippage_bps,
            fee_tier,
            outcome: label.to_string(),
            tx_hash,
            amount_out,
            reason,
        }
    }

    /// Append this report to a file
    pub fn append_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;

        let json = serde_json::to_string(self)?;
        writeln!(file, "{}", json)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::B256;

    #[test]
    fn success_report_carries_hash_and_amount() {
        let outcome = SwapOutcome::Success {
            tx_hash: B256::repeat_byte(0xcd),
            amount_out: U256::from(777u32),
        };
        let report = SwapReport::from_outcome(
            Address::repeat_byte(0x11),
            Address::repeat_byte(0x22),
            U256::from(100u32),
            50,
            &outcome,
        );
        assert_eq!(report.outcome, "success");
        assert_eq!(report.amount_out, Some(U256::from(777u32)));
        assert!(report.tx_hash.unwrap().contains("cdcd"));
    }

    #[test]
    fn reverted_report_persists_the_reason() {
        let outcome = SwapOutcome::Reverted {
            reason: "Too little received".to_string(),
        };
        let report = SwapReport::from_outcome(
            Address::repeat_byte(0x11),
            Address::repeat_byte(0x22),
            U256::from(100u32),
            50,
            &outcome,
        );
        assert_eq!(report.outcome, "reverted");
        assert_eq!(report.reason.as_deref(), Some("Too little received"));

        let json = serde_json::to_string(&report).unwrap();
        let parsed: SwapReport = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.reason.as_deref(), Some("Too little received"));
    }

    #[test]
    fn timeout_report_keeps_the_hash_for_requerying() {
        let outcome = SwapOutcome::Timeout {
            tx_hash: B256::repeat_byte(0xab),
        };
        let report = SwapReport::from_outcome(
            Address::repeat_byte(0x11),
            Address::repeat_byte(0x22),
            U256::from(100u32),
            50,
            &outcome,
        );
        assert_eq!(report.outcome, "timeout");
        assert!(report.tx_hash.is_some());
        assert!(report.amount_out.is_none());
    }

    #[test]
    fn reports_append_as_json_lines() {
        let dir = std::env::temp_dir().join("tidepool-report-test");
        let path = dir.join("swaps.jsonl");
        let _ = fs::remove_file(&path);

        for outcome in [
            SwapOutcome::InsufficientBalance,
            SwapOutcome::InsufficientLiquidity,
        ] {
            SwapReport::from_outcome(
                Address::repeat_byte(0x11),
                Address::repeat_byte(0x22),
                U256::from(5u32),
                30,
                &outcome,
            )
            .append_to_file(&path)
            .unwrap();
        }

        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        for line in lines {
            let parsed: SwapReport = serde_json::from_str(line).unwrap();
            assert_eq!(parsed.slippage_bps, 30);
        }
        let _ = fs::remove_file(&path);
    }
}
