//! Pre-submission checks on a donation cart.
//!
//! Validators never fail fast: every problem is collected so the checkout can show all of
//! them at once. Inside the orchestrator the same amount parsing is fatal instead.

use alloy::primitives::{Address, U256};
use alloy::primitives::utils::{ParseUnits, parse_units};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::str::FromStr;

use crate::config::GasEstimateConfig;
use crate::error::DonationError;
use crate::types::Payment;

/// Largest token precision accepted at checkout.
pub const MAX_DECIMALS: u8 = 18;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmountError {
    #[error("amount is empty")]
    Empty,
    #[error("amount is negative")]
    Negative,
    #[error("amount is not a valid decimal: {0}")]
    Unparseable(String),
}

/// Parse a decimal amount into the token's smallest unit.
pub fn parse_token_amount(amount: &str, decimals: u8) -> Result<U256, AmountError> {
    let trimmed = amount.trim();
    if trimmed.is_empty() {
        return Err(AmountError::Empty);
    }
    match parse_units(trimmed, decimals).map_err(|e| AmountError::Unparseable(e.to_string()))? {
        ParseUnits::U256(value) => Ok(value),
        ParseUnits::I256(value) if value.is_negative() => Err(AmountError::Negative),
        ParseUnits::I256(value) => Ok(value.into_raw()),
    }
}

/// True when `balance` covers `amount`, both decimal strings in the token's precision.
///
/// Anything that fails to parse counts as insufficient.
pub fn has_sufficient_balance(amount: &str, balance: &str, decimals: u8) -> bool {
    match (
        parse_token_amount(amount, decimals),
        parse_token_amount(balance, decimals),
    ) {
        (Ok(amount), Ok(balance)) => balance >= amount,
        _ => false,
    }
}

/// Outcome of [`validate_payments`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
}

/// Validate a cart against the donor's balances, keyed by `"{symbol}-{chain_id}"`.
pub fn validate_payments(
    payments: &[Payment],
    balances: &HashMap<String, String>,
) -> ValidationReport {
    validate_payments_with(payments, balances, has_sufficient_balance)
}

/// [`validate_payments`] with an explicit balance-sufficiency check.
pub fn validate_payments_with<F>(
    payments: &[Payment],
    balances: &HashMap<String, String>,
    sufficient: F,
) -> ValidationReport
where
    F: Fn(&str, &str, u8) -> bool,
{
    let mut errors = Vec::new();

    for payment in payments {
        let token = &payment.token;

        let amount_ok = matches!(
            parse_token_amount(&payment.amount, token.decimals.min(MAX_DECIMALS)),
            Ok(value) if !value.is_zero()
        );
        if !amount_ok {
            errors.push(format!(
                "Invalid amount {:?} for {} donation to project {}",
                payment.amount, token.symbol, payment.project_id
            ));
        }
        let decimals_ok = token.decimals <= MAX_DECIMALS;
        if !decimals_ok {
            errors.push(format!(
                "Invalid decimals {} for token {}",
                token.decimals, token.symbol
            ));
        }
        if !(amount_ok && decimals_ok) {
            continue;
        }

        let key = token.balance_key();
        match balances.get(&key) {
            None => errors.push(format!(
                "No balance found for {} on chain {}",
                token.symbol, token.chain_id
            )),
            Some(balance) => {
                if !sufficient(&payment.amount, balance, token.decimals) {
                    errors.push(format!(
                        "Insufficient {} balance on chain {}: need {}, have {}",
                        token.symbol, token.chain_id, payment.amount, balance
                    ));
                }
            }
        }
    }

    ValidationReport {
        valid: errors.is_empty(),
        errors,
    }
}

/// Static gas estimate in gas units: per-transfer constants plus one batch overhead per chain.
pub fn estimated_gas_units(payments: &[Payment], gas: &GasEstimateConfig) -> u64 {
    let chains: BTreeSet<u64> = payments.iter().map(|p| p.chain_id).collect();
    let transfers: u64 = payments
        .iter()
        .map(|p| {
            if p.token.is_native {
                gas.native_transfer
            } else {
                gas.erc20_transfer
            }
        })
        .sum();
    transfers + chains.len() as u64 * gas.per_chain_overhead
}

/// Human-readable static gas estimate, e.g. `"~236,000 gas"`.
pub fn get_estimated_gas_cost(payments: &[Payment]) -> String {
    let units = estimated_gas_units(payments, &GasEstimateConfig::default());
    format!("~{} gas", group_thousands(units))
}

/// Parse a project's payout address.
///
/// All-lowercase and all-uppercase hex are accepted as is; mixed case must carry a valid
/// EIP-55 checksum.
pub fn validate_payout_address(
    project_id: &str,
    chain_id: u64,
    raw: Option<&str>,
) -> Result<Address, DonationError> {
    let raw = raw.map(str::trim).unwrap_or_default();
    if raw.is_empty() {
        return Err(DonationError::MissingPayoutAddress {
            project_id: project_id.to_string(),
            chain_id,
        });
    }
    let invalid = || DonationError::InvalidPayoutAddress {
        project_id: project_id.to_string(),
        address: raw.to_string(),
    };

    let hex = raw.strip_prefix("0x").ok_or_else(invalid)?;
    if hex.len() != 40 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(invalid());
    }
    let has_lower = hex.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = hex.chars().any(|c| c.is_ascii_uppercase());
    if has_lower && has_upper {
        Address::parse_checksummed(raw, None).map_err(|_| invalid())
    } else {
        Address::from_str(raw).map_err(|_| invalid())
    }
}

fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{erc20_payment, native_payment};
    use std::cell::Cell;

    fn balances(entries: &[(&str, &str)]) -> HashMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_parse_token_amount() {
        assert_eq!(
            parse_token_amount("1.5", 6).unwrap(),
            U256::from(1_500_000u64)
        );
        assert_eq!(parse_token_amount(" 2 ", 0).unwrap(), U256::from(2));
        assert_eq!(parse_token_amount("-1", 18), Err(AmountError::Negative));
        assert_eq!(parse_token_amount("", 18), Err(AmountError::Empty));
        assert!(matches!(
            parse_token_amount("abc", 18),
            Err(AmountError::Unparseable(_))
        ));
    }

    #[test]
    fn test_invalid_amounts_skip_balance_check() {
        let calls = Cell::new(0);
        let payments = vec![
            native_payment("p1", "0", 10),
            native_payment("p2", "-100", 10),
        ];
        let report = validate_payments_with(&payments, &balances(&[("ETH-10", "5")]), |_, _, _| {
            calls.set(calls.get() + 1);
            true
        });

        assert!(!report.valid);
        assert_eq!(report.errors.len(), 2);
        assert!(report.errors.iter().all(|e| e.contains("Invalid amount")));
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn test_balance_check_runs_for_valid_amount() {
        let calls = Cell::new(0);
        let payments = vec![native_payment("p1", "1", 10)];
        let report = validate_payments_with(&payments, &balances(&[("ETH-10", "5")]), |_, _, _| {
            calls.set(calls.get() + 1);
            false
        });

        assert_eq!(calls.get(), 1);
        assert!(!report.valid);
        assert!(report.errors[0].contains("Insufficient ETH balance"));
    }

    #[test]
    fn test_errors_accumulate() {
        let mut bad_decimals = erc20_payment("p2", "1", 10);
        bad_decimals.token.decimals = 24;
        let payments = vec![
            native_payment("p1", "0", 10),
            bad_decimals,
            erc20_payment("p3", "1", 8453),
            native_payment("p4", "3", 10),
        ];
        let report = validate_payments(&payments, &balances(&[("ETH-10", "2")]));

        assert!(!report.valid);
        assert_eq!(report.errors.len(), 4);
        assert!(report.errors[0].contains("Invalid amount"));
        assert!(report.errors[1].contains("Invalid decimals"));
        assert!(report.errors[2].contains("No balance found for DAI on chain 8453"));
        assert!(report.errors[3].contains("Insufficient ETH balance"));
    }

    #[test]
    fn test_bad_amount_and_decimals_both_reported() {
        let calls = Cell::new(0);
        let mut payment = erc20_payment("p1", "abc", 10);
        payment.token.decimals = 30;
        let report = validate_payments_with(&[payment], &balances(&[("DAI-10", "5")]), |_, _, _| {
            calls.set(calls.get() + 1);
            true
        });

        assert_eq!(report.errors.len(), 2);
        assert!(report.errors[0].contains("Invalid amount"));
        assert!(report.errors[1].contains("Invalid decimals 30"));
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn test_valid_cart() {
        let payments = vec![native_payment("p1", "0.5", 10), erc20_payment("p2", "10", 10)];
        let report = validate_payments(
            &payments,
            &balances(&[("ETH-10", "1.0"), ("DAI-10", "10")]),
        );
        assert_eq!(
            report,
            ValidationReport {
                valid: true,
                errors: vec![]
            }
        );
    }

    #[test]
    fn test_unparseable_balance_is_insufficient() {
        assert!(!has_sufficient_balance("1", "lots", 18));
        assert!(has_sufficient_balance("1", "1.000", 18));
        assert!(!has_sufficient_balance("1.01", "1", 2));
    }

    #[test]
    fn test_gas_estimate_single_chain() {
        let payments = vec![native_payment("p1", "1", 10), erc20_payment("p2", "1", 10)];
        assert_eq!(
            estimated_gas_units(&payments, &GasEstimateConfig::default()),
            21_000 + 95_000 + 120_000
        );
        assert_eq!(get_estimated_gas_cost(&payments), "~236,000 gas");
    }

    #[test]
    fn test_gas_estimate_counts_each_chain_once() {
        let payments = vec![
            erc20_payment("p1", "1", 10),
            erc20_payment("p2", "1", 10),
            native_payment("p3", "1", 8453),
        ];
        assert_eq!(
            estimated_gas_units(&payments, &GasEstimateConfig::default()),
            2 * 95_000 + 21_000 + 2 * 120_000
        );
        assert_eq!(get_estimated_gas_cost(&[]), "~0 gas");
    }

    #[test]
    fn test_payout_address_missing() {
        for raw in [None, Some(""), Some("   ")] {
            let err = validate_payout_address("p1", 10, raw).unwrap_err();
            assert!(err.to_string().contains("Missing payout address"));
        }
    }

    #[test]
    fn test_payout_address_casing() {
        let checksummed = "0x6B175474E89094C44Da98b954EedeAC495271d0F";
        let lower = checksummed.to_lowercase();
        let upper = format!("0x{}", checksummed[2..].to_uppercase());
        let expected = Address::from_str(checksummed).unwrap();

        assert_eq!(validate_payout_address("p1", 10, Some(checksummed)).unwrap(), expected);
        assert_eq!(validate_payout_address("p1", 10, Some(&lower)).unwrap(), expected);
        assert_eq!(validate_payout_address("p1", 10, Some(&upper)).unwrap(), expected);

        // One flipped letter breaks the checksum.
        let broken = "0x6b175474E89094C44Da98b954EedeAC495271d0F";
        let err = validate_payout_address("p1", 10, Some(broken)).unwrap_err();
        assert!(err.to_string().contains("Invalid payout address"));
    }

    #[test]
    fn test_payout_address_malformed() {
        for raw in ["not-an-address", "0x1234", "6B175474E89094C44Da98b954EedeAC495271d0F", "0xZZ175474e89094c44da98b954eedeac495271d0f"] {
            let err = validate_payout_address("p1", 10, Some(raw)).unwrap_err();
            assert!(matches!(err, DonationError::InvalidPayoutAddress { .. }), "{raw}");
        }
    }
}
