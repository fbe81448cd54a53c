use std::{fmt::Display, str::FromStr, sync::LazyLock};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Amount of duffs in one DASH.
pub const DUFFS_PER_DASH: u64 = 100_000_000;

/// A Dash address that passed validation.
///
/// The rule is the one the bot always used: an `X` followed by 33 ASCII
/// letters or digits. Explorers are more or less lenient than that, but
/// this is what decides whether we accept an address from a user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DashAddress(String);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("not a valid Dash address: {0:?}")]
pub struct InvalidAddress(pub String);

impl DashAddress {
    pub fn parse(string: &str) -> Result<Self, InvalidAddress> {
        static ADDRESS_REGEX: LazyLock<Regex> =
            LazyLock::new(|| Regex::new("^X[a-zA-Z0-9]{33}$").expect("Regex will always be valid"));

        let string = string.trim();
        if ADDRESS_REGEX.is_match(string) {
            Ok(Self(string.to_owned()))
        } else {
            Err(InvalidAddress(string.to_owned()))
        }
    }

    pub fn as_str(&self) -> &str {
        self.as_ref()
    }
}

impl FromStr for DashAddress {
    type Err = InvalidAddress;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for DashAddress {
    type Error = InvalidAddress;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<DashAddress> for String {
    fn from(value: DashAddress) -> Self {
        value.0
    }
}

impl AsRef<str> for DashAddress {
    fn as_ref(&self) -> &str {
        self.0.as_ref()
    }
}

impl Display for DashAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// A single output of a transaction, as told by a block explorer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutput {
    /// Addresses this output pays to. Usually one, empty for `OP_RETURN` and such.
    pub addresses: Vec<String>,
    /// Value in duffs.
    pub value: u64,
}

/// A transaction normalized from whatever shape the explorer gave us.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub txid: String,
    pub outputs: Vec<TxOutput>,
    /// Block time, if it's in a block and the explorer said so.
    pub timestamp: Option<DateTime<Utc>>,
    pub confirmations: Option<u64>,
}

impl Transaction {
    /// Sum of the outputs that pay to this address, in duffs.
    ///
    /// Inputs are not subtracted, so a transaction that spends from the address
    /// and sends change back to it counts the change as received.
    pub fn received_by(&self, address: &DashAddress) -> u64 {
        self.outputs
            .iter()
            .filter(|output| output.addresses.iter().any(|a| a == address.as_str()))
            .fold(0u64, |sum, output| sum.saturating_add(output.value))
    }
}

/// Parse a decimal DASH amount like `"0.12345678"` into duffs, without going
/// through floats. Returns [`None`] on garbage or more than 8 decimal places.
pub fn parse_dash_amount(string: &str) -> Option<u64> {
    let string = string.trim();
    let (whole, fraction) = string.split_once('.').unwrap_or((string, ""));

    if whole.is_empty() && fraction.is_empty() {
        return None;
    }
    if !whole.bytes().all(|b| b.is_ascii_digit()) || !fraction.bytes().all(|b| b.is_ascii_digit())
    {
        return None;
    }

    // Trailing zeroes past the 8th place are fine, anything else isn't.
    let fraction = fraction.trim_end_matches('0');
    if fraction.len() > 8 {
        return None;
    }

    let whole: u64 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let fraction: u64 = if fraction.is_empty() {
        0
    } else {
        fraction.parse::<u64>().ok()? * 10u64.pow(8 - fraction.len() as u32)
    };

    whole.checked_mul(DUFFS_PER_DASH)?.checked_add(fraction)
}

/// Format duffs as a DASH amount with exactly 8 decimal places.
pub fn format_dash_amount(duffs: u64) -> String {
    format!("{}.{:08}", duffs / DUFFS_PER_DASH, duffs % DUFFS_PER_DASH)
}

/// Convert duffs to DASH as a float. Only for fiat estimates.
pub fn duffs_to_dash(duffs: u64) -> f64 {
    duffs as f64 / DUFFS_PER_DASH as f64
}
