use chrono::{DateTime, Utc};
use serde::Deserialize;
use url::Url;

use crate::types::{DashAddress, Transaction, TxOutput};

pub const DEFAULT_BASE_URL: &str = "https://api.blockcypher.com/v1/dash/main";

pub fn request_url(base: &str, address: &DashAddress, limit: usize) -> Result<Url, url::ParseError> {
    Url::parse(&format!("{base}/addrs/{address}/full?limit={limit}"))
}

#[derive(Deserialize)]
struct AddressFull {
    #[serde(default)]
    txs: Vec<Tx>,
}

#[derive(Deserialize)]
struct Tx {
    hash: String,
    /// Absent while in the mempool.
    confirmed: Option<DateTime<Utc>>,
    confirmations: Option<u64>,
    #[serde(default)]
    outputs: Vec<Output>,
}

#[derive(Deserialize)]
struct Output {
    value: u64,
    /// `null` for things like `OP_RETURN`.
    addresses: Option<Vec<String>>,
}

/// Already newest first, with mempool transactions on top.
pub fn parse(body: &str) -> Result<Vec<Transaction>, serde_json::Error> {
    let response: AddressFull = serde_json::from_str(body)?;
    Ok(response
        .txs
        .into_iter()
        .map(|tx| Transaction {
            txid: tx.hash,
            outputs: tx
                .outputs
                .into_iter()
                .map(|output| TxOutput {
                    addresses: output.addresses.unwrap_or_default(),
                    value: output.value,
                })
                .collect(),
            timestamp: tx.confirmed,
            confirmations: tx.confirmations,
        })
        .collect())
}
