use chrono::{DateTime, Utc};
use serde::Deserialize;
use url::Url;

use crate::types::{parse_dash_amount, DashAddress, Transaction, TxOutput, DUFFS_PER_DASH};

pub const DEFAULT_BASE_URL: &str = "https://insight.dash.org/insight-api";

/// Insight has no limit parameter, the first page is as good.
pub fn request_url(base: &str, address: &DashAddress) -> Result<Url, url::ParseError> {
    Url::parse(&format!("{base}/txs?address={address}"))
}

#[derive(Deserialize)]
struct TxPage {
    #[serde(default)]
    txs: Vec<Tx>,
}

#[derive(Deserialize)]
struct Tx {
    txid: String,
    /// Only there once it's in a block.
    blocktime: Option<i64>,
    confirmations: Option<u64>,
    #[serde(default)]
    vout: Vec<Vout>,
}

#[derive(Deserialize)]
struct Vout {
    value: Value,
    #[serde(rename = "scriptPubKey")]
    script_pub_key: Option<ScriptPubKey>,
}

#[derive(Deserialize)]
struct ScriptPubKey {
    addresses: Option<Vec<String>>,
}

/// Some Insight deployments send amounts as strings, some as numbers.
#[derive(Deserialize)]
#[serde(untagged)]
enum Value {
    Text(String),
    Number(f64),
}

impl Value {
    fn duffs(&self) -> u64 {
        match self {
            Value::Text(text) => parse_dash_amount(text).unwrap_or_else(|| {
                log::warn!("Insight sent a weird amount: {text:?}");
                0
            }),
            Value::Number(number) if number.is_finite() && *number > 0.0 => {
                (number * DUFFS_PER_DASH as f64).round() as u64
            }
            Value::Number(_) => 0,
        }
    }
}

/// Already newest first.
pub fn parse(body: &str) -> Result<Vec<Transaction>, serde_json::Error> {
    let page: TxPage = serde_json::from_str(body)?;
    Ok(page
        .txs
        .into_iter()
        .map(|tx| Transaction {
            txid: tx.txid,
            outputs: tx
                .vout
                .into_iter()
                .map(|vout| TxOutput {
                    value: vout.value.duffs(),
                    addresses: vout
                        .script_pub_key
                        .and_then(|x| x.addresses)
                        .unwrap_or_default(),
                })
                .collect(),
            timestamp: tx.blocktime.and_then(|x| DateTime::<Utc>::from_timestamp(x, 0)),
            confirmations: tx.confirmations,
        })
        .collect())
}
