use std::collections::HashMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use url::Url;

use crate::types::{DashAddress, Transaction, TxOutput};

pub const DEFAULT_BASE_URL: &str = "https://api.blockchair.com/dash";

pub fn request_url(base: &str, address: &DashAddress, limit: usize) -> Result<Url, url::ParseError> {
    Url::parse(&format!(
        "{base}/dashboards/address/{address}?transaction_details=true&limit={limit}"
    ))
}

#[derive(Deserialize)]
struct Dashboard {
    #[serde(default)]
    data: HashMap<String, AddressData>,
    context: Option<Context>,
}

#[derive(Deserialize)]
struct Context {
    /// Height of the latest block.
    state: Option<i64>,
}

#[derive(Deserialize)]
struct AddressData {
    #[serde(default)]
    transactions: Vec<Tx>,
}

#[derive(Deserialize)]
struct Tx {
    hash: String,
    /// `-1` while in the mempool.
    block_id: i64,
    /// Like `2024-02-29 09:30:00`, in UTC.
    time: Option<String>,
    /// Net change of the address balance, in duffs.
    balance_change: i64,
}

fn parse_time(time: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(time, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|x| x.and_utc())
}

/// Blockchair only tells how much the balance of the address changed, not the
/// outputs. A positive change becomes one output to the address; anything else
/// becomes no outputs at all.
pub fn parse(body: &str, address: &DashAddress) -> Result<Vec<Transaction>, serde_json::Error> {
    let mut response: Dashboard = serde_json::from_str(body)?;
    let tip = response.context.and_then(|x| x.state);

    let Some(data) = response.data.remove(address.as_str()) else {
        return Ok(Vec::new());
    };

    Ok(data
        .transactions
        .into_iter()
        .map(|tx| {
            let in_block = tx.block_id >= 0;
            let confirmations = match (in_block, tip) {
                (false, _) => Some(0),
                (true, Some(tip)) if tip >= tx.block_id => u64::try_from(tip - tx.block_id + 1).ok(),
                (true, _) => None,
            };
            let outputs = match u64::try_from(tx.balance_change) {
                Ok(value) if value > 0 => vec![TxOutput {
                    addresses: vec![address.to_string()],
                    value,
                }],
                _ => Vec::new(),
            };

            Transaction {
                txid: tx.hash,
                outputs,
                timestamp: in_block
                    .then(|| tx.time.as_deref().and_then(parse_time))
                    .flatten(),
                confirmations,
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    const ADDRESS: &str = "XpESxaUmonkq8RaLLp46Brx2K39ggQe226";

    #[test]
    fn parses_dashboard() {
        let address = DashAddress::parse(ADDRESS).unwrap();
        let body = format!(
            r#"{{
                "data": {{
                    "{ADDRESS}": {{
                        "address": {{"type": "pubkeyhash", "balance": 150000000}},
                        "transactions": [
                            {{"block_id": -1, "hash": "cccc", "time": "2024-03-01 10:00:00", "balance_change": 5}},
                            {{"block_id": 2000000, "hash": "bbbb", "time": "2024-02-29 09:30:00", "balance_change": -20000}},
                            {{"block_id": 1999990, "hash": "aaaa", "time": "2024-02-29 09:00:00", "balance_change": 150000000}}
                        ]
                    }}
                }},
                "context": {{"code": 200, "state": 2000009}}
            }}"#
        );

        let txs = parse(&body, &address).unwrap();
        assert_eq!(txs.len(), 3);

        assert_eq!(txs[0].txid, "cccc");
        assert_eq!(txs[0].confirmations, Some(0));
        assert_eq!(txs[0].timestamp, None);
        assert_eq!(txs[0].received_by(&address), 5);

        // Sent from the address, so nothing was received.
        assert_eq!(txs[1].confirmations, Some(10));
        assert_eq!(txs[1].received_by(&address), 0);

        assert_eq!(txs[2].confirmations, Some(20));
        assert_eq!(txs[2].received_by(&address), 150_000_000);
        assert_eq!(
            txs[2].timestamp.unwrap().to_rfc3339(),
            "2024-02-29T09:00:00+00:00"
        );
    }

    #[test]
    fn unknown_address() {
        let address = DashAddress::parse(ADDRESS).unwrap();
        assert!(parse(r#"{"data": [], "context": {"code": 404}}"#, &address).is_err());
        assert!(parse(r#"{"data": {}, "context": {"code": 200}}"#, &address)
            .unwrap()
            .is_empty());
    }
}
