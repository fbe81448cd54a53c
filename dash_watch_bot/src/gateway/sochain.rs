use chrono::{DateTime, Utc};
use serde::Deserialize;
use url::Url;

use crate::types::{parse_dash_amount, DashAddress, Transaction, TxOutput};

pub const DEFAULT_BASE_URL: &str = "https://sochain.com/api/v2";

pub fn request_url(base: &str, address: &DashAddress) -> Result<Url, url::ParseError> {
    Url::parse(&format!("{base}/get_tx_received/DASH/{address}"))
}

#[derive(Deserialize)]
struct Response {
    status: String,
    data: Option<Data>,
}

#[derive(Deserialize)]
struct Data {
    #[serde(default)]
    txs: Vec<Received>,
}

/// One output paying to the address. A transaction paying it twice shows up twice.
#[derive(Deserialize)]
struct Received {
    txid: String,
    value: String,
    confirmations: Option<u64>,
    time: Option<i64>,
}

/// SoChain lists received outputs, so every output here goes to the address.
/// Outputs of the same transaction are merged, and the result is sorted newest first.
pub fn parse(body: &str, address: &DashAddress) -> Result<Vec<Transaction>, serde_json::Error> {
    let response: Response = serde_json::from_str(body)?;
    if response.status != "success" {
        log::warn!("SoChain said {:?} about {address}", response.status);
        return Ok(Vec::new());
    }
    let Some(data) = response.data else {
        return Ok(Vec::new());
    };

    let mut received = data.txs;
    // Stable, so same-time outputs keep their order. Mempool ones count as newest.
    received.sort_by_key(|x| {
        std::cmp::Reverse((x.confirmations == Some(0), x.time.unwrap_or(i64::MAX)))
    });

    let mut transactions: Vec<Transaction> = Vec::new();
    for output in received {
        let Some(value) = parse_dash_amount(&output.value) else {
            log::warn!("SoChain sent a weird amount: {:?}", output.value);
            continue;
        };
        let output_entry = TxOutput {
            addresses: vec![address.to_string()],
            value,
        };

        if let Some(existing) = transactions.iter_mut().find(|x| x.txid == output.txid) {
            existing.outputs.push(output_entry);
            continue;
        }

        let in_block = output.confirmations.is_some_and(|x| x > 0);
        transactions.push(Transaction {
            txid: output.txid,
            outputs: vec![output_entry],
            timestamp: output
                .time
                .filter(|_| in_block)
                .and_then(|x| DateTime::<Utc>::from_timestamp(x, 0)),
            confirmations: output.confirmations,
        });
    }

    Ok(transactions)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    const ADDRESS: &str = "XpESxaUmonkq8RaLLp46Brx2K39ggQe226";

    #[test]
    fn merges_and_sorts() {
        let address = DashAddress::parse(ADDRESS).unwrap();
        let body = r#"{
            "status": "success",
            "data": {
                "network": "DASH",
                "address": "XpESxaUmonkq8RaLLp46Brx2K39ggQe226",
                "txs": [
                    {"txid": "aaaa", "output_no": 0, "value": "0.1", "confirmations": 30, "time": 1709198400},
                    {"txid": "bbbb", "output_no": 1, "value": "0.2", "confirmations": 3, "time": 1709287200},
                    {"txid": "aaaa", "output_no": 2, "value": "0.05", "confirmations": 30, "time": 1709198400},
                    {"txid": "cccc", "output_no": 0, "value": "1", "confirmations": 0, "time": 1709280000}
                ]
            }
        }"#;

        let txs = parse(body, &address).unwrap();
        let ids: Vec<&str> = txs.iter().map(|x| x.txid.as_str()).collect();
        assert_eq!(ids, vec!["cccc", "bbbb", "aaaa"]);
        assert_eq!(txs[0].timestamp, None);
        assert!(txs[1].timestamp.is_some());
        assert_eq!(txs[2].received_by(&address), 15_000_000);
    }

    #[test]
    fn failure_status() {
        let address = DashAddress::parse(ADDRESS).unwrap();
        let body = r#"{"status": "fail", "data": {"network": "Network is required (DOGE, DOGETEST, ...)"}}"#;
        assert!(parse(body, &address).unwrap().is_empty());
    }
}
