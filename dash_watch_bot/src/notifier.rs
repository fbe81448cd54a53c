use std::fmt::Write;

use chrono::{DateTime, Utc};
use html_escape::{encode_double_quoted_attribute, encode_text};

use crate::types::{format_dash_amount, DashAddress};

/// Where transaction links point to.
const EXPLORER_TX_URL: &str = "https://blockchair.com/dash/transaction/";

/// Everything an alert about one incoming transaction says.
#[derive(Debug, Clone)]
pub struct Alert<'a> {
    pub address: &'a DashAddress,
    /// Received amount, in duffs.
    pub amount: u64,
    /// Same amount in USD, if the price is known.
    pub fiat: Option<f64>,
    pub txid: &'a str,
    pub timestamp: Option<DateTime<Utc>>,
    pub confirmations: Option<u64>,
    /// Display number of this transaction for this address.
    pub seq: u64,
}

/// Render an alert as Telegram HTML.
#[must_use]
pub fn format_alert(alert: &Alert) -> String {
    let mut text = String::new();

    // Writing to a String never fails, hence the `let _`s.
    let _ = writeln!(text, "🔔 <b>New incoming transaction #{}</b>\n", alert.seq);
    let _ = writeln!(
        text,
        "📌 Address: <code>{}</code>",
        encode_text(alert.address.as_str())
    );

    let _ = write!(
        text,
        "💰 Amount: <b>{}</b> DASH",
        format_dash_amount(alert.amount)
    );
    if let Some(fiat) = alert.fiat {
        let _ = write!(text, " (~${})", format_usd(fiat));
    }
    text.push('\n');

    match alert.timestamp {
        Some(timestamp) => {
            let _ = writeln!(text, "🕒 Time: {}", timestamp.format("%Y-%m-%d %H:%M:%S UTC"));
        }
        None => text.push_str("🕒 Time: pending\n"),
    }

    match alert.confirmations {
        Some(0) => text.push_str("⏳ Unconfirmed\n"),
        Some(confirmations) => {
            let _ = writeln!(text, "✅ Confirmations: {confirmations}");
        }
        None => (),
    }

    let _ = writeln!(
        text,
        "🆔 TxID: <code>{}</code>",
        encode_text(&shorten_txid(alert.txid))
    );
    let _ = write!(
        text,
        "🔗 <a href=\"{}{}\">View on Blockchair</a>",
        EXPLORER_TX_URL,
        encode_double_quoted_attribute(alert.txid)
    );

    text
}

/// `0123456789abcdef...` into `012345...abcdef`. Short ones are left alone.
fn shorten_txid(txid: &str) -> String {
    let chars: Vec<char> = txid.chars().collect();
    if chars.len() <= 15 {
        return txid.to_owned();
    }
    let head: String = chars[..6].iter().collect();
    let tail: String = chars[chars.len() - 6..].iter().collect();
    format!("{head}...{tail}")
}

/// Format like `1,234.56`.
#[must_use]
pub fn format_usd(amount: f64) -> String {
    let cents = (amount.abs() * 100.0).round() as u64;
    let whole = (cents / 100).to_string();

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, digit) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }

    let sign = if amount < 0.0 && cents > 0 { "-" } else { "" };
    format!("{sign}{grouped}.{:02}", cents % 100)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use chrono::TimeZone;

    use super::*;

    const TXID: &str = "4e6d2bcd7c1a3fb0e5a90d6dbd7a0e3ad0fba3e5a1b2c3d4e5f60718293a4b5c";

    fn address() -> DashAddress {
        DashAddress::parse("XpESxaUmonkq8RaLLp46Brx2K39ggQe226").unwrap()
    }

    #[test]
    fn full_alert() {
        let address = address();
        let text = format_alert(&Alert {
            address: &address,
            amount: 123_456_789,
            fiat: Some(38.79),
            txid: TXID,
            timestamp: Some(Utc.with_ymd_and_hms(2024, 2, 29, 9, 30, 0).unwrap()),
            confirmations: Some(3),
            seq: 7,
        });

        assert_eq!(
            text,
            concat!(
                "🔔 <b>New incoming transaction #7</b>\n\n",
                "📌 Address: <code>XpESxaUmonkq8RaLLp46Brx2K39ggQe226</code>\n",
                "💰 Amount: <b>1.23456789</b> DASH (~$38.79)\n",
                "🕒 Time: 2024-02-29 09:30:00 UTC\n",
                "✅ Confirmations: 3\n",
                "🆔 TxID: <code>4e6d2b...3a4b5c</code>\n",
                "🔗 <a href=\"https://blockchair.com/dash/transaction/",
                "4e6d2bcd7c1a3fb0e5a90d6dbd7a0e3ad0fba3e5a1b2c3d4e5f60718293a4b5c",
                "\">View on Blockchair</a>"
            )
        );
    }

    #[test]
    fn bare_alert() {
        let address = address();
        let text = format_alert(&Alert {
            address: &address,
            amount: 1,
            fiat: None,
            txid: "short<id>",
            timestamp: None,
            confirmations: None,
            seq: 1,
        });

        assert!(text.contains("<b>0.00000001</b> DASH\n"));
        assert!(!text.contains("~$"));
        assert!(text.contains("🕒 Time: pending\n"));
        assert!(!text.contains("Confirmations"));
        assert!(text.contains("<code>short&lt;id&gt;</code>"));
    }

    #[test]
    fn unconfirmed() {
        let address = address();
        let text = format_alert(&Alert {
            address: &address,
            amount: 1,
            fiat: None,
            txid: TXID,
            timestamp: None,
            confirmations: Some(0),
            seq: 2,
        });
        assert!(text.contains("⏳ Unconfirmed\n"));
    }

    #[test]
    fn usd() {
        assert_eq!(format_usd(0.0), "0.00");
        assert_eq!(format_usd(0.005), "0.01");
        assert_eq!(format_usd(999.999), "1,000.00");
        assert_eq!(format_usd(1234567.891), "1,234,567.89");
        assert_eq!(format_usd(123456.0), "123,456.00");
        assert_eq!(format_usd(-12.5), "-12.50");
    }
}
