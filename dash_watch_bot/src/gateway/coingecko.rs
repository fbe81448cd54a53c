use serde::Deserialize;

pub const PRICE_URL: &str = "https://api.coingecko.com/api/v3/simple/price?ids=dash&vs_currencies=usd";

#[derive(Deserialize)]
struct SimplePrice {
    dash: Option<Prices>,
}

#[derive(Deserialize)]
struct Prices {
    usd: Option<f64>,
}

/// A price of zero or less is as good as no price.
pub fn parse(body: &str) -> Result<Option<f64>, serde_json::Error> {
    let response: SimplePrice = serde_json::from_str(body)?;
    Ok(response
        .dash
        .and_then(|x| x.usd)
        .filter(|x| x.is_finite() && *x > 0.0))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn parses_price() {
        assert_eq!(parse(r#"{"dash": {"usd": 31.42}}"#).unwrap(), Some(31.42));
        assert_eq!(parse(r#"{"dash": {"usd": 0}}"#).unwrap(), None);
        assert_eq!(parse(r#"{"dash": {}}"#).unwrap(), None);
        assert_eq!(parse(r#"{}"#).unwrap(), None);
        assert!(parse("Throttled").is_err());
    }
}
