//! Everything that talks to block explorers.
//!
//! Each explorer answers in its own shape, so each gets a module that turns
//! its answer into [`Transaction`]s. Nothing outside of this module should
//! care which explorer is in use.

mod blockchair;
mod blockcypher;
mod coingecko;
mod insight;
mod sochain;

use std::{fmt::Display, future::Future, str::FromStr, time::Duration};

use url::Url;

use crate::types::{DashAddress, Transaction};

/// How many of the latest transactions are asked for per address.
pub const RECENT_TRANSACTIONS_LIMIT: usize = 10;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);
const RATE_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub trait ChainGateway: Send + Sync {
    /// Latest transactions touching this address, newest first.
    ///
    /// Returns an empty list if anything goes wrong. That means "no news",
    /// not "no transactions".
    fn fetch_recent_transactions(
        &self,
        address: &DashAddress,
    ) -> impl Future<Output = Vec<Transaction>> + Send;

    /// Price of one DASH in USD, or [`None`] if it couldn't be fetched.
    fn fetch_exchange_rate(&self) -> impl Future<Output = Option<f64>> + Send;
}

/// Supported block explorers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    BlockCypher,
    Blockchair,
    Insight,
    SoChain,
}

impl Provider {
    pub const ALL: [Provider; 4] = [
        Provider::BlockCypher,
        Provider::Blockchair,
        Provider::Insight,
        Provider::SoChain,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Provider::BlockCypher => "blockcypher",
            Provider::Blockchair => "blockchair",
            Provider::Insight => "insight",
            Provider::SoChain => "sochain",
        }
    }

    pub fn default_base_url(self) -> Url {
        let url = match self {
            Provider::BlockCypher => blockcypher::DEFAULT_BASE_URL,
            Provider::Blockchair => blockchair::DEFAULT_BASE_URL,
            Provider::Insight => insight::DEFAULT_BASE_URL,
            Provider::SoChain => sochain::DEFAULT_BASE_URL,
        };
        Url::parse(url).expect("Default URLs will always be valid")
    }

    fn request_url(self, base: &Url, address: &DashAddress) -> Result<Url, url::ParseError> {
        let base = base.as_str().trim_end_matches('/');
        let limit = RECENT_TRANSACTIONS_LIMIT;
        match self {
            Provider::BlockCypher => blockcypher::request_url(base, address, limit),
            Provider::Blockchair => blockchair::request_url(base, address, limit),
            Provider::Insight => insight::request_url(base, address),
            Provider::SoChain => sochain::request_url(base, address),
        }
    }

    fn parse(self, body: &str, address: &DashAddress) -> Result<Vec<Transaction>, serde_json::Error> {
        let mut transactions = match self {
            Provider::BlockCypher => blockcypher::parse(body)?,
            Provider::Blockchair => blockchair::parse(body, address)?,
            Provider::Insight => insight::parse(body)?,
            Provider::SoChain => sochain::parse(body, address)?,
        };
        transactions.truncate(RECENT_TRANSACTIONS_LIMIT);
        Ok(transactions)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown provider {0:?}, expected one of: blockcypher, blockchair, insight, sochain")]
pub struct UnknownProvider(pub String);

impl FromStr for Provider {
    type Err = UnknownProvider;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|x| x.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownProvider(s.to_owned()))
    }
}

impl Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Why a fetch came back empty. Only ever logged.
#[derive(Debug, thiserror::Error)]
enum FetchError {
    #[error("bad URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("unexpected response: {0}")]
    Parse(#[from] serde_json::Error),
}

/// The real gateway, over HTTP.
pub struct HttpGateway {
    client: reqwest::Client,
    provider: Provider,
    base_url: Url,
    rate_url: Url,
}

impl HttpGateway {
    /// # Errors
    ///
    /// Fails if the HTTP client can't be built, which is about as likely as it sounds.
    pub fn new(provider: Provider, base_url: Option<Url>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("dash_watch_bot/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            provider,
            base_url: base_url.unwrap_or_else(|| provider.default_base_url()),
            rate_url: Url::parse(coingecko::PRICE_URL).expect("Price URL will always be valid"),
        })
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    async fn get_text(&self, url: Url, timeout: Duration) -> Result<String, reqwest::Error> {
        self.client
            .get(url)
            .timeout(timeout)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await
    }

    async fn try_fetch_transactions(
        &self,
        address: &DashAddress,
    ) -> Result<Vec<Transaction>, FetchError> {
        let url = self.provider.request_url(&self.base_url, address)?;
        let body = self.get_text(url, REQUEST_TIMEOUT).await?;
        Ok(self.provider.parse(&body, address)?)
    }

    async fn try_fetch_rate(&self) -> Result<Option<f64>, FetchError> {
        let body = self.get_text(self.rate_url.clone(), RATE_REQUEST_TIMEOUT).await?;
        Ok(coingecko::parse(&body)?)
    }
}

impl ChainGateway for HttpGateway {
    async fn fetch_recent_transactions(&self, address: &DashAddress) -> Vec<Transaction> {
        match self.try_fetch_transactions(address).await {
            Ok(transactions) => transactions,
            Err(e) => {
                log::warn!("Fetching transactions of {address} from {} failed: {e}", self.provider);
                Vec::new()
            }
        }
    }

    async fn fetch_exchange_rate(&self) -> Option<f64> {
        match self.try_fetch_rate().await {
            Ok(rate) => rate,
            Err(e) => {
                log::warn!("Fetching the DASH price failed: {e}");
                None
            }
        }
    }
}
