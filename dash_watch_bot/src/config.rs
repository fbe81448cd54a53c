use std::{fs, path::PathBuf, str::FromStr, time::Duration};

use thiserror::Error;
use url::Url;

use crate::{gateway::Provider, poll_loop::PollTiming};

pub const DEFAULT_WEBHOOK_PORT: u16 = 5000;

/// File the bot token is read from when `BOT_TOKEN` isn't set.
pub const KEY_FILE: &str = if cfg!(debug_assertions) {
    "key_debug"
} else {
    "key"
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no bot token: set BOT_TOKEN or put it into the \"{KEY_FILE}\" file")]
    MissingToken,
    #[error("{name} is not valid ({value:?}): {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookConfig {
    /// Full URL Telegram will post to, bot token included.
    pub url: Url,
    pub port: u16,
}

#[derive(Clone)]
pub struct Config {
    pub token: String,
    pub provider: Provider,
    pub provider_url: Option<Url>,
    pub data_dir: PathBuf,
    pub poll: PollTiming,
    /// Long polling if this is `None`.
    pub webhook: Option<WebhookConfig>,
}

// No token in logs, please.
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("provider", &self.provider)
            .field("provider_url", &self.provider_url)
            .field("data_dir", &self.data_dir)
            .field("poll", &self.poll)
            .field("webhook_port", &self.webhook.as_ref().map(|x| x.port))
            .finish_non_exhaustive()
    }
}

impl Config {
    /// Read the config from environment variables, and a `.env` file if there is one.
    pub fn from_env() -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Ok(path) => log::info!("Loaded variables from {}", path.display()),
            Err(e) if e.not_found() => (),
            Err(e) => log::warn!("Failed to load the .env file: {e}"),
        }

        Self::from_lookup(
            |name| std::env::var(name).ok(),
            || fs::read_to_string(KEY_FILE).ok(),
        )
    }

    /// Build the config out of whatever `var` says.
    /// `key_file` is only asked if there's no `BOT_TOKEN`.
    pub fn from_lookup(
        var: impl Fn(&str) -> Option<String>,
        key_file: impl FnOnce() -> Option<String>,
    ) -> Result<Self, ConfigError> {
        // Unset and empty are the same thing here.
        let var = |name: &str| var(name).map(|x| x.trim().to_owned()).filter(|x| !x.is_empty());

        let token = var("BOT_TOKEN")
            .or_else(|| {
                key_file()
                    .map(|x| x.trim().to_owned())
                    .filter(|x| !x.is_empty())
            })
            .ok_or(ConfigError::MissingToken)?;

        let provider = match var("DASH_PROVIDER") {
            Some(value) => parse_var("DASH_PROVIDER", value)?,
            None => Provider::BlockCypher,
        };
        let provider_url = var("DASH_PROVIDER_URL")
            .map(|value| parse_var::<Url>("DASH_PROVIDER_URL", value))
            .transpose()?;

        let data_dir = var("DATA_DIR").map_or_else(|| PathBuf::from("."), PathBuf::from);

        let mut poll = PollTiming::default();
        if let Some(value) = var("POLL_INTERVAL_SECS") {
            poll.interval = parse_seconds("POLL_INTERVAL_SECS", value)?;
        }
        if let Some(value) = var("POLL_BACKOFF_SECS") {
            poll.backoff = parse_seconds("POLL_BACKOFF_SECS", value)?;
        }

        let webhook = match var("WEBHOOK_URL") {
            Some(value) => {
                let base: Url = parse_var("WEBHOOK_URL", value)?;
                let port = match var("WEBHOOK_PORT") {
                    Some(value) => parse_var("WEBHOOK_PORT", value)?,
                    None => DEFAULT_WEBHOOK_PORT,
                };
                Some(WebhookConfig {
                    url: webhook_url(base, &token)?,
                    port,
                })
            }
            None => None,
        };

        Ok(Config {
            token,
            provider,
            provider_url,
            data_dir,
            poll,
            webhook,
        })
    }
}

fn parse_var<T>(name: &'static str, value: String) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::Invalid {
        name,
        reason: e.to_string(),
        value,
    })
}

fn parse_seconds(name: &'static str, value: String) -> Result<Duration, ConfigError> {
    let secs: u64 = parse_var(name, value.clone())?;
    if secs == 0 {
        return Err(ConfigError::Invalid {
            name,
            value,
            reason: "must be at least one second".to_owned(),
        });
    }
    Ok(Duration::from_secs(secs))
}

/// Telegram posts updates to `<base>/<token>`, so nobody else can guess the path.
fn webhook_url(base: Url, token: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: &str| ConfigError::Invalid {
        name: "WEBHOOK_URL",
        value: base.to_string(),
        reason: reason.to_owned(),
    };
    if base.scheme() != "https" {
        return Err(invalid("Telegram only delivers to https URLs"));
    }

    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|()| invalid("can't have a path"))?
        .pop_if_empty()
        .push(token);
    Ok(url)
}
