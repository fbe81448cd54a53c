use std::{sync::Arc, time::Duration};
use teloxide::{
    dptree::deps,
    prelude::*,
    update_listeners::webhooks::{self, Options},
    RequestError,
};

use crate::{
    config::Config,
    database::Database,
    gateway::HttpGateway,
    handlers::{self, commands::Command, AwaitingAddress},
    poll_loop::supervise_poll_loop,
};

/// Timeout for requests to Telegram. Long polling waits up to 10 seconds on its own.
const TELEGRAM_TIMEOUT: Duration = Duration::from_secs(20);

pub async fn entry() {
    log::info!("ASYNC WOOOO");

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            log::error!("Bad configuration: {e}");
            return;
        }
    };
    log::debug!("Running with {config:?}");

    let client = match teloxide::net::default_reqwest_settings()
        .timeout(TELEGRAM_TIMEOUT)
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            log::error!("Failed to build the Telegram HTTP client: {e}");
            return;
        }
    };
    let bot = Bot::with_client(config.token.clone(), client);

    if let Err(e) = bot.set_my_commands(Command::generate_bot_commands()).await {
        log::warn!("Failed to set bot commands: {e}");
    }

    let database = match Database::open(&config.data_dir) {
        Ok(database) => database,
        Err(e) => {
            log::error!("Failed to load the state files: {e}");
            return;
        }
    };

    let gateway = match HttpGateway::new(config.provider, config.provider_url.clone()) {
        Ok(gateway) => Arc::new(gateway),
        Err(e) => {
            log::error!("Failed to build the explorer HTTP client: {e}");
            return;
        }
    };
    log::info!("Watching addresses through {}", gateway.provider());

    tokio::spawn(supervise_poll_loop(
        Arc::downgrade(&database),
        gateway.clone(),
        bot.clone(),
        config.poll,
    ));

    let awaiting = Arc::new(AwaitingAddress::default());

    log::info!("Creating the handler...");

    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(handlers::handle_message))
        .endpoint(|| async { Ok::<(), RequestError>(()) }); // bye lol

    log::info!("Dispatching the dispatcher!");

    let mut dispatcher = Dispatcher::builder(bot.clone(), handler)
        .default_handler(|_| async {})
        .dependencies(deps![database, gateway, awaiting])
        .enable_ctrlc_handler()
        .build();

    match config.webhook {
        Some(webhook) => {
            let address = ([0, 0, 0, 0], webhook.port).into();
            match webhooks::axum(bot, Options::new(address, webhook.url)).await {
                Ok(listener) => {
                    log::info!("Receiving updates through a webhook on port {}", webhook.port);
                    dispatcher
                        .dispatch_with_listener(
                            listener,
                            LoggingErrorHandler::with_custom_text(
                                "An error from the webhook listener",
                            ),
                        )
                        .await;
                }
                Err(e) => log::error!("Failed to set up the webhook: {e}"),
            }
        }
        None => dispatcher.dispatch().await,
    }

    log::info!("it appears we have been bonked.");
}
