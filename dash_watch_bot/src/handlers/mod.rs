pub mod commands;

use std::{collections::HashSet, sync::Arc};

use arch_bot_commons::useful_methods::*;
use html_escape::encode_text;
use teloxide::{
    types::{ChatId, Me, Message},
    Bot, RequestError,
};
use tokio::sync::Mutex;

use crate::{database::Database, gateway::HttpGateway, types::DashAddress};
use commands::{find_command, register, CommandParams};

const NOT_UNDERSTOOD: &str =
    "I only understand Dash addresses and commands. Send /help to see what I can do.";

/// Chats that sent a bare `/add` and whose next message is the address.
///
/// Kept in memory only. A restart forgets who was waiting.
#[derive(Debug, Default)]
pub struct AwaitingAddress(Mutex<HashSet<ChatId>>);

impl AwaitingAddress {
    pub async fn start(&self, chat: ChatId) {
        self.0.lock().await.insert(chat);
    }

    /// Stop waiting on this chat. Returns whether it was being waited on.
    pub async fn take(&self, chat: ChatId) -> bool {
        self.0.lock().await.remove(&chat)
    }

    #[cfg(test)]
    pub async fn is_waiting(&self, chat: ChatId) -> bool {
        self.0.lock().await.contains(&chat)
    }
}

/// Split `/command@bot params` into `/command` and `params`.
///
/// Returns [`None`] if it's not a command at all, or is addressed to some other bot.
pub fn parse_command<'a>(text: &'a str, bot_username: &str) -> Option<(&'a str, &'a str)> {
    let text = text.trim_start();
    if !text.starts_with('/') {
        return None;
    }

    let (command, params) = text.split_once(char::is_whitespace).unwrap_or((text, ""));

    if !command.is_ascii() {
        // Telegram commands must be ASCII.
        // See https://core.telegram.org/bots/api#botcommand
        return None;
    }

    // Commands shouldn't have an "@" in their callnames.
    // If the command is "/add@Dash_Watch_Bot", trim the "@" and everything after it.
    let callname = match command.split_once('@') {
        Some((callname, username)) => {
            // Bot names are guaranteed ASCII, so ignore ASCII case specifically.
            if !username.eq_ignore_ascii_case(bot_username) {
                // This command is not for us. Ignore.
                return None;
            }
            callname
        }
        None => command,
    };

    Some((callname, params.trim()))
}

pub async fn handle_message(
    bot: Bot,
    me: Me,
    message: Message,
    database: Arc<Database>,
    gateway: Arc<HttpGateway>,
    awaiting: Arc<AwaitingAddress>,
) -> Result<(), RequestError> {
    // Bot ignores messages made by itself.
    if message.from.as_ref().is_some_and(|x| x.id == me.id) {
        return Ok(());
    }
    let Some(text) = message.text() else {
        return Ok(());
    };
    let chat = message.chat.id;
    let private = message.chat.is_private();

    let reply = match parse_command(text, me.username()) {
        Some((callname, params)) => match find_command(callname) {
            Some(command) => {
                log::debug!("Chat {chat} ran {callname}");
                (command.function)(CommandParams {
                    chat,
                    params,
                    database: &database,
                    gateway: &gateway,
                    awaiting: &awaiting,
                })
                .await
            }
            None if private => {
                format!("I don't know {}. See /help.", encode_text(callname))
            }
            // Probably for some other bot in the group.
            None => return Ok(()),
        },
        None => {
            let waited = awaiting.take(chat).await;
            // Groups chat about plenty of things starting with "X", so only
            // a real address counts there.
            let looks_like_address = if private {
                text.trim_start().starts_with('X')
            } else {
                DashAddress::parse(text).is_ok()
            };

            if waited || looks_like_address {
                register(&database, chat, text).await
            } else if private {
                NOT_UNDERSTOOD.to_owned()
            } else {
                return Ok(());
            }
        }
    };

    bot.archsendmsg(chat, reply.as_str(), message.id).await?;

    Ok(())
}
