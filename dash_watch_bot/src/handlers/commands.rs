use std::{future::Future, pin::Pin};

use html_escape::encode_text;
use teloxide::types::{BotCommand, ChatId};

use super::AwaitingAddress;
use crate::{
    database::{self, AddResult, Database, RemoveResult, MAX_ADDRESSES_PER_CHAT},
    gateway::{ChainGateway, HttpGateway},
    notifier::format_usd,
    types::DashAddress,
};

pub const COMMANDS: &[Command] = &[START, HELP, ADD, LIST, DELETE, REMOVE, PRICE, CANCEL];

/// Commands reply with some HTML text, always.
pub type CommandFuture<'a> = Pin<Box<dyn Future<Output = String> + Send + 'a>>;

pub struct CommandParams<'a> {
    pub chat: ChatId,
    /// Whatever came after the command, trimmed.
    pub params: &'a str,
    pub database: &'a Database,
    pub gateway: &'a HttpGateway,
    pub awaiting: &'a AwaitingAddress,
}

pub struct Command {
    pub callname: &'static str,
    pub description: &'static str,
    pub function: fn(CommandParams) -> CommandFuture,
    hidden: bool,
}

impl Command {
    pub fn is_matching_callname(&self, command: &str) -> bool {
        self.callname
            .split_ascii_whitespace()
            .next()
            .is_some_and(|x| x.eq_ignore_ascii_case(command))
    }

    pub fn get_help(&self, mut output: impl std::fmt::Write) -> Result<(), std::fmt::Error> {
        output.write_str(self.callname)?;
        if !self.description.is_empty() {
            output.write_str(" - ")?;
            output.write_str(self.description)?;
        }
        Ok(())
    }

    pub fn generate_help() -> String {
        let mut response = String::from(concat!(
            "<b>Dash address watcher</b>\n\n",
            "I keep an eye on Dash addresses and tell you whenever one of them receives DASH. ",
            "You can also just send me an address to start watching it.\n\n"
        ));
        for command in COMMANDS {
            if command.hidden {
                continue;
            }
            // Writing to a String can't fail.
            let _ = command.get_help(&mut response);
            response.push('\n');
        }
        response.pop();
        response
    }

    pub fn generate_bot_commands() -> Vec<BotCommand> {
        let mut output = Vec::new();

        for command in COMMANDS {
            if command.hidden {
                continue;
            }
            let Some(callname) = command.callname.split_ascii_whitespace().next() else {
                continue;
            };

            // Cut off the /
            let callname = callname[1..].trim().to_string();
            let description = command
                .description
                .replace("&lt;", "<")
                .replace("&gt;", ">");

            output.push(BotCommand {
                command: callname,
                description,
            });
        }

        output
    }
}

pub fn find_command(callname: &str) -> Option<&'static Command> {
    COMMANDS.iter().find(|x| x.is_matching_callname(callname))
}

///////////////////////////////////////
/////////////////COMMAND DEFINITIONS
///////////////////////////////////////

/// Wraps the function's return value in a pinning closure.
macro_rules! wrap {
    ($thing:expr) => {
        |tp| Box::pin($thing(tp))
    };
}

pub const START: Command = Command {
    callname: "/start",
    description: "",
    function: wrap!(start),
    hidden: true,
};
async fn start(_tp: CommandParams<'_>) -> String {
    format!(
        "👋 Hi!\n\n{}",
        Command::generate_help().trim_start_matches("<b>Dash address watcher</b>\n\n")
    )
}

pub const HELP: Command = Command {
    callname: "/help",
    description: "show this help",
    function: wrap!(help),
    hidden: false,
};
async fn help(_tp: CommandParams<'_>) -> String {
    Command::generate_help()
}

pub const ADD: Command = Command {
    callname: "/add [address]",
    description: "start watching an address. Without one, I'll ask for it.",
    function: wrap!(add),
    hidden: false,
};
async fn add(tp: CommandParams<'_>) -> String {
    if tp.params.is_empty() {
        tp.awaiting.start(tp.chat).await;
        return "Send me the Dash address to watch, or /cancel.".to_owned();
    }
    tp.awaiting.take(tp.chat).await;
    register(tp.database, tp.chat, tp.params).await
}

pub const LIST: Command = Command {
    callname: "/list",
    description: "show the addresses being watched",
    function: wrap!(list),
    hidden: false,
};
async fn list(tp: CommandParams<'_>) -> String {
    list_reply(&tp.database.list_addresses(tp.chat).await)
}

pub const DELETE: Command = Command {
    callname: "/delete &lt;address or number&gt;",
    description: "stop watching an address. The number is the one /list shows.",
    function: wrap!(delete),
    hidden: false,
};
pub const REMOVE: Command = Command {
    callname: "/remove",
    description: "",
    function: wrap!(delete),
    hidden: true,
};
async fn delete(tp: CommandParams<'_>) -> String {
    if tp.params.is_empty() {
        return concat!(
            "Which one? Send <code>/delete</code> with the address, ",
            "or with its number from /list."
        )
        .to_owned();
    }

    let address = match tp.params.parse::<usize>() {
        Ok(number) => {
            let addresses = tp.database.list_addresses(tp.chat).await;
            match number.checked_sub(1).and_then(|x| addresses.get(x)) {
                Some(address) => address.to_string(),
                None => return format!("There's no #{number} in your list. See /list."),
            }
        }
        Err(_) => tp.params.to_owned(),
    };

    let result = tp.database.remove_address(tp.chat, &address).await;
    if let Err(e) = &result {
        log::error!("Failed to remove {address} for chat {}: {e}", tp.chat);
    }
    remove_reply(result, &address)
}

pub const PRICE: Command = Command {
    callname: "/price",
    description: "current price of DASH in USD",
    function: wrap!(price),
    hidden: false,
};
async fn price(tp: CommandParams<'_>) -> String {
    price_reply(tp.gateway.fetch_exchange_rate().await)
}

pub const CANCEL: Command = Command {
    callname: "/cancel",
    description: "stop waiting for an address",
    function: wrap!(cancel),
    hidden: false,
};
async fn cancel(tp: CommandParams<'_>) -> String {
    if tp.awaiting.take(tp.chat).await {
        "Okay, never mind.".to_owned()
    } else {
        "Nothing to cancel.".to_owned()
    }
}

/// Add an address the chat sent and say how it went.
pub async fn register(database: &Database, chat: ChatId, text: &str) -> String {
    let result = database.add_address(chat, text).await;
    match &result {
        Ok(AddResult::Added) => log::info!("Chat {chat} now watches {}", text.trim()),
        Err(e) => log::error!("Failed to add {} for chat {chat}: {e}", text.trim()),
        Ok(_) => (),
    }
    add_reply(result, text.trim())
}

pub fn add_reply(result: Result<AddResult, database::Error>, address: &str) -> String {
    let address = encode_text(address);
    match result {
        Ok(AddResult::Added) => format!(
            "✅ Now watching <code>{address}</code>.\nI'll message you when it receives DASH."
        ),
        Ok(AddResult::AlreadyPresent) => {
            format!("You're already watching <code>{address}</code>.")
        }
        Ok(AddResult::LimitExceeded) => format!(
            "❌ You can watch at most {MAX_ADDRESSES_PER_CHAT} addresses. \
             Remove one with /delete first."
        ),
        Ok(AddResult::Invalid) => concat!(
            "❌ That doesn't look like a Dash address. ",
            "They start with <code>X</code> and are 34 characters long. ",
            "Try again with /add."
        )
        .to_owned(),
        Err(_) => SAVE_FAILED.to_owned(),
    }
}

pub fn remove_reply(result: Result<RemoveResult, database::Error>, address: &str) -> String {
    let address = encode_text(address);
    match result {
        Ok(RemoveResult::Removed) => format!("🗑 Stopped watching <code>{address}</code>."),
        Ok(RemoveResult::NotFound) => {
            format!("You're not watching <code>{address}</code>. See /list.")
        }
        Err(_) => SAVE_FAILED.to_owned(),
    }
}

pub fn list_reply(addresses: &[DashAddress]) -> String {
    if addresses.is_empty() {
        return "You aren't watching any addresses yet. Send me one, or use /add.".to_owned();
    }

    let mut response = format!(
        "👀 <b>Watched addresses</b> ({}/{MAX_ADDRESSES_PER_CHAT}):\n\n",
        addresses.len()
    );
    for (i, address) in addresses.iter().enumerate() {
        response += &format!("{}. <code>{}</code>\n", i + 1, encode_text(address.as_str()));
    }
    response += "\nTo stop watching one, send <code>/delete 1</code> (or its number).";
    response
}

pub fn price_reply(rate: Option<f64>) -> String {
    match rate {
        Some(rate) => format!("💵 1 DASH = <b>${}</b>", format_usd(rate)),
        None => "⚠️ Couldn't get the price right now. Try again later.".to_owned(),
    }
}

const SAVE_FAILED: &str = "⚠️ Couldn't save that right now. Please try again later.";
