use std::{future::Future, time::Duration};

use teloxide::{
    payloads::SendMessageSetters,
    requests::Requester,
    sugar::request::{RequestLinkPreviewExt, RequestReplyExt},
    types::{Message, MessageId, ParseMode, Recipient},
    Bot, RequestError,
};

/// How many times a message send is attempted before giving up.
const SEND_ATTEMPTS: u8 = 3;

pub trait BotArchSendMsg {
    /// Opinionated method to send a message, with HTML markup,
    /// and retries due to flood waiting or any other issues.
    fn archsendmsg<'a>(
        &'a self,
        to_where: impl Into<Recipient> + Send,
        text: impl Into<&'a str> + Send,
        reply_to: impl Into<Option<MessageId>> + Send,
    ) -> impl Future<Output = Result<Message, RequestError>> + Send;

    /// Same as [`BotArchSendMsg::archsendmsg`], but with link previews disabled.
    fn archsendmsg_no_link_preview<'a>(
        &'a self,
        to_where: impl Into<Recipient> + Send,
        text: impl Into<&'a str> + Send,
        reply_to: impl Into<Option<MessageId>> + Send,
    ) -> impl Future<Output = Result<Message, RequestError>> + Send;
}

impl BotArchSendMsg for Bot {
    async fn archsendmsg<'a>(
        &'a self,
        to_where: impl Into<Recipient> + Send,
        text: impl Into<&'a str> + Send,
        reply_to: impl Into<Option<MessageId>> + Send,
    ) -> Result<Message, RequestError> {
        send_with_retries(self, to_where.into(), text.into(), reply_to.into(), false).await
    }

    async fn archsendmsg_no_link_preview<'a>(
        &'a self,
        to_where: impl Into<Recipient> + Send,
        text: impl Into<&'a str> + Send,
        reply_to: impl Into<Option<MessageId>> + Send,
    ) -> Result<Message, RequestError> {
        send_with_retries(self, to_where.into(), text.into(), reply_to.into(), true).await
    }
}

async fn send_with_retries(
    bot: &Bot,
    to_where: Recipient,
    text: &str,
    reply_to: Option<MessageId>,
    no_link_preview: bool,
) -> Result<Message, RequestError> {
    let mut attempt: u8 = 0;
    loop {
        attempt += 1;
        let mut request = bot
            .send_message(to_where.clone(), text)
            .parse_mode(ParseMode::Html)
            .disable_link_preview(no_link_preview);
        if let Some(reply_to) = reply_to {
            request = request.reply_to(reply_to);
        }

        let result = request.await;

        match result {
            Ok(message) => return Ok(message),
            // No point in retrying these, they'll fail the same way.
            Err(e @ RequestError::Api(_)) => return Err(e),
            Err(e) if attempt >= SEND_ATTEMPTS => return Err(e),
            Err(RequestError::RetryAfter(duration)) => {
                log::debug!("Flood wait for {:?} when sending to {:?}", duration, to_where);
                tokio::time::sleep(duration.duration()).await;
            }
            Err(e) => {
                log::debug!("Retrying send to {:?} after error: {}", to_where, e);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}
