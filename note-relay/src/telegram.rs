//! # Telegram side
//!
//! - [`TelegramMessenger`] implements the core [`Messenger`] contract over a
//!   teloxide [`Bot`]: file ids become download URLs, command replies go out
//!   with `send_message`.
//! - [`spawn_producer`] runs the long-poll loop. Each update is converted into
//!   an [`InboundMessage`], checked against the [`InboundFilter`], and pushed
//!   into the bounded queue the relay reads from. A full queue holds the
//!   poller back.
//!
//! Download URLs embed the bot token. They are handed to the content store and
//! never logged.

use std::time::Duration;

use async_trait::async_trait;
use teloxide::payloads::{GetUpdatesSetters, SendMessageSetters};
use teloxide::requests::Requester;
use teloxide::types::{
    AllowedUpdate, ChatId, MediaKind, Message, MessageId, MessageKind as TgKind, MessageOrigin,
    ReplyParameters, UpdateKind,
};
use teloxide::Bot;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use note_relay_core::contract::{BoxError, Messenger};
use note_relay_core::message::{
    ForwardOrigin, InboundFilter, InboundMessage, MediaFile, MessageKind, PhotoSize,
};

/// Pause after a failed `getUpdates` call before polling again.
const POLL_ERROR_PAUSE: Duration = Duration::from_secs(3);

/// Extra room on top of the long-poll timeout so the HTTP client never gives
/// up before Telegram answers.
const HTTP_TIMEOUT_MARGIN_SECS: u64 = 15;

/// Download URL of a file resolved through `getFile`.
pub fn file_url(token: &str, file_path: &str) -> String {
    format!("https://api.telegram.org/file/bot{token}/{file_path}")
}

#[derive(Clone)]
pub struct TelegramMessenger {
    bot: Bot,
}

impl std::fmt::Debug for TelegramMessenger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramMessenger").finish_non_exhaustive()
    }
}

impl TelegramMessenger {
    /// Builds a bot whose HTTP timeout outlasts a long poll of
    /// `poll_timeout_secs`.
    pub fn new(token: &str, poll_timeout_secs: u32) -> Result<Self, BoxError> {
        let client = teloxide::net::default_reqwest_settings()
            .timeout(Duration::from_secs(
                u64::from(poll_timeout_secs) + HTTP_TIMEOUT_MARGIN_SECS,
            ))
            .build()?;
        Ok(Self {
            bot: Bot::with_client(token, client),
        })
    }

    pub fn bot(&self) -> &Bot {
        &self.bot
    }

    /// Checks the token with `getMe` and returns the bot's username.
    pub async fn connect(&self) -> Result<Option<String>, BoxError> {
        let me = self.bot.get_me().await?;
        let username = me.username.clone();
        info!(username = ?username, "Authorized on Telegram bot account");
        Ok(username)
    }
}

#[async_trait]
impl Messenger for TelegramMessenger {
    async fn resolve_file_url(&self, file_id: &str) -> Result<String, BoxError> {
        let file = self.bot.get_file(file_id).await?;
        Ok(file_url(self.bot.token(), &file.path))
    }

    async fn reply(&self, chat_id: i64, reply_to: i32, text: &str) -> Result<(), BoxError> {
        self.bot
            .send_message(ChatId(chat_id), text)
            .reply_parameters(ReplyParameters::new(MessageId(reply_to)))
            .await?;
        Ok(())
    }
}

/// Channel or group a message was forwarded from. Forwards from users carry
/// no provenance line.
fn forward_origin(msg: &Message) -> Option<ForwardOrigin> {
    let chat = match msg.forward_origin()? {
        MessageOrigin::Channel { chat, .. } => chat,
        MessageOrigin::Chat { sender_chat, .. } => sender_chat,
        _ => return None,
    };
    Some(ForwardOrigin {
        title: chat.title().unwrap_or_default().to_string(),
        handle: chat.username().unwrap_or_default().to_string(),
    })
}

/// Converts a Telegram message into the relay's model. Returns `None` for
/// service messages and media kinds the relay does not handle.
pub fn convert_message(msg: &Message) -> Option<InboundMessage> {
    let TgKind::Common(common) = &msg.kind else {
        return None;
    };
    let (kind, caption) = match &common.media_kind {
        MediaKind::Text(t) => (MessageKind::from_text(&t.text), None),
        MediaKind::Photo(p) => {
            let sizes = p
                .photo
                .iter()
                .map(|ps| PhotoSize {
                    file_id: ps.file.id.clone(),
                    width: ps.width,
                    height: ps.height,
                })
                .collect();
            (MessageKind::Photo(sizes), p.caption.clone())
        }
        MediaKind::Video(v) => (
            MessageKind::Video(MediaFile {
                file_id: v.video.file.id.clone(),
            }),
            v.caption.clone(),
        ),
        MediaKind::Audio(a) => (
            MessageKind::Audio(MediaFile {
                file_id: a.audio.file.id.clone(),
            }),
            a.caption.clone(),
        ),
        MediaKind::Document(d) => (
            MessageKind::Document(MediaFile {
                file_id: d.document.file.id.clone(),
            }),
            d.caption.clone(),
        ),
        // GIFs arrive as animation plus document; the animation file is the GIF.
        MediaKind::Animation(a) => (
            MessageKind::Document(MediaFile {
                file_id: a.animation.file.id.clone(),
            }),
            a.caption.clone(),
        ),
        _ => return None,
    };

    Some(InboundMessage {
        message_id: msg.id.0,
        chat_id: msg.chat.id.0,
        sender_id: msg.from.as_ref().and_then(|u| i64::try_from(u.id.0).ok()),
        date: msg.date,
        caption,
        forwarded_from: forward_origin(msg),
        kind,
    })
}

/// Long-polls Telegram and feeds admitted messages into `queue`. The task ends
/// when the receiving side of `queue` is dropped.
pub fn spawn_producer(
    bot: Bot,
    poll_timeout_secs: u32,
    filter: InboundFilter,
    queue: mpsc::Sender<InboundMessage>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(poll_timeout_secs, "Starting Telegram polling loop");
        let mut offset: i32 = 0;

        loop {
            let result = bot
                .get_updates()
                .offset(offset)
                .timeout(poll_timeout_secs)
                .allowed_updates(vec![AllowedUpdate::Message])
                .await;

            let updates = match result {
                Ok(updates) => updates,
                Err(e) => {
                    error!(error = %e, "Failed to get updates, retrying shortly");
                    tokio::time::sleep(POLL_ERROR_PAUSE).await;
                    continue;
                }
            };
            debug!(count = updates.len(), "Got Telegram updates");

            for update in updates {
                offset = update.id.as_offset();
                let UpdateKind::Message(msg) = update.kind else {
                    continue;
                };
                let Some(inbound) = convert_message(&msg) else {
                    debug!(message_id = msg.id.0, chat_id = msg.chat.id.0, "Skipping unsupported message");
                    continue;
                };
                if !filter.admits(&inbound) {
                    debug!(
                        message_id = inbound.message_id,
                        chat_id = inbound.chat_id,
                        sender_id = ?inbound.sender_id,
                        "Message rejected by inbound filter"
                    );
                    continue;
                }
                if queue.send(inbound).await.is_err() {
                    warn!("Relay queue closed, stopping Telegram polling loop");
                    return;
                }
            }
        }
    })
}
