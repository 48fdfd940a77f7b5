//! The relay loop: folds bursts of media messages into single notes.
//!
//! Messages are handled one at a time, in arrival order, by a single [`Relay`].
//! Media messages (photo, video, audio, document) are uploaded right away and
//! their handles collected in a [`PendingBurst`]. After each media message the
//! relay asks the inbound stream whether more items are already queued. If the
//! queue is empty at that instant the burst is flushed as one note; otherwise
//! the relay keeps accumulating.
//!
//! The drain check is a snapshot of the queue, not a time window. A slow
//! trickle of media produces one note per item; an album that lands in the
//! queue before the relay looks produces a single note.
//!
//! Text messages never join a burst: each one is posted at once on its own,
//! and does not flush a pending burst. Commands are answered in the chat and
//! never posted.
//!
//! # Failure handling
//! Every step that talks to a collaborator returns a [`RelayError`] on
//! failure, which [`FailurePolicy`](crate::config::FailurePolicy) either logs
//! and swallows or hands back to stop the loop. A failed upload keeps its slot
//! as [`ContentHandle::failed`]. The burst is reset after every flush attempt,
//! successful or not.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::compose::{compose_and_send, compose_text};
use crate::config::RelayConfig;
use crate::contract::{ContentStore, Messenger, NoteEndpoint};
use crate::error::RelayError;
use crate::folder::ensure_folder;
use crate::message::{largest_photo, Command, ForwardOrigin, InboundMessage, MessageKind};
use crate::uploader::{upload_attachment, ContentHandle};

/// Reply to `/start` and `/help`.
pub const HELP_TEXT: &str = "Hello! I'm a bot that forwards Telegram messages to Misskey.\n\n\
Send me a message or forward a message to me and I'll forward it to Misskey.\n\n";

/// Attachments and caption collected for the note being built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingBurst {
    body: String,
    attachments: Vec<ContentHandle>,
    origin: Option<ForwardOrigin>,
}

impl PendingBurst {
    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn attachments(&self) -> &[ContentHandle] {
        &self.attachments
    }

    pub fn origin(&self) -> Option<&ForwardOrigin> {
        self.origin.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty() && self.attachments.is_empty()
    }

    /// The last non-empty caption wins; earlier ones are replaced, not joined.
    pub fn absorb_caption(&mut self, caption: Option<&str>) {
        if let Some(caption) = caption.filter(|c| !c.is_empty()) {
            self.body = caption.to_string();
        }
    }

    pub fn push(&mut self, handle: ContentHandle) {
        self.attachments.push(handle);
    }

    /// Records the forward origin of the latest message; `None` clears it.
    pub fn note_origin(&mut self, origin: Option<ForwardOrigin>) {
        self.origin = origin;
    }

    /// Hands over the collected burst and leaves this one empty.
    pub fn take(&mut self) -> PendingBurst {
        std::mem::take(self)
    }
}

/// Source of inbound messages with a view of its own backlog.
#[async_trait]
pub trait InboundStream: Send {
    /// Next message, or `None` once the producer is gone.
    async fn next_message(&mut self) -> Option<InboundMessage>;

    /// Whether more messages are queued and ready right now.
    fn has_pending_backlog(&self) -> bool;
}

#[async_trait]
impl InboundStream for mpsc::Receiver<InboundMessage> {
    async fn next_message(&mut self) -> Option<InboundMessage> {
        self.recv().await
    }

    fn has_pending_backlog(&self) -> bool {
        !self.is_empty()
    }
}

/// The relay: owns the collaborators, the settings and the pending burst.
pub struct Relay<S, N, M> {
    store: S,
    notes: N,
    messenger: M,
    config: RelayConfig,
    pending: PendingBurst,
}

impl<S, N, M> Relay<S, N, M>
where
    S: ContentStore,
    N: NoteEndpoint,
    M: Messenger,
{
    pub fn new(store: S, notes: N, messenger: M, config: RelayConfig) -> Self {
        Self {
            store,
            notes,
            messenger,
            config,
            pending: PendingBurst::default(),
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn pending(&self) -> &PendingBurst {
        &self.pending
    }

    /// Makes sure the upload folder exists, creating it if a lookup finds none.
    pub async fn prepare_upload_folder(&self) -> Option<String> {
        ensure_folder(&self.store, &self.config.upload_folder).await
    }

    /// Consumes `inbound` until it closes. A burst still pending at that point
    /// is dropped without being posted.
    pub async fn run<I>(&mut self, inbound: &mut I) -> Result<(), RelayError>
    where
        I: InboundStream + ?Sized,
    {
        info!(upload_folder = %self.config.upload_folder, "Relay loop started");
        while let Some(msg) = inbound.next_message().await {
            self.handle(msg, || inbound.has_pending_backlog()).await?;
        }
        if !self.pending.is_empty() {
            warn!(
                attachments = self.pending.attachments.len(),
                "Inbound stream closed with an unflushed burst, dropping it"
            );
        }
        info!("Relay loop finished");
        Ok(())
    }

    /// Handles one message. `has_pending_backlog` is consulted after a media
    /// message has been uploaded, never before.
    pub async fn handle<F>(
        &mut self,
        msg: InboundMessage,
        has_pending_backlog: F,
    ) -> Result<(), RelayError>
    where
        F: FnOnce() -> bool,
    {
        let InboundMessage {
            message_id,
            chat_id,
            caption,
            forwarded_from,
            kind,
            ..
        } = msg;
        debug!(message_id, chat_id, kind = kind.label(), "Handling inbound message");

        match kind {
            MessageKind::Command(command) => self.answer_command(chat_id, message_id, &command).await,
            MessageKind::Text(text) => self.post_text(&text, forwarded_from.as_ref()).await,
            MessageKind::Photo(sizes) => {
                self.pending.note_origin(forwarded_from);
                match largest_photo(&sizes) {
                    Some(photo) => {
                        self.accumulate(&photo.file_id, caption.as_deref()).await?;
                    }
                    None => warn!(message_id, "Photo message without any size, skipping it"),
                }
                self.flush_if_drained(has_pending_backlog).await
            }
            MessageKind::Video(file) | MessageKind::Audio(file) | MessageKind::Document(file) => {
                self.pending.note_origin(forwarded_from);
                self.accumulate(&file.file_id, caption.as_deref()).await?;
                self.flush_if_drained(has_pending_backlog).await
            }
        }
    }

    /// Posts whatever the burst holds and resets it, even if posting fails.
    /// An empty burst is discarded without a note.
    pub async fn flush(&mut self) -> Result<(), RelayError> {
        let burst = self.pending.take();
        if burst.is_empty() {
            debug!("Nothing to flush");
            return Ok(());
        }
        let text = compose_text(&burst.body, burst.origin.as_ref(), &self.config.footer);
        debug!(attachments = burst.attachments.len(), "Flushing burst");
        self.config
            .failure_policy
            .settle(compose_and_send(&self.notes, &self.config.view, text, &burst.attachments).await)?;
        Ok(())
    }

    async fn flush_if_drained<F>(&mut self, has_pending_backlog: F) -> Result<(), RelayError>
    where
        F: FnOnce() -> bool,
    {
        if has_pending_backlog() {
            debug!(
                attachments = self.pending.attachments.len(),
                "More messages queued, holding burst open"
            );
            return Ok(());
        }
        self.flush().await
    }

    /// Uploads one media file into the burst. An upload that fails still takes
    /// a slot. A file whose URL cannot be resolved is skipped along with its
    /// caption.
    async fn accumulate(&mut self, file_id: &str, caption: Option<&str>) -> Result<(), RelayError> {
        let policy = self.config.failure_policy;

        let resolved = match self.messenger.resolve_file_url(file_id).await {
            Ok(url) => Ok(url),
            Err(source) => {
                error!(error = %source, file_id, "Failed to resolve media file url");
                Err(RelayError::Resolve {
                    file_id: file_id.to_string(),
                    source,
                })
            }
        };
        let Some(url) = policy.settle(resolved)? else {
            return Ok(());
        };

        let uploaded = upload_attachment(&self.store, &url, &self.config.upload_folder).await;
        let handle = policy.settle(uploaded)?.unwrap_or_else(ContentHandle::failed);
        self.pending.push(handle);
        self.pending.absorb_caption(caption);
        Ok(())
    }

    async fn post_text(&mut self, text: &str, origin: Option<&ForwardOrigin>) -> Result<(), RelayError> {
        let composed = compose_text(text, origin, &self.config.footer);
        self.config
            .failure_policy
            .settle(compose_and_send(&self.notes, &self.config.view, composed, &[]).await)?;
        Ok(())
    }

    async fn answer_command(
        &mut self,
        chat_id: i64,
        message_id: i32,
        command: &Command,
    ) -> Result<(), RelayError> {
        match command.name.as_str() {
            "start" | "help" => {
                let replied = match self.messenger.reply(chat_id, message_id, HELP_TEXT).await {
                    Ok(()) => Ok(()),
                    Err(source) => {
                        error!(error = %source, chat_id, command = %command.name, "Failed to answer command");
                        Err(RelayError::Reply {
                            command: command.name.clone(),
                            chat_id,
                            source,
                        })
                    }
                };
                self.config.failure_policy.settle(replied)?;
                Ok(())
            }
            other => {
                debug!(command = other, chat_id, "Ignoring unknown command");
                Ok(())
            }
        }
    }
}
