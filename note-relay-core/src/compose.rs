//! Composition and submission of outbound notes.

use tracing::{error, info};

use crate::config::NoteView;
use crate::contract::{CreatedNote, NewNote, NoteEndpoint};
use crate::error::RelayError;
use crate::message::ForwardOrigin;
use crate::uploader::ContentHandle;

/// Note text for `body`: a blank line, then a provenance line when the
/// content was forwarded from a channel, then the footer.
pub fn compose_text(body: &str, origin: Option<&ForwardOrigin>, footer: &str) -> String {
    let mut text = String::with_capacity(body.len() + footer.len() + 2);
    text.push_str(body);
    text.push_str("\n\n");
    if let Some(origin) = origin {
        text.push_str(&format!(
            "Forwarded from Telegram Channel \"{}\" `@{}`\n",
            origin.title, origin.handle
        ));
    }
    text.push_str(footer);
    text
}

/// Submits one note. Failed-upload handles are sent as empty ids so the
/// attachment count matches the burst.
pub async fn compose_and_send<E>(
    endpoint: &E,
    view: &NoteView,
    text: String,
    attachments: &[ContentHandle],
) -> Result<CreatedNote, RelayError>
where
    E: NoteEndpoint + ?Sized,
{
    let file_ids: Vec<String> = attachments
        .iter()
        .map(|handle| handle.as_str().to_string())
        .collect();
    let failed_slots = attachments.iter().filter(|h| h.is_failed()).count();
    let note = NewNote {
        text,
        visibility: view.visibility,
        local_only: view.local_only,
        file_ids,
    };

    // Kept for the error log; the note itself moves into the request.
    let text_len = note.text.len();
    let file_ids_for_log = note.file_ids.clone();

    match endpoint.create_note(note).await {
        Ok(created) => {
            info!(
                note_id = %created.id,
                attachments = attachments.len(),
                failed_slots,
                "Note created"
            );
            Ok(created)
        }
        Err(source) => {
            error!(
                error = %source,
                text_len,
                file_ids = ?file_ids_for_log,
                visibility = %view.visibility,
                local_only = view.local_only,
                "[Notes] note creation failed"
            );
            Err(RelayError::Post {
                attachments: attachments.len(),
                source,
            })
        }
    }
}
