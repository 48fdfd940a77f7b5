use thiserror::Error;

use crate::contract::BoxError;

/// A failed step of the relay loop.
///
/// Whether one of these stops the loop is decided by
/// [`FailurePolicy`](crate::config::FailurePolicy).
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("failed to resolve media url for file {file_id}: {source}")]
    Resolve {
        file_id: String,
        #[source]
        source: BoxError,
    },

    #[error("failed to upload {name}: {source}")]
    Upload {
        name: String,
        #[source]
        source: BoxError,
    },

    #[error("failed to create note ({attachments} attachments): {source}")]
    Post {
        attachments: usize,
        #[source]
        source: BoxError,
    },

    #[error("failed to answer /{command} in chat {chat_id}: {source}")]
    Reply {
        command: String,
        chat_id: i64,
        #[source]
        source: BoxError,
    },
}
