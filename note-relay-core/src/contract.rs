//! # contract: interfaces to the content store, the note endpoint and the messenger
//!
//! This module defines the three collaborator traits the relay talks to and the
//! plain data types that cross them:
//!
//! - [`ContentStore`]: folder lookup/creation and upload-from-URL (a drive).
//! - [`NoteEndpoint`]: creation of one outbound note.
//! - [`Messenger`]: the inbound side; resolves media file ids into fetchable
//!   URLs and answers commands.
//!
//! ## Interface & Extensibility
//! - All methods are async and return boxed errors ([`BoxError`]).
//! - Implementors convert transport and API failures into a boxed error; the
//!   relay decides whether a failure is logged and skipped or propagated.
//!
//! ## Mocking & Testing
//! - The traits are annotated for `mockall` so consumers can generate
//!   deterministic mocks (`MockContentStore`, `MockNoteEndpoint`,
//!   `MockMessenger`) for unit and integration tests.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;

/// Error type for every collaborator call.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A folder in the content store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveFolder {
    pub id: String,
    pub name: String,
}

/// A file created in the content store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveFile {
    pub id: String,
    pub name: String,
}

/// Request to have the content store fetch a remote URL into a new file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDriveFile {
    /// Name given to the stored asset.
    pub name: String,
    /// Remote URL the store fetches from. May embed credentials; never log it.
    pub url: String,
    /// Target folder. `None` when the folder could not be resolved; the store
    /// decides what that means.
    pub folder_id: Option<String>,
}

/// Who can see a note.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Public,
    Home,
    Followers,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Home => "home",
            Visibility::Followers => "followers",
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Visibility {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(Visibility::Public),
            "home" => Ok(Visibility::Home),
            "followers" => Ok(Visibility::Followers),
            other => Err(format!(
                "visibility can only be set to public, home or followers (got {other:?})"
            )),
        }
    }
}

/// One outbound note, as submitted to the note endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewNote {
    pub text: String,
    pub visibility: Visibility,
    pub local_only: bool,
    /// Attachment ids in arrival order. Failed uploads keep their slot as an
    /// empty string.
    pub file_ids: Vec<String>,
}

/// The created note as returned by the endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CreatedNote {
    pub id: String,
}

/// Drive-like store that receives uploaded attachments.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// List folders whose name matches `name`. The remote may match loosely;
    /// callers filter for exact names themselves.
    async fn list_folders(&self, name: &str) -> Result<Vec<DriveFolder>, BoxError>;

    /// Create a folder named `name`.
    async fn create_folder(&self, name: &str) -> Result<DriveFolder, BoxError>;

    /// Have the store fetch `req.url` and keep it as a new file.
    async fn upload_from_url(&self, req: NewDriveFile) -> Result<DriveFile, BoxError>;
}

/// Endpoint that publishes notes.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait NoteEndpoint: Send + Sync {
    async fn create_note(&self, note: NewNote) -> Result<CreatedNote, BoxError>;
}

/// The chat service the inbound messages come from.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Turn a media file id into a URL the content store can fetch. The URL
    /// is short-lived, so upload right after resolving.
    async fn resolve_file_url(&self, file_id: &str) -> Result<String, BoxError>;

    /// Send `text` into `chat_id` as a reply to message `reply_to`.
    async fn reply(&self, chat_id: i64, reply_to: i32, text: &str) -> Result<(), BoxError>;
}
