//! # Misskey client
//!
//! HTTP client for the Misskey API. Implements both sides of the outbound
//! contract from `note-relay-core`:
//!
//! - [`ContentStore`] over `drive/folders/find`, `drive/folders/create` and
//!   `drive/files/upload-from-url`.
//! - [`NoteEndpoint`] over `notes/create`.
//!
//! Every Misskey endpoint is a JSON `POST` to `{base}/api/{endpoint}` with the
//! access token in the body under `i`. Responses outside 2xx become errors that
//! carry the status and the body Misskey sent back.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use note_relay_core::contract::{
    BoxError, ContentStore, CreatedNote, DriveFile, DriveFolder, NewDriveFile, NewNote,
    NoteEndpoint,
};

/// Client for one Misskey instance, authenticated with one access token.
#[derive(Clone)]
pub struct MisskeyClient {
    http: Client,
    base_url: String,
    token: String,
}

impl std::fmt::Debug for MisskeyClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MisskeyClient")
            .field("base_url", &self.base_url)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

#[derive(Deserialize)]
struct CreateNoteResponse {
    #[serde(rename = "createdNote")]
    created_note: CreatedNote,
}

impl MisskeyClient {
    pub fn new(base_url: &str, token: &str) -> Result<Self, BoxError> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()?;
        Ok(Self::with_client(http, base_url, token))
    }

    pub fn with_client(http: Client, base_url: &str, token: &str) -> Self {
        let base_url = base_url.trim_end_matches('/').to_string();
        info!(base_url = %base_url, token_set = !token.is_empty(), "Initialised MisskeyClient");
        Self {
            http,
            base_url,
            token: token.to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint_url(&self, endpoint: &str) -> String {
        format!("{}/api/{}", self.base_url, endpoint)
    }

    /// Sends `body` to `endpoint` with the token added, returning the raw
    /// status and body of any 2xx response.
    async fn post(
        &self,
        endpoint: &str,
        mut body: Map<String, Value>,
    ) -> Result<(StatusCode, String), BoxError> {
        body.insert("i".to_string(), Value::String(self.token.clone()));

        debug!(endpoint, "Calling Misskey API");
        let response = self
            .http
            .post(self.endpoint_url(endpoint))
            .json(&Value::Object(body))
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(format!("Misskey {endpoint} returned {status}: {text}").into());
        }
        Ok((status, text))
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: Map<String, Value>,
    ) -> Result<T, BoxError> {
        let (status, text) = self.post(endpoint, body).await?;
        if status == StatusCode::NO_CONTENT || text.trim().is_empty() {
            return Err(format!("Misskey {endpoint} returned {status} without a body").into());
        }
        serde_json::from_str(&text)
            .map_err(|e| format!("Misskey {endpoint} returned an unexpected body: {e}").into())
    }
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

#[async_trait]
impl ContentStore for MisskeyClient {
    async fn list_folders(&self, name: &str) -> Result<Vec<DriveFolder>, BoxError> {
        self.post_json("drive/folders/find", object(json!({ "name": name })))
            .await
    }

    async fn create_folder(&self, name: &str) -> Result<DriveFolder, BoxError> {
        self.post_json("drive/folders/create", object(json!({ "name": name })))
            .await
    }

    async fn upload_from_url(&self, req: NewDriveFile) -> Result<DriveFile, BoxError> {
        let mut body = object(json!({ "url": req.url, "name": req.name }));
        if let Some(folder_id) = req.folder_id {
            body.insert("folderId".to_string(), Value::String(folder_id));
        }
        // Newer instances fetch asynchronously and answer 204; there is no
        // file id to attach in that case.
        self.post_json("drive/files/upload-from-url", body).await
    }
}

#[async_trait]
impl NoteEndpoint for MisskeyClient {
    async fn create_note(&self, note: NewNote) -> Result<CreatedNote, BoxError> {
        let mut body = object(json!({
            "text": note.text,
            "visibility": note.visibility,
            "localOnly": note.local_only,
        }));
        if !note.file_ids.is_empty() {
            body.insert("fileIds".to_string(), json!(note.file_ids));
        }
        let response: CreateNoteResponse = self.post_json("notes/create", body).await?;
        Ok(response.created_note)
    }
}
