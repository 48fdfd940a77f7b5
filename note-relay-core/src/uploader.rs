//! Attachment upload into the content store.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;
use tracing::{error, info};

use crate::contract::{ContentStore, NewDriveFile};
use crate::error::RelayError;
use crate::folder::find_folder;

/// Reference to one uploaded asset. The empty handle marks a failed upload:
/// it keeps the attachment's slot in a note but points at nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ContentHandle(String);

impl ContentHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn failed() -> Self {
        Self(String::new())
    }

    pub fn is_failed(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for ContentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

static LAST_TOKEN: AtomicI64 = AtomicI64::new(0);

/// Current Unix time in nanoseconds, bumped so that no two calls in this
/// process return the same value.
fn distinct_token() -> i64 {
    let now = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let mut last = LAST_TOKEN.load(Ordering::Relaxed);
    loop {
        let next = now.max(last + 1);
        match LAST_TOKEN.compare_exchange_weak(last, next, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => return next,
            Err(seen) => last = seen,
        }
    }
}

/// Extension of the last path segment of `url`, dot included. Query and
/// fragment are ignored. Empty when the segment has no dot.
pub fn url_extension(url: &str) -> &str {
    let path = url.split(|c: char| c == '?' || c == '#').next().unwrap_or(url);
    let segment = path.rsplit('/').next().unwrap_or(path);
    match segment.rfind('.') {
        Some(dot) => &segment[dot..],
        None => "",
    }
}

/// Name for a new asset: a process-unique time token plus the source extension.
pub fn asset_name(url: &str) -> String {
    format!("{}{}", distinct_token(), url_extension(url))
}

/// Uploads the media behind `url` into the folder named `folder_name`.
///
/// The folder is looked up again on every call. If that lookup comes back
/// empty the upload is still attempted without a folder and the store
/// decides. `url` is usually short-lived, so call this right after resolving it.
pub async fn upload_attachment<S>(
    store: &S,
    url: &str,
    folder_name: &str,
) -> Result<ContentHandle, RelayError>
where
    S: ContentStore + ?Sized,
{
    let folder_id = find_folder(store, folder_name).await;
    let name = asset_name(url);
    let req = NewDriveFile {
        name: name.clone(),
        url: url.to_string(),
        folder_id,
    };
    match store.upload_from_url(req).await {
        Ok(file) => {
            info!(file_name = %file.name, file_id = %file.id, "File uploaded");
            Ok(ContentHandle::new(file.id))
        }
        Err(source) => {
            error!(error = %source, file_name = %name, "[Drive/File/CreateFromURL] upload failed");
            Err(RelayError::Upload { name, source })
        }
    }
}
