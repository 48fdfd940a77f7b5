//! Resolution of the attachment folder in the content store.
//!
//! Nothing is cached: every lookup asks the store again. When several folders
//! share the name, the first exact match in the order the store returned them
//! is used; the store does not promise any particular order.

use tracing::{error, info, warn};

use crate::contract::ContentStore;

/// Id of the first folder named exactly `name`, or `None` when there is none
/// or the lookup failed.
pub async fn find_folder<S>(store: &S, name: &str) -> Option<String>
where
    S: ContentStore + ?Sized,
{
    let folders = match store.list_folders(name).await {
        Ok(folders) => folders,
        Err(e) => {
            error!(error = %e, folder = name, "[Drive/Folder/Find] lookup failed");
            return None;
        }
    };
    folders
        .into_iter()
        .find(|folder| folder.name == name)
        .map(|folder| folder.id)
}

/// Creates a folder named `name` and returns its id, or `None` on failure.
pub async fn create_folder<S>(store: &S, name: &str) -> Option<String>
where
    S: ContentStore + ?Sized,
{
    match store.create_folder(name).await {
        Ok(folder) => {
            info!(folder = %folder.name, folder_id = %folder.id, "Folder created");
            Some(folder.id)
        }
        Err(e) => {
            error!(error = %e, folder = name, "[Drive/Folder/Create] creation failed");
            None
        }
    }
}

/// Startup check: creates the folder only when a lookup finds none. There is
/// no second lookup after creating, so a concurrent creator can still produce
/// a duplicate.
pub async fn ensure_folder<S>(store: &S, name: &str) -> Option<String>
where
    S: ContentStore + ?Sized,
{
    if let Some(id) = find_folder(store, name).await {
        info!(folder = name, folder_id = %id, "Upload folder found");
        return Some(id);
    }
    warn!(folder = name, "Upload folder not found, creating it");
    create_folder(store, name).await
}
