pub mod local;
pub mod traits;

pub use local::{validate_file_name, LocalMediaStore};
pub use traits::{MediaEntry, MediaError, MediaId, MediaMetadata, MediaStore};

use std::path::Path;

pub fn create_media_store(base_dir: &Path, max_bytes: u64) -> LocalMediaStore {
    LocalMediaStore::new(base_dir).with_max_bytes(max_bytes)
}
