pub mod walker;

pub use walker::{FileEntry, FileEnumerator, WalkOptions, WalkdirEnumerator};
