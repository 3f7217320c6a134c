//! Concrete pipeline steps, in execution order.

pub mod archive;
pub mod database;
pub mod discovery;
pub mod filelist;
pub mod upload;

pub use archive::ArchiveStep;
pub use database::DatabaseStep;
pub use discovery::DiscoveryStep;
pub use filelist::FilelistStep;
pub use upload::UploadStep;

pub const DISCOVERY: &str = "discovery";
pub const DATABASE: &str = "database";
pub const FILELIST: &str = "filelist";
pub const ARCHIVE: &str = "archive";
pub const UPLOAD: &str = "upload";
