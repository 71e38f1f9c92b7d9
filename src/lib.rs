pub mod cmd;
pub mod config;
pub mod dir;
pub mod error;
pub mod execute;
pub mod files;
pub mod path;
pub mod restrict;

// Public library API - the usual entry points. Everything else is public
// too for callers that need the lower-level pieces.
pub use config::{FsConfig, FsContext};
pub use dir::duplicates::Duplicates;
pub use dir::mounts::{CommandMounts, FilesystemInfo, Mounts};
pub use dir::Directory;
pub use error::{Access, FsError, Result};
pub use execute::Execute;
pub use files::Files;
pub use path::stream::OpenMode;
pub use path::wipe::FillSource;
pub use path::{DeleteOptions, Entry, EntryKind, Mode};
pub use restrict::Restrictions;
