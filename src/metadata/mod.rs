pub mod metadata;
pub mod sqlite;

pub use metadata::{FileInfo, MetadataStore, Tag};
pub use sqlite::SqliteMetadataStore;
