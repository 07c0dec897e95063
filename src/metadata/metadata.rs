//! Metadata storage trait
//!
//! This module defines the interface for storing and retrieving the tag
//! graph: tags, files, file-tag memberships, and tag co-occurrence pairs.
//! The actual implementation can be backed by any relational engine that
//! supports transactions.

use async_trait::async_trait;

use crate::common::Result;

/// A labeled category. Appears as a directory component in every virtual
/// path that mentions it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub id: i64,
    pub text: String,
}

/// A handle to a real file on the host, identified by its absolute
/// directory and base name. Timestamps are not stored here; they come from
/// the storage adapter on demand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub id: i64,
    pub name: String,
    pub dir: String,
}

impl FileInfo {
    /// Absolute path of the underlying file on the host filesystem.
    pub fn abs_path(&self) -> String {
        if self.dir.ends_with('/') {
            format!("{}{}", self.dir, self.name)
        } else {
            format!("{}/{}", self.dir, self.name)
        }
    }
}

/// Trait for metadata storage operations.
///
/// Read operations report missing rows as `None` or an empty list; only the
/// directory engine decides whether absence is an error. All multi-statement
/// mutations commit or roll back atomically.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Look up a tag by its exact text.
    async fn find_tag(&self, text: &str) -> Result<Option<Tag>>;

    /// List every tag, ascending by text.
    async fn all_tags(&self) -> Result<Vec<Tag>>;

    /// Insert a tag (or return the existing one) and record a co-occurrence
    /// pair with every tag in `context`.
    async fn add_tag(&self, text: &str, context: &[Tag]) -> Result<Tag>;

    /// Return the tag named `text` if it co-occurs with the tag named
    /// `other`, in either pair orientation.
    async fn coincident_tag(&self, text: &str, other: &str) -> Result<Option<Tag>>;

    /// List the tags that co-occur with every tag in `context`, ascending by
    /// text. An empty context yields all tags. `name_filter` matches tag
    /// text exactly, or as a pattern when it contains `*`.
    async fn coincident_tags(&self, context: &[Tag], name_filter: &str) -> Result<Vec<Tag>>;

    /// List the files carrying every tag in `tags`, ascending by name.
    /// `name_filter` matches the file name exactly, or as a pattern when it
    /// contains `*`.
    async fn files_with_tags(&self, tags: &[Tag], name_filter: &str) -> Result<Vec<FileInfo>>;

    /// Number of files carrying the tag.
    async fn count_files_with_tag(&self, tag: &Tag) -> Result<i64>;

    /// Number of files whose sole membership is this tag.
    async fn count_files_with_single_tag(&self, tag: &Tag) -> Result<i64>;

    /// Add every tag in `tags` to the file's membership set.
    async fn tag_file(&self, file_id: i64, tags: &[Tag]) -> Result<()>;

    /// Remove one membership.
    async fn untag_file(&self, file_id: i64, tag_id: i64) -> Result<()>;

    /// Remove the last tag in `path` from every file that carries all tags
    /// in `path`.
    async fn untag_files(&self, path: &[Tag]) -> Result<()>;

    /// Remove the co-occurrence pair between two tags.
    async fn unassociate_tags(&self, a: &Tag, b: &Tag) -> Result<()>;

    /// Remove the tag and every co-occurrence pair referencing it.
    async fn delete_tag(&self, tag: &Tag) -> Result<()>;

    /// Look up a file by its identity (base name, absolute directory).
    async fn find_file_by_abs_path(&self, name: &str, dir: &str) -> Result<Option<FileInfo>>;

    /// Insert a file record and its initial memberships.
    async fn create_file_in_path(&self, name: &str, dir: &str, tags: &[Tag]) -> Result<FileInfo>;
}
