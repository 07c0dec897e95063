//! Virtual directory engine
//!
//! Directories do not exist anywhere on disk; they are synthesized from the
//! co-occurrence graph of tags over the indexed file population. A node in
//! the virtual tree is either a tag directory bearing an ordered tag-path
//! (the root carries the empty path) or a file node wrapping one file
//! record. Any permutation of the same tag set addresses the same files.

use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;

use crate::common::{resolve_target, Error, Result};
use crate::metadata::{FileInfo, MetadataStore, Tag};
use crate::ufs::{read_full, FileAttr, FileReader, FileStorage};

/// Top-level filesystem object. Owns the shared handles every node needs:
/// the metadata store, the storage adapter, and the mount point used to
/// classify link targets as in- or out-of-mount.
pub struct TagFilesystem {
    store: Arc<dyn MetadataStore>,
    storage: Arc<dyn FileStorage>,
    mount_point: String,
}

impl TagFilesystem {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        storage: Arc<dyn FileStorage>,
        mount_point: &str,
    ) -> Self {
        let mount_point = if mount_point.len() > 1 {
            mount_point.trim_end_matches('/').to_string()
        } else {
            mount_point.to_string()
        };
        Self {
            store,
            storage,
            mount_point,
        }
    }

    pub fn mount_point(&self) -> &str {
        &self.mount_point
    }

    /// The root directory: a tag directory with the empty tag-path.
    pub fn root(&self) -> TagDir {
        self.dir_at(Vec::new())
    }

    /// A tag directory at the given tag-path.
    pub fn dir_at(&self, path: Vec<Tag>) -> TagDir {
        TagDir {
            store: self.store.clone(),
            storage: self.storage.clone(),
            mount_point: self.mount_point.clone(),
            path,
        }
    }

    /// A file node for a known file record.
    pub fn file_node(&self, info: FileInfo) -> FileNode {
        FileNode {
            storage: self.storage.clone(),
            info,
        }
    }
}

/// A node handed back by lookup: either a deeper tag directory or a file.
pub enum Node {
    Dir(TagDir),
    File(FileNode),
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Node::Dir(dir) => f.debug_tuple("Dir").field(&dir.path()).finish(),
            Node::File(file) => f.debug_tuple("File").field(file.info()).finish(),
        }
    }
}

/// One synthesized directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirEntry {
    Tag(Tag),
    File(FileInfo),
}

impl DirEntry {
    pub fn name(&self) -> &str {
        match self {
            DirEntry::Tag(tag) => &tag.text,
            DirEntry::File(file) => &file.name,
        }
    }
}

/// Attributes reported for every synthesized directory.
pub fn dir_attr() -> FileAttr {
    FileAttr {
        size: 0,
        perm: 0o755,
        is_dir: true,
        mtime: SystemTime::UNIX_EPOCH,
        crtime: SystemTime::UNIX_EPOCH,
    }
}

/// Order-preserving set-insert over a tag-path. Returns an independent
/// sequence in every case so a remove on one branch can never mutate the
/// path another node observes.
pub fn append_if_missing(path: &[Tag], tag: Tag) -> Vec<Tag> {
    if path.iter().any(|t| t.text == tag.text) {
        return path.to_vec();
    }
    let mut extended = Vec::with_capacity(path.len() + 1);
    extended.extend_from_slice(path);
    extended.push(tag);
    extended
}

/// A synthesized directory bearing an ordered tag-path. The empty path is
/// the filesystem root, which lists tags only and refuses all linking.
pub struct TagDir {
    store: Arc<dyn MetadataStore>,
    storage: Arc<dyn FileStorage>,
    mount_point: String,
    path: Vec<Tag>,
}

impl TagDir {
    pub fn path(&self) -> &[Tag] {
        &self.path
    }

    pub fn is_root(&self) -> bool {
        self.path.is_empty()
    }

    fn child(&self, path: Vec<Tag>) -> TagDir {
        TagDir {
            store: self.store.clone(),
            storage: self.storage.clone(),
            mount_point: self.mount_point.clone(),
            path,
        }
    }

    fn file_node(&self, info: FileInfo) -> FileNode {
        FileNode {
            storage: self.storage.clone(),
            info,
        }
    }

    /// List all contents: sub-directories are the tags co-occurring with
    /// every tag of this path, files are those carrying every tag of this
    /// path. The root lists tags only, never files.
    pub async fn read_dir_all(&self) -> Result<Vec<DirEntry>> {
        let mut entries = Vec::new();
        for tag in self.store.coincident_tags(&self.path, "").await? {
            entries.push(DirEntry::Tag(tag));
        }
        if !self.path.is_empty() {
            for file in self.store.files_with_tags(&self.path, "").await? {
                entries.push(DirEntry::File(file));
            }
        }
        Ok(entries)
    }

    /// Look up a single name: a co-occurring tag wins over a file. Any tag
    /// of the path works for the co-occurrence check; the first is
    /// canonical.
    pub async fn lookup(&self, name: &str) -> Result<Node> {
        let found = if self.path.is_empty() {
            self.store.find_tag(name).await?
        } else {
            self.store.coincident_tag(name, &self.path[0].text).await?
        };
        if let Some(tag) = found {
            return Ok(Node::Dir(self.child(append_if_missing(&self.path, tag))));
        }
        // Files are never exposed in the root.
        if !self.path.is_empty() {
            let mut files = self.store.files_with_tags(&self.path, name).await?;
            if !files.is_empty() {
                return Ok(Node::File(self.file_node(files.remove(0))));
            }
        }
        Err(Error::NotFound(name.to_string()))
    }

    /// Create a tag and link it to every tag in the current path.
    pub async fn mkdir(&self, name: &str) -> Result<TagDir> {
        let tag = self.store.add_tag(name, &self.path).await?;
        tracing::debug!("created tag {} under {:?}", tag.text, self.path_texts());
        Ok(self.child(append_if_missing(&self.path, tag)))
    }

    /// Remove a directory entry: a tag when `is_dir` is set, otherwise a
    /// file membership.
    pub async fn remove(&self, name: &str, is_dir: bool) -> Result<()> {
        if is_dir {
            self.remove_tag(name).await
        } else {
            self.remove_file(name).await
        }
    }

    /// Disassociate a tag from its parent tag or, at the root, remove the
    /// tag entirely. Refused whenever it would leave a file un-tagged.
    async fn remove_tag(&self, name: &str) -> Result<()> {
        let target = if self.path.is_empty() {
            self.store.find_tag(name).await?
        } else {
            self.store.coincident_tag(name, &self.path[0].text).await?
        };
        let Some(target) = target else {
            return Err(Error::NotFound(name.to_string()));
        };

        if self.store.count_files_with_single_tag(&target).await? > 0 {
            return Err(Error::NotEmpty(format!(
                "files are reachable only through tag {}",
                target.text
            )));
        }

        // Strip the tag from files carrying this particular set of tags,
        // pushing them up one directory level.
        let full_path = append_if_missing(&self.path, target.clone());
        self.store.untag_files(&full_path).await?;

        if let Some(parent) = self.path.last() {
            self.store.unassociate_tags(parent, &target).await?;
        }

        if self.store.count_files_with_tag(&target).await? == 0 {
            tracing::debug!("deleting unreferenced tag {}", target.text);
            return self.store.delete_tag(&target).await;
        }

        // The tag still has memberships reachable through other paths; keep
        // the row rather than silently deleting it.
        Err(Error::NotEmpty(target.text))
    }

    /// Remove the last path tag from every file matching the name, which
    /// may carry wildcards.
    async fn remove_file(&self, name: &str) -> Result<()> {
        let Some(last) = self.path.last() else {
            return Err(Error::NotFound(name.to_string()));
        };
        let files = self.store.files_with_tags(&self.path, name).await?;
        if files.is_empty() {
            return Err(Error::NotFound(name.to_string()));
        }
        for file in files {
            self.store.untag_file(file.id, last.id).await?;
        }
        Ok(())
    }

    /// Respond to a hard link by applying this directory's tags to the
    /// file. The link name is ignored; the file keeps its original base
    /// name, only its tag set grows.
    pub async fn link(&self, old: &Node) -> Result<()> {
        if self.path.is_empty() {
            return Err(Error::PermissionDenied(
                "cannot link in the root".to_string(),
            ));
        }
        match old {
            Node::Dir(_) => Err(Error::PermissionDenied(
                "cannot link a directory".to_string(),
            )),
            Node::File(file) => self.store.tag_file(file.info.id, &self.path).await,
        }
    }

    /// Respond to a symlink by tagging the destination file with this
    /// directory's tags. A target outside the mount point gets a new file
    /// record (one per absolute path) on first sight.
    pub async fn symlink(&self, target: &str) -> Result<FileNode> {
        if self.path.is_empty() {
            return Err(Error::PermissionDenied(
                "cannot link in the root".to_string(),
            ));
        }
        let texts = self.path_texts();
        let (abs_dir, base_name) = resolve_target(&texts, target, &self.mount_point);
        if abs_dir == self.mount_point || abs_dir.starts_with(&format!("{}/", self.mount_point)) {
            self.link_within_mount(&abs_dir, &base_name).await
        } else {
            self.link_cross_device(&abs_dir, &base_name).await
        }
    }

    /// Link to a file already under management: resolve the target path to
    /// tags and require exactly one matching file.
    async fn link_within_mount(&self, abs_dir: &str, base_name: &str) -> Result<FileNode> {
        let tags = self.path_to_tags(abs_dir).await?;
        let mut files = self.store.files_with_tags(&tags, base_name).await?;
        match files.len() {
            0 => Err(Error::NotFound(base_name.to_string())),
            1 => {
                let file = files.remove(0);
                self.store.tag_file(file.id, &self.path).await?;
                Ok(self.file_node(file))
            }
            _ => Err(Error::PermissionDenied(format!(
                "{} matches more than one file",
                base_name
            ))),
        }
    }

    /// Link to a real file outside this filesystem, creating the file
    /// record if the absolute path has never been seen.
    async fn link_cross_device(&self, abs_dir: &str, base_name: &str) -> Result<FileNode> {
        let abs_path = format!("{}/{}", abs_dir.trim_end_matches('/'), base_name);
        let attr = self.storage.stat(&abs_path).await?;
        if attr.is_dir {
            // Recursive directory import is not supported.
            return Err(Error::PermissionDenied(abs_path));
        }
        let info = match self.store.find_file_by_abs_path(base_name, abs_dir).await? {
            Some(info) => {
                self.store.tag_file(info.id, &self.path).await?;
                info
            }
            None => {
                tracing::debug!("importing {} into tags {:?}", abs_path, self.path_texts());
                self.store
                    .create_file_in_path(base_name, abs_dir, &self.path)
                    .await?
            }
        };
        Ok(self.file_node(info))
    }

    /// Convert an in-mount absolute directory into its ordered tag
    /// sequence. The first segment must be a known tag and each later
    /// segment must co-occur with the one before it.
    async fn path_to_tags(&self, abs_dir: &str) -> Result<Vec<Tag>> {
        let rel = abs_dir
            .strip_prefix(&self.mount_point)
            .unwrap_or(abs_dir)
            .trim_start_matches('/');
        if rel.is_empty() {
            return Err(Error::NotFound(abs_dir.to_string()));
        }
        let mut tags: Vec<Tag> = Vec::new();
        for segment in rel.split('/') {
            let found = match tags.last() {
                None => self.store.find_tag(segment).await?,
                Some(prev) => self.store.coincident_tag(segment, &prev.text).await?,
            };
            match found {
                Some(tag) => tags.push(tag),
                None => return Err(Error::NotFound(segment.to_string())),
            }
        }
        Ok(tags)
    }

    fn path_texts(&self) -> Vec<&str> {
        self.path.iter().map(|t| t.text.as_str()).collect()
    }
}

/// A file reachable through the mount. Attributes come from the storage
/// adapter on demand; the record itself carries only identity.
pub struct FileNode {
    storage: Arc<dyn FileStorage>,
    info: FileInfo,
}

impl std::fmt::Debug for FileNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("FileNode").field(&self.info).finish()
    }
}

impl FileNode {
    pub fn info(&self) -> &FileInfo {
        &self.info
    }

    pub async fn attr(&self) -> Result<FileAttr> {
        self.storage.stat(&self.info.abs_path()).await
    }

    pub async fn open(&self) -> Result<FileHandle> {
        let reader = self.storage.open(&self.info.abs_path()).await?;
        Ok(FileHandle { reader })
    }
}

/// An open file. The read cursor is exclusively owned by the caller until
/// release; dropping the handle closes the underlying OS handle.
pub struct FileHandle {
    reader: Box<dyn FileReader>,
}

impl FileHandle {
    /// Read the next `size` bytes, short only at end of stream.
    pub async fn read(&mut self, size: usize) -> Result<Bytes> {
        read_full(self.reader.as_mut(), size).await
    }
}
