//! Offline indexer
//!
//! Walks real directories and registers every previously unseen file in the
//! metadata store, inferring tags from the file extension. File content is
//! never read. Per-file failures are logged and the walk continues.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use walkdir::WalkDir;

use crate::common::{Error, Result};
use crate::metadata::{MetadataStore, Tag};

const DEFAULT_TAG: &str = "uncategorized";

/// Extension to tag-texts table. Tags within one entry are created
/// left-to-right with the earlier ones as context, so they co-occur
/// pairwise in insertion order.
const EXTENSION_TAGS: &[(&str, &[&str])] = &[
    (".jpg", &["media", "image"]),
    (".jpeg", &["media", "image"]),
    (".bmp", &["media", "image"]),
    (".png", &["media", "image"]),
    (".gif", &["media", "image"]),
    (".tiff", &["media", "image"]),
    (".tif", &["media", "image"]),
    (".ico", &["media", "image"]),
    (".svg", &["media", "image"]),
    (".psd", &["media", "image"]),
    (".mp3", &["media", "audio"]),
    (".wav", &["media", "audio"]),
    (".wma", &["media", "audio"]),
    (".cda", &["media", "audio"]),
    (".mov", &["media", "video"]),
    (".wmv", &["media", "video"]),
    (".mp4", &["media", "video"]),
    (".avi", &["media", "video"]),
    (".flv", &["media", "video"]),
    (".h264", &["media", "video"]),
    (".mpg", &["media", "video"]),
    (".mpeg", &["media", "video"]),
    (".odt", &["document"]),
    (".rtf", &["document"]),
    (".doc", &["document"]),
    (".docx", &["document"]),
    (".pages", &["document"]),
    (".md", &["document"]),
    (".ps", &["document"]),
    (".txt", &["document"]),
    (".pdf", &["document"]),
    (".eml", &["document", "email"]),
    (".ppt", &["document", "presentation"]),
    (".pptx", &["document", "presentation"]),
    (".key", &["document", "presentation"]),
    (".xls", &["document", "spreadsheet"]),
    (".xlsx", &["document", "spreadsheet"]),
    (".xlsm", &["document", "spreadsheet"]),
    (".csv", &["document", "spreadsheet"]),
    (".numbers", &["document", "spreadsheet"]),
    (".ods", &["document", "spreadsheet"]),
    (".zip", &["archive"]),
    (".tar", &["archive"]),
    (".gz", &["archive"]),
    (".tgz", &["archive"]),
    (".7z", &["archive"]),
    (".rar", &["archive"]),
    (".dmg", &["archive"]),
    (".java", &["code", "java"]),
    (".xml", &["code", "xml"]),
    (".sh", &["code", "scripts"]),
    (".py", &["code", "python"]),
    (".go", &["code", "go"]),
    (".rs", &["code", "rust"]),
    (".sql", &["code", "sql"]),
    (".json", &["code", "javascript"]),
    (".js", &["code", "javascript", "web"]),
    (".css", &["code", "css", "web"]),
    (".html", &["code", "html", "web"]),
    (".htm", &["code", "html", "web"]),
];

/// Extension to resolved tags, populated once per run so the walk does not
/// look tags up repeatedly.
struct TagCache {
    by_extension: HashMap<String, Vec<Tag>>,
    default_tags: Vec<Tag>,
}

impl TagCache {
    async fn build(store: &dyn MetadataStore) -> Result<Self> {
        let mut by_extension = HashMap::new();
        for (ext, texts) in EXTENSION_TAGS {
            let mut tags: Vec<Tag> = Vec::with_capacity(texts.len());
            for text in *texts {
                let tag = store.add_tag(text, &tags).await?;
                tags.push(tag);
            }
            by_extension.insert((*ext).to_string(), tags);
        }
        let default = store.add_tag(DEFAULT_TAG, &[]).await?;
        Ok(Self {
            by_extension,
            default_tags: vec![default],
        })
    }

    /// Tags to apply to a file, by lowercased extension.
    fn infer(&self, path: &Path) -> &[Tag] {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| format!(".{}", ext.to_lowercase()))
            .and_then(|ext| self.by_extension.get(&ext))
            .map(|tags| tags.as_slice())
            .unwrap_or(&self.default_tags)
    }
}

/// Index a single directory tree into the metadata store.
pub async fn index_path(scan_dir: &str, store: Arc<dyn MetadataStore>) -> Result<()> {
    let cache = TagCache::build(store.as_ref()).await?;
    tracing::info!("indexing {}", scan_dir);
    let files = collect_files(scan_dir).await?;
    let mut added = 0usize;
    for path in files {
        match index_file(&path, store.as_ref(), &cache).await {
            Ok(true) => added += 1,
            Ok(false) => {}
            Err(e) => tracing::warn!("could not add {}: {}", path.display(), e),
        }
    }
    tracing::info!("indexed {} new files under {}", added, scan_dir);
    Ok(())
}

/// Walk the tree on a blocking thread, collecting regular files only.
async fn collect_files(scan_dir: &str) -> Result<Vec<PathBuf>> {
    let root = scan_dir.to_string();
    tokio::task::spawn_blocking(move || {
        let mut files = Vec::new();
        for entry in WalkDir::new(&root) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!("skipping unreadable entry: {}", e);
                    continue;
                }
            };
            if entry.file_type().is_file() {
                files.push(entry.into_path());
            }
        }
        files
    })
    .await
    .map_err(|e| Error::Internal(format!("directory walk failed: {}", e)))
}

/// Register one file unless its (dir, name) identity is already known.
/// Returns whether a record was created.
async fn index_file(path: &Path, store: &dyn MetadataStore, cache: &TagCache) -> Result<bool> {
    let (Some(name), Some(dir)) = (
        path.file_name().and_then(|n| n.to_str()),
        path.parent().and_then(|d| d.to_str()),
    ) else {
        return Err(Error::InvalidPath(path.display().to_string()));
    };
    if store.find_file_by_abs_path(name, dir).await?.is_some() {
        return Ok(false);
    }
    let tags = cache.infer(path);
    store.create_file_in_path(name, dir, tags).await?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::SqliteMetadataStore;
    use std::fs;

    #[tokio::test]
    async fn test_tag_cache_wires_co_occurrence() {
        let store = SqliteMetadataStore::in_memory().unwrap();
        let cache = TagCache::build(&store).await.unwrap();

        let jpg = &cache.by_extension[".jpg"];
        assert_eq!(jpg.len(), 2);
        assert_eq!(jpg[0].text, "media");
        assert_eq!(jpg[1].text, "image");
        assert!(store.coincident_tag("image", "media").await.unwrap().is_some());

        // Shared texts resolve to one tag row across extensions.
        assert_eq!(cache.by_extension[".png"][0].id, jpg[0].id);
        assert_eq!(cache.default_tags[0].text, DEFAULT_TAG);
    }

    #[tokio::test]
    async fn test_infer_tags_by_extension() {
        let store = SqliteMetadataStore::in_memory().unwrap();
        let cache = TagCache::build(&store).await.unwrap();

        let texts = |path: &str| -> Vec<String> {
            cache
                .infer(Path::new(path))
                .iter()
                .map(|t| t.text.clone())
                .collect()
        };

        assert_eq!(texts("test.jpg"), vec!["media", "image"]);
        assert_eq!(texts("TEST.JPG"), vec!["media", "image"]);
        assert_eq!(texts("sheet.xlsx"), vec!["document", "spreadsheet"]);
        assert_eq!(texts("/test.jpg/report.xlsx"), vec!["document", "spreadsheet"]);
        assert_eq!(texts("/test/blah/nothing"), vec![DEFAULT_TAG]);
        assert_eq!(texts("odd.xyzzy"), vec![DEFAULT_TAG]);
    }

    #[tokio::test]
    async fn test_index_local_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("one.txt"), b"1").unwrap();
        fs::write(dir.path().join("two.txt"), b"2").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested/three.txt"), b"3").unwrap();
        fs::write(dir.path().join("four.xyzzy"), b"4").unwrap();

        let store: Arc<SqliteMetadataStore> = Arc::new(SqliteMetadataStore::in_memory().unwrap());
        index_path(dir.path().to_str().unwrap(), store.clone())
            .await
            .unwrap();

        let document = store.find_tag("document").await.unwrap().unwrap();
        let texts = store
            .files_with_tags(std::slice::from_ref(&document), "")
            .await
            .unwrap();
        let names: Vec<&str> = texts.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["one.txt", "three.txt", "two.txt"]);

        let default = store.find_tag(DEFAULT_TAG).await.unwrap().unwrap();
        let fallback = store
            .files_with_tags(std::slice::from_ref(&default), "")
            .await
            .unwrap();
        assert_eq!(fallback.len(), 1);
        assert_eq!(fallback[0].name, "four.xyzzy");

        // A second run sees every identity as known and adds nothing.
        index_path(dir.path().to_str().unwrap(), store.clone())
            .await
            .unwrap();
        assert_eq!(
            store
                .files_with_tags(std::slice::from_ref(&document), "")
                .await
                .unwrap()
                .len(),
            3
        );
    }
}
