//! SQLite-backed metadata store.
//!
//! Four relations hold the whole tag graph: `tag`, `file`, `file_tag` and
//! `tag_assoc`. Co-occurrence pairs are kept canonical (smaller id first) so
//! the pair set has one row per unordered pair. The connection sits behind a
//! lock and every multi-statement mutation runs in one transaction; an
//! uncommitted transaction rolls back when dropped.

use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::path::Path;
use tokio::sync::Mutex;

use async_trait::async_trait;

use crate::common::{Error, Result};
use crate::metadata::metadata::{FileInfo, MetadataStore, Tag};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS tag(id INTEGER PRIMARY KEY, txt TEXT);
CREATE TABLE IF NOT EXISTS file(id INTEGER PRIMARY KEY, name TEXT, dir TEXT);
CREATE TABLE IF NOT EXISTS file_tag(fid INTEGER, tid INTEGER, PRIMARY KEY(fid, tid));
CREATE TABLE IF NOT EXISTS tag_assoc(t1 INTEGER, t2 INTEGER, PRIMARY KEY(t1, t2));
CREATE UNIQUE INDEX IF NOT EXISTS tag_txt_idx ON tag(txt);
CREATE UNIQUE INDEX IF NOT EXISTS file_path_idx ON file(name, dir);
"#;

/// Metadata store over a single SQLite database file.
pub struct SqliteMetadataStore {
    conn: Mutex<Connection>,
}

impl SqliteMetadataStore {
    /// Open or create a database at the given path. The schema is created
    /// idempotently.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

/// SQL predicate for a name filter: exact match unless the filter carries a
/// `*` wildcard, which is translated to `LIKE`.
fn name_filter_clause(column: &str, filter: &str) -> (String, Value) {
    if filter.contains('*') {
        (
            format!("{} LIKE ?", column),
            Value::Text(filter.replace('*', "%")),
        )
    } else {
        (format!("{} = ?", column), Value::Text(filter.to_string()))
    }
}

fn tag_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Tag> {
    Ok(Tag {
        id: row.get(0)?,
        text: row.get(1)?,
    })
}

fn file_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<FileInfo> {
    Ok(FileInfo {
        id: row.get(0)?,
        name: row.get(1)?,
        dir: row.get(2)?,
    })
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn find_tag(&self, text: &str) -> Result<Option<Tag>> {
        let conn = self.conn.lock().await;
        let tag = conn
            .query_row(
                "SELECT id, txt FROM tag WHERE txt = ?1",
                params![text],
                tag_from_row,
            )
            .optional()?;
        Ok(tag)
    }

    async fn all_tags(&self) -> Result<Vec<Tag>> {
        self.coincident_tags(&[], "").await
    }

    async fn add_tag(&self, text: &str, context: &[Tag]) -> Result<Tag> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let existing = tx
            .query_row(
                "SELECT id, txt FROM tag WHERE txt = ?1",
                params![text],
                tag_from_row,
            )
            .optional()?;
        let tag = match existing {
            Some(tag) => tag,
            None => {
                tx.execute("INSERT INTO tag (txt) VALUES (?1)", params![text])?;
                Tag {
                    id: tx.last_insert_rowid(),
                    text: text.to_string(),
                }
            }
        };
        for ctx in context {
            if ctx.id == tag.id {
                continue;
            }
            tx.execute(
                "INSERT OR IGNORE INTO tag_assoc VALUES (?1, ?2)",
                params![ctx.id.min(tag.id), ctx.id.max(tag.id)],
            )?;
        }
        tx.commit()?;
        Ok(tag)
    }

    async fn coincident_tag(&self, text: &str, other: &str) -> Result<Option<Tag>> {
        let conn = self.conn.lock().await;
        let tag = conn
            .query_row(
                "SELECT id, txt FROM tag WHERE txt = ?1 AND id IN (\
                 SELECT ta.t1 FROM tag_assoc ta, tag tt WHERE tt.txt = ?2 AND tt.id = ta.t2 \
                 UNION \
                 SELECT ta.t2 FROM tag_assoc ta, tag tt WHERE tt.txt = ?2 AND tt.id = ta.t1)",
                params![text, other],
                tag_from_row,
            )
            .optional()?;
        Ok(tag)
    }

    async fn coincident_tags(&self, context: &[Tag], name_filter: &str) -> Result<Vec<Tag>> {
        let mut params: Vec<Value> = Vec::new();
        let mut query;
        if context.is_empty() {
            query = String::from("SELECT id, txt FROM tag");
            if !name_filter.is_empty() {
                let (clause, value) = name_filter_clause("txt", name_filter);
                query.push_str(" WHERE ");
                query.push_str(&clause);
                params.push(value);
            }
            query.push_str(" ORDER BY txt ASC");
        } else {
            // One peer set per context tag, intersected: a tag must co-occur
            // with every tag in the context to show up.
            query = String::from("SELECT DISTINCT ot.id, ot.txt FROM tag ot WHERE ot.id IN (");
            for (i, tag) in context.iter().enumerate() {
                if i > 0 {
                    query.push_str(" INTERSECT ");
                }
                query.push_str(
                    "SELECT peer FROM (\
                     SELECT ta.t1 AS peer FROM tag_assoc ta, tag t \
                     WHERE t.id = ta.t2 AND t.txt = ? \
                     UNION \
                     SELECT ta.t2 AS peer FROM tag_assoc ta, tag t \
                     WHERE t.id = ta.t1 AND t.txt = ?)",
                );
                params.push(Value::Text(tag.text.clone()));
                params.push(Value::Text(tag.text.clone()));
            }
            query.push(')');
            if !name_filter.is_empty() {
                let (clause, value) = name_filter_clause("ot.txt", name_filter);
                query.push_str(" AND ");
                query.push_str(&clause);
                params.push(value);
            }
            query.push_str(" ORDER BY ot.txt ASC");
        }

        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&query)?;
        let rows = stmt.query_map(params_from_iter(params), tag_from_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Error::from)
    }

    async fn files_with_tags(&self, tags: &[Tag], name_filter: &str) -> Result<Vec<FileInfo>> {
        let mut params: Vec<Value> = Vec::new();
        let mut query = String::from("SELECT f.id, f.name, f.dir FROM file f");
        for (i, tag) in tags.iter().enumerate() {
            query.push_str(if i == 0 { " WHERE " } else { " AND " });
            query.push_str(
                "EXISTS (SELECT 1 FROM file_tag ft, tag t \
                 WHERE ft.tid = t.id AND ft.fid = f.id AND t.txt = ?)",
            );
            params.push(Value::Text(tag.text.clone()));
        }
        if !name_filter.is_empty() {
            query.push_str(if tags.is_empty() { " WHERE " } else { " AND " });
            let (clause, value) = name_filter_clause("f.name", name_filter);
            query.push_str(&clause);
            params.push(value);
        }
        query.push_str(" ORDER BY f.name ASC");

        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&query)?;
        let rows = stmt.query_map(params_from_iter(params), file_from_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Error::from)
    }

    async fn count_files_with_tag(&self, tag: &Tag) -> Result<i64> {
        let conn = self.conn.lock().await;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM file_tag WHERE tid = ?1",
            params![tag.id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    async fn count_files_with_single_tag(&self, tag: &Tag) -> Result<i64> {
        let conn = self.conn.lock().await;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM file_tag ft WHERE ft.tid = ?1 AND NOT EXISTS (\
             SELECT 1 FROM file_tag o WHERE o.fid = ft.fid AND o.tid <> ?1)",
            params![tag.id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    async fn tag_file(&self, file_id: i64, tags: &[Tag]) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        for tag in tags {
            tx.execute(
                "INSERT OR IGNORE INTO file_tag VALUES (?1, ?2)",
                params![file_id, tag.id],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    async fn untag_file(&self, file_id: i64, tag_id: i64) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "DELETE FROM file_tag WHERE fid = ?1 AND tid = ?2",
            params![file_id, tag_id],
        )?;
        Ok(())
    }

    async fn untag_files(&self, path: &[Tag]) -> Result<()> {
        let Some(last) = path.last() else {
            return Ok(());
        };
        let mut params: Vec<Value> = vec![Value::Integer(last.id)];
        let mut query = String::from(
            "DELETE FROM file_tag WHERE tid = ? AND fid IN (SELECT f.id FROM file f WHERE ",
        );
        for (i, tag) in path.iter().enumerate() {
            if i > 0 {
                query.push_str(" AND ");
            }
            query.push_str(
                "EXISTS (SELECT 1 FROM file_tag ft, tag t \
                 WHERE ft.tid = t.id AND ft.fid = f.id AND t.txt = ?)",
            );
            params.push(Value::Text(tag.text.clone()));
        }
        query.push(')');

        let conn = self.conn.lock().await;
        conn.execute(&query, params_from_iter(params))?;
        Ok(())
    }

    async fn unassociate_tags(&self, a: &Tag, b: &Tag) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "DELETE FROM tag_assoc WHERE t1 = ?1 AND t2 = ?2",
            params![a.id.min(b.id), a.id.max(b.id)],
        )?;
        Ok(())
    }

    async fn delete_tag(&self, tag: &Tag) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM tag_assoc WHERE t1 = ?1 OR t2 = ?1",
            params![tag.id],
        )?;
        tx.execute("DELETE FROM tag WHERE id = ?1", params![tag.id])?;
        tx.commit()?;
        Ok(())
    }

    async fn find_file_by_abs_path(&self, name: &str, dir: &str) -> Result<Option<FileInfo>> {
        let conn = self.conn.lock().await;
        let file = conn
            .query_row(
                "SELECT id, name, dir FROM file WHERE name = ?1 AND dir = ?2",
                params![name, dir],
                file_from_row,
            )
            .optional()?;
        Ok(file)
    }

    async fn create_file_in_path(&self, name: &str, dir: &str, tags: &[Tag]) -> Result<FileInfo> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO file (name, dir) VALUES (?1, ?2)",
            params![name, dir],
        )?;
        let file = FileInfo {
            id: tx.last_insert_rowid(),
            name: name.to_string(),
            dir: dir.to_string(),
        };
        for tag in tags {
            tx.execute(
                "INSERT OR IGNORE INTO file_tag VALUES (?1, ?2)",
                params![file.id, tag.id],
            )?;
        }
        tx.commit()?;
        Ok(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SqliteMetadataStore {
        SqliteMetadataStore::in_memory().expect("in-memory store")
    }

    #[tokio::test]
    async fn test_add_tag_no_duplicates() {
        let db = store();
        assert!(db.all_tags().await.unwrap().is_empty());

        let tag = db.add_tag("toptag", &[]).await.unwrap();
        let tags = db.all_tags().await.unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0], tag);

        let again = db.add_tag("toptag", &[]).await.unwrap();
        assert_eq!(again.id, tag.id);
        assert_eq!(db.all_tags().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_add_tag_is_idempotent() {
        let db = store();
        let a = db.add_tag("a", &[]).await.unwrap();
        let b = db.add_tag("b", &[a.clone()]).await.unwrap();

        // Repeating the same call leaves the graph unchanged.
        let b2 = db.add_tag("b", &[a.clone()]).await.unwrap();
        assert_eq!(b2, b);
        let peers = db.coincident_tags(&[a.clone()], "").await.unwrap();
        assert_eq!(peers, vec![b.clone()]);
        // And the reversed insertion order maps to the same canonical pair.
        db.add_tag("a", &[b.clone()]).await.unwrap();
        assert_eq!(db.coincident_tags(&[a], "").await.unwrap(), vec![b]);
    }

    #[tokio::test]
    async fn test_coincident_tag_is_symmetric() {
        let db = store();
        let a = db.add_tag("a0", &[]).await.unwrap();
        let b = db.add_tag("a1", &[a.clone()]).await.unwrap();

        assert!(db.coincident_tag(&a.text, &b.text).await.unwrap().is_some());
        assert!(db.coincident_tag(&b.text, &a.text).await.unwrap().is_some());
        assert!(db.coincident_tag(&a.text, "junk").await.unwrap().is_none());
        assert!(db.coincident_tag("junk", &a.text).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_coincident_tags_intersection() {
        let db = store();
        let photo = db.add_tag("photo", &[]).await.unwrap();
        let travel = db.add_tag("travel", &[photo.clone()]).await.unwrap();
        let landscape = db
            .add_tag("landscape", &[photo.clone(), travel.clone()])
            .await
            .unwrap();

        let peers = db.coincident_tags(&[photo.clone()], "").await.unwrap();
        assert_eq!(peers, vec![landscape.clone(), travel.clone()]);

        let peers = db
            .coincident_tags(&[photo.clone(), travel.clone()], "")
            .await
            .unwrap();
        assert_eq!(peers, vec![landscape.clone()]);

        let peers = db
            .coincident_tags(&[landscape, photo], "")
            .await
            .unwrap();
        assert_eq!(peers, vec![travel]);
    }

    #[tokio::test]
    async fn test_coincident_tags_name_filter() {
        let db = store();
        let top = db.add_tag("top", &[]).await.unwrap();
        db.add_tag("alpha", &[top.clone()]).await.unwrap();
        db.add_tag("beta", &[top.clone()]).await.unwrap();

        let peers = db.coincident_tags(&[top.clone()], "alpha").await.unwrap();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].text, "alpha");

        let peers = db.coincident_tags(&[top], "*a").await.unwrap();
        assert_eq!(peers.len(), 2);

        let all = db.coincident_tags(&[], "*et*").await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].text, "beta");
    }

    #[tokio::test]
    async fn test_unassociate_keeps_tag_rows() {
        let db = store();
        let a = db.add_tag("a0", &[]).await.unwrap();
        let b = db.add_tag("a1", &[a.clone()]).await.unwrap();

        db.unassociate_tags(&a, &b).await.unwrap();
        assert!(db.coincident_tag(&a.text, &b.text).await.unwrap().is_none());
        assert!(db.coincident_tag(&b.text, &a.text).await.unwrap().is_none());

        assert_eq!(db.find_tag(&a.text).await.unwrap(), Some(a));
        assert_eq!(db.find_tag(&b.text).await.unwrap(), Some(b));
    }

    #[tokio::test]
    async fn test_delete_tag_removes_pairs() {
        let db = store();
        let a = db.add_tag("a", &[]).await.unwrap();
        let b = db.add_tag("b", &[a.clone()]).await.unwrap();
        let c = db.add_tag("c", &[a.clone(), b.clone()]).await.unwrap();

        db.delete_tag(&b).await.unwrap();
        assert!(db.find_tag("b").await.unwrap().is_none());
        assert_eq!(db.coincident_tags(&[a], "").await.unwrap(), vec![c]);
    }

    #[tokio::test]
    async fn test_files_with_tags_wildcard() {
        let db = store();
        let text = db.add_tag("text", &[]).await.unwrap();
        for i in 1..=9 {
            db.create_file_in_path(&format!("r{}.txt", i), "/data", std::slice::from_ref(&text))
                .await
                .unwrap();
        }

        let all = db.files_with_tags(&[text.clone()], "r*").await.unwrap();
        assert_eq!(all.len(), 9);

        let one = db.files_with_tags(&[text.clone()], "r5.txt").await.unwrap();
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].name, "r5.txt");

        let none = db.files_with_tags(&[text], "q*").await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_files_with_tags_requires_all() {
        let db = store();
        let a = db.add_tag("a", &[]).await.unwrap();
        let b = db.add_tag("b", &[a.clone()]).await.unwrap();
        let both = db
            .create_file_in_path("both", "/p1", &[a.clone(), b.clone()])
            .await
            .unwrap();
        db.create_file_in_path("only-a", "/p2", std::slice::from_ref(&a))
            .await
            .unwrap();

        let files = db.files_with_tags(&[a.clone(), b.clone()], "").await.unwrap();
        assert_eq!(files, vec![both]);
        let files = db.files_with_tags(&[a], "").await.unwrap();
        assert_eq!(files.len(), 2);
        // Same result regardless of tag order.
        let b_first = db
            .files_with_tags(&[b.clone()], "")
            .await
            .unwrap();
        assert_eq!(b_first.len(), 1);
    }

    #[tokio::test]
    async fn test_single_tag_count() {
        let db = store();
        let a = db.add_tag("a", &[]).await.unwrap();
        let b = db.add_tag("b", &[a.clone()]).await.unwrap();
        db.create_file_in_path("solo", "/p", std::slice::from_ref(&a))
            .await
            .unwrap();
        db.create_file_in_path("pair", "/p", &[a.clone(), b.clone()])
            .await
            .unwrap();

        assert_eq!(db.count_files_with_single_tag(&a).await.unwrap(), 1);
        assert_eq!(db.count_files_with_single_tag(&b).await.unwrap(), 0);
        assert_eq!(db.count_files_with_tag(&a).await.unwrap(), 2);
        assert_eq!(db.count_files_with_tag(&b).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_tag_and_untag_file() {
        let db = store();
        let a = db.add_tag("a", &[]).await.unwrap();
        let b = db.add_tag("b", &[]).await.unwrap();
        let file = db
            .create_file_in_path("f", "/p", std::slice::from_ref(&a))
            .await
            .unwrap();

        db.tag_file(file.id, std::slice::from_ref(&b)).await.unwrap();
        assert_eq!(
            db.files_with_tags(&[b.clone()], "").await.unwrap(),
            vec![file.clone()]
        );

        db.untag_file(file.id, b.id).await.unwrap();
        assert!(db.files_with_tags(&[b], "").await.unwrap().is_empty());
        // Re-tagging the same pair twice is a no-op.
        db.tag_file(file.id, std::slice::from_ref(&a)).await.unwrap();
        assert_eq!(db.count_files_with_tag(&a).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_untag_files_strips_last_path_tag() {
        let db = store();
        let a = db.add_tag("a", &[]).await.unwrap();
        let b = db.add_tag("b", &[a.clone()]).await.unwrap();
        let both = db
            .create_file_in_path("both", "/p1", &[a.clone(), b.clone()])
            .await
            .unwrap();
        let only_b = db
            .create_file_in_path("only-b", "/p2", std::slice::from_ref(&b))
            .await
            .unwrap();

        db.untag_files(&[a.clone(), b.clone()]).await.unwrap();

        // Only the file carrying the full path lost the tag.
        assert_eq!(db.files_with_tags(&[b.clone()], "").await.unwrap(), vec![only_b]);
        assert_eq!(db.files_with_tags(&[a], "").await.unwrap(), vec![both]);
    }

    #[tokio::test]
    async fn test_file_identity() {
        let db = store();
        let tag = db.add_tag("t", &[]).await.unwrap();
        let file = db
            .create_file_in_path("doc.pdf", "/ext", std::slice::from_ref(&tag))
            .await
            .unwrap();

        let found = db.find_file_by_abs_path("doc.pdf", "/ext").await.unwrap();
        assert_eq!(found, Some(file));
        assert!(db
            .find_file_by_abs_path("doc.pdf", "/other")
            .await
            .unwrap()
            .is_none());

        // (name, dir) is unique; a second insert surfaces the constraint.
        let dup = db
            .create_file_in_path("doc.pdf", "/ext", std::slice::from_ref(&tag))
            .await;
        assert!(matches!(dup, Err(Error::Storage(_))));
    }

    #[tokio::test]
    async fn test_all_tags_sorted_ascending() {
        let db = store();
        db.add_tag("zebra", &[]).await.unwrap();
        db.add_tag("apple", &[]).await.unwrap();
        db.add_tag("mango", &[]).await.unwrap();

        let names: Vec<String> = db
            .all_tags()
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.text)
            .collect();
        assert_eq!(names, vec!["apple", "mango", "zebra"]);
    }
}
