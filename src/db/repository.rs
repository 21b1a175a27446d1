use rusqlite::{params, Connection, OptionalExtension};

use super::DatabaseError;
use crate::models::*;

// ═══════════════════════════════════════════
// Objects
// ═══════════════════════════════════════════

pub fn get_object(conn: &Connection, oid: ObjectId) -> Result<Option<IndexedObject>, DatabaseError> {
    let object = conn
        .query_row(
            "SELECT oid, st_dev, st_mode, st_nlink, st_uid, st_gid, st_rdev, st_size,
             st_blksize, st_blocks, st_atime, st_mtime, st_ctime, valid
             FROM indexed_object WHERE oid = ?1",
            params![oid],
            |row| {
                Ok(IndexedObject {
                    stat: ObjectStat {
                        oid: row.get(0)?,
                        st_dev: row.get(1)?,
                        st_mode: row.get(2)?,
                        st_nlink: row.get(3)?,
                        st_uid: row.get(4)?,
                        st_gid: row.get(5)?,
                        st_rdev: row.get(6)?,
                        st_size: row.get(7)?,
                        st_blksize: row.get(8)?,
                        st_blocks: row.get(9)?,
                        st_atime: row.get(10)?,
                        st_mtime: row.get(11)?,
                        st_ctime: row.get(12)?,
                    },
                    valid: row.get(13)?,
                })
            },
        )
        .optional()?;
    Ok(object)
}

pub fn count_objects(conn: &Connection) -> Result<u64, DatabaseError> {
    let count = conn.query_row("SELECT COUNT(*) FROM indexed_object", [], |row| row.get(0))?;
    Ok(count)
}

pub fn get_path(conn: &Connection, oid: ObjectId) -> Result<Option<String>, DatabaseError> {
    let path = conn
        .query_row(
            "SELECT path FROM object_path WHERE oid = ?1",
            params![oid],
            |row| row.get(0),
        )
        .optional()?;
    Ok(path)
}

// ═══════════════════════════════════════════
// Tags
// ═══════════════════════════════════════════

/// Tags of one object, ordered by key name.
pub fn get_tags(conn: &Connection, oid: ObjectId) -> Result<Vec<Tag>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT k.name, v.sval FROM tag_value v
         JOIN tag_key k ON k.kid = v.kid
         WHERE v.oid = ?1
         ORDER BY k.name, v.sval",
    )?;
    let tags = stmt
        .query_map(params![oid], |row| {
            Ok(Tag {
                key: row.get(0)?,
                value: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(tags)
}

/// Resolve a tag key name to its id, creating the key on first use.
pub fn get_or_create_tag_key(conn: &Connection, name: &str) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT INTO tag_key (name) VALUES (?1) ON CONFLICT(name) DO NOTHING",
        params![name],
    )?;
    let kid = conn.query_row(
        "SELECT kid FROM tag_key WHERE name = ?1",
        params![name],
        |row| row.get(0),
    )?;
    Ok(kid)
}

// ═══════════════════════════════════════════
// Documents
// ═══════════════════════════════════════════

/// Insert or replace the extracted content of an object.
pub fn upsert_document(conn: &Connection, doc: &Document) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO document (oid, meta, text) VALUES (?1, ?2, ?3)
         ON CONFLICT(oid) DO UPDATE SET
             meta = excluded.meta,
             text = excluded.text,
             indexed_at = datetime('now')",
        params![doc.oid, doc.meta, doc.text],
    )?;
    Ok(())
}

pub fn get_document(conn: &Connection, oid: ObjectId) -> Result<Option<Document>, DatabaseError> {
    let doc = conn
        .query_row(
            "SELECT oid, meta, text FROM document WHERE oid = ?1",
            params![oid],
            |row| {
                Ok(Document {
                    oid: row.get(0)?,
                    meta: row.get(1)?,
                    text: row.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(doc)
}

pub fn count_documents(conn: &Connection) -> Result<u64, DatabaseError> {
    let count = conn.query_row("SELECT COUNT(*) FROM document", [], |row| row.get(0))?;
    Ok(count)
}
