//! Transactional ingestion of one task's scan output.
//!
//! All four phases share a single transaction: attributes, paths, tags,
//! deletions, in that order. Any failure drops the transaction, which
//! rolls back everything the earlier phases wrote.
//!
//! Objects touched by the attribute phase are remembered in a temporary
//! `staged_object` table on the same connection. The work-queue fill reads
//! it after commit.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use rusqlite::{params, Connection, Transaction};

use super::error::{BuildError, Phase};
use super::parse;
use crate::db::get_or_create_tag_key;
use crate::models::ObjectTags;

/// Paths of the four scan output files of a task.
#[derive(Debug, Clone)]
pub struct ScanInputs<'a> {
    pub attributes: &'a Path,
    pub paths: &'a Path,
    pub tags: &'a Path,
    pub deleted: &'a Path,
}

/// Row counts per phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub n_indexed: u64,
    pub n_paths: u64,
    pub n_tagged: u64,
    pub n_deleted: u64,
}

/// Run all four phases in one transaction and commit.
pub fn ingest(conn: &mut Connection, inputs: &ScanInputs<'_>) -> Result<IngestSummary, BuildError> {
    conn.execute_batch(
        "DROP TABLE IF EXISTS temp.staged_object;
         CREATE TEMP TABLE staged_object (oid INTEGER PRIMARY KEY);",
    )?;

    let tx = conn.transaction()?;

    let n_indexed = load_attributes(&tx, inputs.attributes)?;
    tracing::info!(n_indexed, "Attribute phase done");

    let n_paths = load_paths(&tx, inputs.paths)?;
    tracing::info!(n_paths, "Path phase done");

    let tag_sets = collect_tags(inputs.tags)?;
    let n_tagged = load_tags(&tx, tag_sets)?;
    tracing::info!(n_tagged, "Tag phase done");

    let n_deleted = load_deletions(&tx, inputs.deleted)?;
    tracing::info!(n_deleted, "Deletion phase done");

    tx.commit()?;

    Ok(IngestSummary {
        n_indexed,
        n_paths,
        n_tagged,
        n_deleted,
    })
}

/// Call `f` with every non-blank line of `path` and its 1-based number.
fn for_each_line<F>(phase: Phase, path: &Path, mut f: F) -> Result<(), BuildError>
where
    F: FnMut(usize, &str) -> Result<(), BuildError>,
{
    let input_err = |source| BuildError::Input {
        phase,
        path: path.to_path_buf(),
        source,
    };
    let reader = BufReader::new(File::open(path).map_err(input_err)?);
    for (idx, line) in reader.lines().enumerate() {
        let line = line.map_err(input_err)?;
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        f(idx + 1, line)?;
    }
    Ok(())
}

fn parse_error(phase: Phase, line: usize) -> impl FnOnce(String) -> BuildError {
    move |reason| BuildError::Parse {
        phase,
        line,
        reason,
    }
}

/// Phase 1: upsert object attributes. The validity flag of an existing row
/// is left alone; new rows start valid.
pub fn load_attributes(tx: &Transaction<'_>, path: &Path) -> Result<u64, BuildError> {
    let mut upsert = tx.prepare(
        "INSERT INTO indexed_object (oid, st_dev, st_mode, st_nlink, st_uid, st_gid,
         st_rdev, st_size, st_blksize, st_blocks, st_atime, st_mtime, st_ctime)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
         ON CONFLICT(oid) DO UPDATE SET
             st_dev = excluded.st_dev,
             st_mode = excluded.st_mode,
             st_nlink = excluded.st_nlink,
             st_uid = excluded.st_uid,
             st_gid = excluded.st_gid,
             st_rdev = excluded.st_rdev,
             st_size = excluded.st_size,
             st_blksize = excluded.st_blksize,
             st_blocks = excluded.st_blocks,
             st_atime = excluded.st_atime,
             st_mtime = excluded.st_mtime,
             st_ctime = excluded.st_ctime",
    )?;
    let mut stage = tx.prepare("INSERT OR IGNORE INTO temp.staged_object (oid) VALUES (?1)")?;

    let mut count = 0u64;
    for_each_line(Phase::Attributes, path, |line_no, line| {
        let stat =
            parse::parse_attribute_line(line).map_err(parse_error(Phase::Attributes, line_no))?;
        upsert.execute(params![
            stat.oid,
            stat.st_dev,
            stat.st_mode,
            stat.st_nlink,
            stat.st_uid,
            stat.st_gid,
            stat.st_rdev,
            stat.st_size,
            stat.st_blksize,
            stat.st_blocks,
            stat.st_atime,
            stat.st_mtime,
            stat.st_ctime,
        ])?;
        stage.execute(params![stat.oid])?;
        count += 1;
        Ok(())
    })?;
    Ok(count)
}

/// Phase 2: upsert object paths. Referenced objects must already exist.
pub fn load_paths(tx: &Transaction<'_>, path: &Path) -> Result<u64, BuildError> {
    let mut upsert = tx.prepare(
        "INSERT INTO object_path (oid, path) VALUES (?1, ?2)
         ON CONFLICT(oid) DO UPDATE SET path = excluded.path",
    )?;

    let mut count = 0u64;
    for_each_line(Phase::Paths, path, |line_no, line| {
        let (oid, object_path) =
            parse::parse_path_line(line).map_err(parse_error(Phase::Paths, line_no))?;
        upsert.execute(params![oid, object_path])?;
        count += 1;
        Ok(())
    })?;
    Ok(count)
}

/// Parse every tag line up front. A blob that fails to parse aborts the
/// phase before anything is written.
pub fn collect_tags(path: &Path) -> Result<Vec<ObjectTags>, BuildError> {
    let mut sets = Vec::new();
    for_each_line(Phase::Tags, path, |line_no, line| {
        if let Some(set) = parse::parse_tag_line(line).map_err(parse_error(Phase::Tags, line_no))? {
            sets.push(set);
        }
        Ok(())
    })?;
    Ok(sets)
}

/// Phase 3: replace the tag set of every object in `sets`.
pub fn load_tags(tx: &Transaction<'_>, sets: Vec<ObjectTags>) -> Result<u64, BuildError> {
    let mut clear = tx.prepare("DELETE FROM tag_value WHERE oid = ?1")?;
    let mut insert = tx.prepare("INSERT INTO tag_value (oid, kid, sval) VALUES (?1, ?2, ?3)")?;
    let mut key_ids: HashMap<String, i64> = HashMap::new();

    let count = sets.len() as u64;
    for set in sets {
        clear.execute(params![set.oid])?;
        for tag in set.tags {
            let kid = match key_ids.get(&tag.key) {
                Some(&kid) => kid,
                None => {
                    let kid = get_or_create_tag_key(tx, &tag.key)?;
                    key_ids.insert(tag.key, kid);
                    kid
                }
            };
            insert.execute(params![set.oid, kid, tag.value])?;
        }
    }
    Ok(count)
}

/// Phase 4: clear the validity flag of every listed object. Nothing else
/// about the object changes.
pub fn load_deletions(tx: &Transaction<'_>, path: &Path) -> Result<u64, BuildError> {
    let mut invalidate = tx.prepare("UPDATE indexed_object SET valid = 0 WHERE oid = ?1")?;

    let mut count = 0u64;
    for_each_line(Phase::Deletions, path, |line_no, line| {
        let oid = parse::parse_oid(line).map_err(parse_error(Phase::Deletions, line_no))?;
        invalidate.execute(params![oid])?;
        count += 1;
        Ok(())
    })?;
    Ok(count)
}
