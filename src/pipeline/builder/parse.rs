//! Scan output line parsers.
//!
//! Four line formats, one per scan file:
//! - attributes: `oid,type,uperm,gperm,operm,nlink,uid,gid,size,atime,mtime,ctime`
//! - paths: `oid,path` with the path optionally CSV-quoted
//! - tags: `oid,"<hpss><fs><key>value</key>...</fs></hpss>"`
//! - deletions: `oid`
//!
//! Parsers return a plain reason string; the loader attaches phase and
//! line number.

use std::sync::LazyLock;

use regex::Regex;

use crate::models::{ObjectId, ObjectStat, ObjectTags, Tag, S_IFDIR, S_IFLNK, S_IFREG};

/// Device number reported for every archived object.
pub const ARCHIVE_DEV: u64 = 44;
pub const ARCHIVE_RDEV: u64 = 0;
pub const ARCHIVE_BLKSIZE: u64 = 512;

// Archive object types
const OBJECT_TYPE_FILE: u32 = 0x81;
const OBJECT_TYPE_SYM_LINK: u32 = 0x82;
const OBJECT_TYPE_DIRECTORY: u32 = 0x84;

// Archive permission bits
const PERM_READ: u32 = 0x20;
const PERM_WRITE: u32 = 0x40;
const PERM_EXEC: u32 = 0x80;

/// Marker that identifies a tag line.
pub const TAG_BLOB_MARKER: &str = "<hpss><fs>";
const TAG_BLOB_END: &str = "</fs></hpss>";

/// Parse an unsigned integer in decimal or `0x` hex.
fn parse_uint(field: &str) -> Result<u64, String> {
    let field = field.trim();
    let parsed = match field.strip_prefix("0x").or_else(|| field.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => field.parse(),
    };
    parsed.map_err(|e| format!("invalid number {field:?}: {e}"))
}

fn parse_u32(field: &str) -> Result<u32, String> {
    let value = parse_uint(field)?;
    u32::try_from(value).map_err(|_| format!("value {value} out of range"))
}

fn parse_time(field: &str) -> Result<i64, String> {
    let value = parse_uint(field)?;
    i64::try_from(value).map_err(|_| format!("timestamp {value} out of range"))
}

pub fn parse_oid(field: &str) -> Result<ObjectId, String> {
    parse_uint(field)
}

/// Translate an archive type and permission triple into `st_mode`.
pub fn st_mode(object_type: u32, uperm: u32, gperm: u32, operm: u32) -> u32 {
    let type_bits = match object_type {
        OBJECT_TYPE_FILE => S_IFREG,
        OBJECT_TYPE_SYM_LINK => S_IFLNK,
        OBJECT_TYPE_DIRECTORY => S_IFDIR,
        _ => 0,
    };
    let rwx = |perm: u32| -> u32 {
        let mut bits = 0;
        if perm & PERM_READ != 0 {
            bits |= 0o4;
        }
        if perm & PERM_WRITE != 0 {
            bits |= 0o2;
        }
        if perm & PERM_EXEC != 0 {
            bits |= 0o1;
        }
        bits
    };
    type_bits | rwx(uperm) << 6 | rwx(gperm) << 3 | rwx(operm)
}

pub fn parse_attribute_line(line: &str) -> Result<ObjectStat, String> {
    let fields: Vec<&str> = line.split(',').collect();
    if fields.len() != 12 {
        return Err(format!("expected 12 fields, found {}", fields.len()));
    }

    let size = parse_uint(fields[8])?;
    Ok(ObjectStat {
        oid: parse_oid(fields[0])?,
        st_dev: ARCHIVE_DEV,
        st_mode: st_mode(
            parse_u32(fields[1])?,
            parse_u32(fields[2])?,
            parse_u32(fields[3])?,
            parse_u32(fields[4])?,
        ),
        st_nlink: parse_uint(fields[5])?,
        st_uid: parse_u32(fields[6])?,
        st_gid: parse_u32(fields[7])?,
        st_rdev: ARCHIVE_RDEV,
        st_size: size,
        st_blksize: ARCHIVE_BLKSIZE,
        st_blocks: size.div_ceil(ARCHIVE_BLKSIZE),
        st_atime: parse_time(fields[9])?,
        st_mtime: parse_time(fields[10])?,
        st_ctime: parse_time(fields[11])?,
    })
}

/// Undo CSV quoting of a single field: strip the outer quotes and collapse
/// doubled quotes. Unquoted fields are returned as-is.
pub fn unquote_csv(field: &str) -> Result<String, String> {
    let Some(inner) = field.strip_prefix('"') else {
        return Ok(field.to_string());
    };
    let inner = inner
        .strip_suffix('"')
        .ok_or_else(|| "unterminated quoted field".to_string())?;
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '"' {
            if chars.peek() == Some(&'"') {
                chars.next();
            } else {
                return Err("stray quote inside quoted field".to_string());
            }
        }
        out.push(c);
    }
    Ok(out)
}

fn split_oid(line: &str) -> Result<(ObjectId, &str), String> {
    let (oid, rest) = line
        .split_once(',')
        .ok_or_else(|| "missing ',' after object id".to_string())?;
    Ok((parse_oid(oid)?, rest))
}

pub fn parse_path_line(line: &str) -> Result<(ObjectId, String), String> {
    let (oid, rest) = split_oid(line)?;
    let path = unquote_csv(rest)?;
    if path.is_empty() {
        return Err("empty path".to_string());
    }
    Ok((oid, path))
}

/// Parse a tag line. Returns `Ok(None)` for lines without a tag blob.
pub fn parse_tag_line(line: &str) -> Result<Option<ObjectTags>, String> {
    if !line.contains(TAG_BLOB_MARKER) {
        return Ok(None);
    }
    let (oid, rest) = split_oid(line)?;
    let blob = unquote_csv(rest.trim())?;
    let tags = parse_tag_blob(&blob)?;
    Ok(Some(ObjectTags { oid, tags }))
}

/// Opening (or self-closing) element at the start of the input.
static OPEN_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^<([A-Za-z_][A-Za-z0-9_.\-]*)\s*(/?)>").unwrap());

/// Flatten `<hpss><fs><k>v</k>...</fs></hpss>` into key/value pairs.
pub fn parse_tag_blob(blob: &str) -> Result<Vec<Tag>, String> {
    let body = blob
        .trim()
        .strip_prefix(TAG_BLOB_MARKER)
        .and_then(|rest| rest.strip_suffix(TAG_BLOB_END))
        .ok_or_else(|| "tag blob is not wrapped in <hpss><fs>...</fs></hpss>".to_string())?;

    let mut tags = Vec::new();
    let mut rest = body.trim_start();
    while !rest.is_empty() {
        let caps = OPEN_TAG
            .captures(rest)
            .ok_or_else(|| format!("expected an element at {:?}", preview(rest)))?;
        let key = caps[1].to_string();
        let self_closing = &caps[2] == "/";
        rest = &rest[caps[0].len()..];

        let value = if self_closing {
            String::new()
        } else {
            let close = format!("</{key}>");
            let end = rest
                .find(&close)
                .ok_or_else(|| format!("element <{key}> is not closed"))?;
            let raw = &rest[..end];
            if raw.contains('<') {
                return Err(format!("element <{key}> has nested markup"));
            }
            rest = &rest[end + close.len()..];
            unescape_xml(raw)?
        };

        tags.push(Tag { key, value });
        rest = rest.trim_start();
    }
    Ok(tags)
}

fn preview(s: &str) -> String {
    s.chars().take(24).collect()
}

fn unescape_xml(raw: &str) -> Result<String, String> {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let after = &rest[amp + 1..];
        let semi = after
            .find(';')
            .ok_or_else(|| format!("unterminated entity in {raw:?}"))?;
        let entity = &after[..semi];
        let decoded = match entity {
            "lt" => '<',
            "gt" => '>',
            "amp" => '&',
            "quot" => '"',
            "apos" => '\'',
            _ => {
                let code = if let Some(hex) = entity.strip_prefix("#x") {
                    u32::from_str_radix(hex, 16).ok()
                } else if let Some(dec) = entity.strip_prefix('#') {
                    dec.parse().ok()
                } else {
                    None
                };
                code.and_then(char::from_u32)
                    .ok_or_else(|| format!("unknown entity &{entity};"))?
            }
        };
        out.push(decoded);
        rest = &after[semi + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::S_IFMT;

    #[test]
    fn attribute_line_translates_mode() {
        // 0x81 regular file, rw- r-- r--
        let stat = parse_attribute_line("1001,129,96,32,32,1,500,100,1025,10,20,30").unwrap();
        assert_eq!(stat.oid, 1001);
        assert_eq!(stat.st_mode, S_IFREG | 0o644);
        assert_eq!(stat.st_dev, ARCHIVE_DEV);
        assert_eq!(stat.st_blksize, 512);
        assert_eq!(stat.st_blocks, 3);
        assert_eq!((stat.st_atime, stat.st_mtime, stat.st_ctime), (10, 20, 30));
    }

    #[test]
    fn object_types_map_to_file_type_bits() {
        assert_eq!(st_mode(0x84, 0xe0, 0xa0, 0xa0), S_IFDIR | 0o755);
        assert_eq!(st_mode(0x82, 0xe0, 0xe0, 0xe0) & S_IFMT, S_IFLNK);
        // Hard links and anything unknown carry no type bits
        assert_eq!(st_mode(0x83, 0x20, 0, 0), 0o400);
    }

    #[test]
    fn hex_fields_accepted() {
        let stat = parse_attribute_line("0x10,0x81,0x20,0,0,1,0,0,0,0,0,0").unwrap();
        assert_eq!(stat.oid, 16);
        assert_eq!(stat.st_mode, S_IFREG | 0o400);
        assert_eq!(stat.st_blocks, 0);
    }

    #[test]
    fn attribute_line_field_count_checked() {
        let err = parse_attribute_line("1,129,96").unwrap_err();
        assert!(err.contains("12 fields"));
        assert!(parse_attribute_line("x,129,96,32,32,1,500,100,1025,10,20,30").is_err());
    }

    #[test]
    fn path_line_quoted_and_plain() {
        assert_eq!(
            parse_path_line(r#"7,"/proj/a, b/""quoted"".txt""#).unwrap(),
            (7, r#"/proj/a, b/"quoted".txt"#.to_string())
        );
        assert_eq!(
            parse_path_line("8,/proj/plain.txt").unwrap(),
            (8, "/proj/plain.txt".to_string())
        );
        assert!(parse_path_line("9").is_err());
        assert!(parse_path_line(r#"9,"/open"#).is_err());
    }

    #[test]
    fn tag_line_parsed_into_pairs() {
        let line = r#"42,"<hpss><fs><project>climate</project><owner>a&amp;b</owner><empty/></fs></hpss>""#;
        let parsed = parse_tag_line(line).unwrap().unwrap();
        assert_eq!(parsed.oid, 42);
        assert_eq!(
            parsed.tags,
            vec![
                Tag { key: "project".into(), value: "climate".into() },
                Tag { key: "owner".into(), value: "a&b".into() },
                Tag { key: "empty".into(), value: String::new() },
            ]
        );
    }

    #[test]
    fn tag_values_with_doubled_quotes() {
        let line = r#"5,"<hpss><fs><note>say ""hi"" &#65;</note></fs></hpss>""#;
        let parsed = parse_tag_line(line).unwrap().unwrap();
        assert_eq!(parsed.tags[0].value, r#"say "hi" A"#);
    }

    #[test]
    fn lines_without_blob_skipped() {
        assert_eq!(parse_tag_line("5,").unwrap(), None);
        assert_eq!(parse_tag_line("5,<other/>").unwrap(), None);
    }

    #[test]
    fn empty_tag_set_allowed() {
        let parsed = parse_tag_line(r#"5,"<hpss><fs></fs></hpss>""#).unwrap().unwrap();
        assert!(parsed.tags.is_empty());
    }

    #[test]
    fn malformed_blobs_rejected() {
        assert!(parse_tag_blob("<hpss><fs><a>1</b></fs></hpss>").is_err());
        assert!(parse_tag_blob("<hpss><fs><a><b>1</b></a></fs></hpss>").is_err());
        assert!(parse_tag_blob("<hpss><fs>text</fs></hpss>").is_err());
        assert!(parse_tag_blob("<hpss><fs><a>&bogus;</a></fs></hpss>").is_err());
        assert!(parse_tag_blob("<hpss><fs><a>1</a>").is_err());
    }

    #[test]
    fn oid_hex_and_decimal() {
        assert_eq!(parse_oid("  77 ").unwrap(), 77);
        assert_eq!(parse_oid("0xff").unwrap(), 255);
        assert!(parse_oid("").is_err());
    }
}
