use serde::{Deserialize, Serialize};

/// Object identifier in the archive namespace; stable across scans.
pub type ObjectId = u64;

/// POSIX file type bits (`S_IFMT` family).
pub const S_IFMT: u32 = 0o170000;
pub const S_IFREG: u32 = 0o100000;
pub const S_IFDIR: u32 = 0o040000;
pub const S_IFLNK: u32 = 0o120000;

/// Stat-equivalent attributes of one archived object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectStat {
    pub oid: ObjectId,
    pub st_dev: u64,
    pub st_mode: u32,
    pub st_nlink: u64,
    pub st_uid: u32,
    pub st_gid: u32,
    pub st_rdev: u64,
    pub st_size: u64,
    pub st_blksize: u64,
    pub st_blocks: u64,
    pub st_atime: i64,
    pub st_mtime: i64,
    pub st_ctime: i64,
}

impl ObjectStat {
    pub fn is_regular_file(&self) -> bool {
        self.st_mode & S_IFMT == S_IFREG
    }
}

/// Stored object row: attributes plus the soft-delete flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedObject {
    pub stat: ObjectStat,
    pub valid: bool,
}

/// One extended attribute of an object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

/// Complete tag set of one object as carried by a single scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectTags {
    pub oid: ObjectId,
    pub tags: Vec<Tag>,
}
