//! File attributes and open flags.

use binrw::binrw;
use bitflags::bitflags;

use crate::msg::{bytes, to_bytes, to_utf8, utf8};

const ATTR_SIZE: u32 = 0x0000_0001;
const ATTR_UIDGID: u32 = 0x0000_0002;
const ATTR_PERMISSIONS: u32 = 0x0000_0004;
const ATTR_ACMODTIME: u32 = 0x0000_0008;
const ATTR_EXTENDED: u32 = 0x8000_0000;

const S_IFMT: u32 = 0o170000;
const S_IFREG: u32 = 0o100000;
const S_IFDIR: u32 = 0o040000;
const S_IFLNK: u32 = 0o120000;

/// Flags to open a file with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFlags(u32);

bitflags! {
    impl OpenFlags: u32 {
        /// Open the file for reading.
        const READ = 0x0000_0001;

        /// Open the file for writing.
        const WRITE = 0x0000_0002;

        /// Force all writes to append data at the end of the file.
        const APPEND = 0x0000_0004;

        /// Create the file if it does not exist.
        const CREAT = 0x0000_0008;

        /// Truncate an existing file, with [`Self::CREAT`].
        const TRUNC = 0x0000_0010;

        /// Fail if the file already exists, with [`Self::CREAT`].
        const EXCL = 0x0000_0020;
    }
}

/// The type of a file, from its permissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    /// A regular file.
    Regular,

    /// A directory.
    Directory,

    /// A symbolic link.
    Symlink,

    /// Anything else, sockets, devices and pipes.
    Other,
}

/// A vendor-specific extended attribute.
#[binrw]
#[derive(Debug, Clone, PartialEq, Eq)]
#[brw(big)]
pub struct ExtendedAttribute {
    /// The attribute name, as `name@domain`.
    #[br(map = utf8)]
    #[bw(map = to_utf8)]
    pub name: String,

    /// The attribute value.
    #[br(map = bytes)]
    #[bw(map = to_bytes)]
    pub data: Vec<u8>,
}

/// The attributes of a file, each of them being optional on the wire.
#[binrw]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[brw(big)]
pub struct FileAttributes {
    #[bw(calc = present_flags(size, uid_gid, permissions, ac_mod_time, extended))]
    flags: u32,

    /// Size in bytes.
    #[br(if(flags & ATTR_SIZE != 0))]
    pub size: Option<u64>,

    /// Owner user and group ids.
    #[br(if(flags & ATTR_UIDGID != 0))]
    pub uid_gid: Option<(u32, u32)>,

    /// Permissions and type bits, as in `st_mode`.
    #[br(if(flags & ATTR_PERMISSIONS != 0))]
    pub permissions: Option<u32>,

    /// Access and modification times, in seconds since the epoch.
    #[br(if(flags & ATTR_ACMODTIME != 0))]
    pub ac_mod_time: Option<(u32, u32)>,

    #[br(if(flags & ATTR_EXTENDED != 0))]
    #[bw(calc = (!extended.is_empty()).then_some(extended.len() as u32))]
    extended_count: Option<u32>,

    /// Vendor-specific extended attributes.
    #[br(count = extended_count.unwrap_or_default())]
    pub extended: Vec<ExtendedAttribute>,
}

fn present_flags(
    size: &Option<u64>,
    uid_gid: &Option<(u32, u32)>,
    permissions: &Option<u32>,
    ac_mod_time: &Option<(u32, u32)>,
    extended: &[ExtendedAttribute],
) -> u32 {
    let flag = |present: bool, flag: u32| if present { flag } else { 0 };

    flag(size.is_some(), ATTR_SIZE)
        | flag(uid_gid.is_some(), ATTR_UIDGID)
        | flag(permissions.is_some(), ATTR_PERMISSIONS)
        | flag(ac_mod_time.is_some(), ATTR_ACMODTIME)
        | flag(!extended.is_empty(), ATTR_EXTENDED)
}

impl FileAttributes {
    /// The type of the file, if the permissions are known.
    pub fn file_type(&self) -> Option<FileType> {
        self.permissions.map(|mode| match mode & S_IFMT {
            S_IFREG => FileType::Regular,
            S_IFDIR => FileType::Directory,
            S_IFLNK => FileType::Symlink,
            _ => FileType::Other,
        })
    }

    /// Whether the file is known to be a directory.
    pub fn is_dir(&self) -> bool {
        self.file_type() == Some(FileType::Directory)
    }

    /// The access time.
    pub fn atime(&self) -> Option<u32> {
        self.ac_mod_time.map(|(atime, _)| atime)
    }

    /// The modification time.
    pub fn mtime(&self) -> Option<u32> {
        self.ac_mod_time.map(|(_, mtime)| mtime)
    }
}
