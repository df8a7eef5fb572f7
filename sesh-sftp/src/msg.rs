//! Messages of the SSH File Transfer Protocol, version 3.
//!
//! Every message is framed as `uint32 length | byte type | body`, see [`crate::frame`].
//! Requests and replies carry a `uint32` request id right after the type.

use binrw::{
    binrw,
    helpers::until_eof,
    io::{Cursor, Read, Seek, Write},
    BinRead, BinResult, BinWrite, Endian,
};
use sesh::msg::arch;
use strum::{AsRefStr, EnumString, FromRepr, IntoStaticStr};

use crate::{
    attrs::{FileAttributes, OpenFlags},
    Error, Result,
};

/// The protocol version implemented by this crate.
pub const VERSION: u32 = 3;

pub(crate) const INIT: u8 = 1;
pub(crate) const VERSION_MSG: u8 = 2;
const OPEN: u8 = 3;
const CLOSE: u8 = 4;
const READ: u8 = 5;
const WRITE: u8 = 6;
const LSTAT: u8 = 7;
const FSTAT: u8 = 8;
const SETSTAT: u8 = 9;
const FSETSTAT: u8 = 10;
const OPENDIR: u8 = 11;
const READDIR: u8 = 12;
const REMOVE: u8 = 13;
const MKDIR: u8 = 14;
const RMDIR: u8 = 15;
const REALPATH: u8 = 16;
const STAT: u8 = 17;
const RENAME: u8 = 18;
const READLINK: u8 = 19;
const SYMLINK: u8 = 20;
const STATUS: u8 = 101;
const HANDLE: u8 = 102;
const DATA: u8 = 103;
const NAME: u8 = 104;
const ATTRS: u8 = 105;
const EXTENDED: u8 = 200;
const EXTENDED_REPLY: u8 = 201;

pub(crate) fn utf8(value: arch::StringUtf8) -> String {
    value.to_string()
}

#[allow(clippy::ptr_arg)]
pub(crate) fn to_utf8(value: &String) -> arch::StringUtf8 {
    arch::StringUtf8::new(value.as_str())
}

pub(crate) fn bytes(value: arch::Bytes) -> Vec<u8> {
    value.into_vec()
}

#[allow(clippy::ptr_arg)]
pub(crate) fn to_bytes(value: &Vec<u8>) -> arch::Bytes {
    arch::Bytes::new(value.as_slice())
}

/// Serialize a big-endian `value` to a buffer.
pub(crate) fn to_vec<T>(value: &T) -> Result<Vec<u8>>
where
    T: for<'a> BinWrite<Args<'a> = ()>,
{
    let mut cursor = Cursor::new(Vec::new());
    value.write_be(&mut cursor)?;

    Ok(cursor.into_inner())
}

/// Deserialize a big-endian value from `data`, ignoring trailing bytes.
pub(crate) fn from_slice<T>(data: &[u8]) -> Result<T>
where
    T: for<'a> BinRead<Args<'a> = ()>,
{
    Ok(T::read_be(&mut Cursor::new(data))?)
}

/// The status codes of the `SSH_FXP_STATUS` reply.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr)]
#[repr(u32)]
pub enum StatusCode {
    /// Successful completion of the operation.
    Ok = 0,

    /// End of file, or no more directory entries.
    Eof = 1,

    /// A reference was made to a file which does not exist.
    NoSuchFile = 2,

    /// The user does not have sufficient permissions.
    PermissionDenied = 3,

    /// A generic failure.
    Failure = 4,

    /// A badly formatted packet or protocol incompatibility.
    BadMessage = 5,

    /// There is no connection to the server.
    NoConnection = 6,

    /// The connection to the server was lost.
    ConnectionLost = 7,

    /// The operation is not supported by the server.
    OpUnsupported = 8,
}

fn status_code(code: u32) -> StatusCode {
    StatusCode::from_repr(code).unwrap_or_else(|| {
        tracing::debug!("Unknown status code `{code}`, treated as a failure");

        StatusCode::Failure
    })
}

/// Some servers omit the message and language tag of a status.
#[binrw::parser(reader, endian)]
fn status_message() -> BinResult<String> {
    match arch::StringUtf8::read_options(reader, endian, ()) {
        Ok(message) => Ok(utf8(message)),
        Err(err) if err.is_eof() => Ok(String::new()),
        Err(err) => Err(err),
    }
}

/// An opaque token referencing an open file or directory on the server.
#[binrw]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[brw(big)]
pub struct Handle(
    #[br(map = bytes)]
    #[bw(map = to_bytes)]
    pub Vec<u8>,
);

/// An entry of a `SSH_FXP_NAME` reply.
#[binrw]
#[derive(Debug, Clone, PartialEq, Eq)]
#[brw(big)]
pub struct Entry {
    /// The file name.
    #[br(map = utf8)]
    #[bw(map = to_utf8)]
    pub filename: String,

    /// An `ls -l`-style description of the file.
    #[br(map = utf8)]
    #[bw(map = to_utf8)]
    pub longname: String,

    /// The attributes of the file.
    pub attrs: FileAttributes,
}

#[binrw::parser(reader, endian)]
fn entries() -> BinResult<Vec<Entry>> {
    let count = u32::read_options(reader, endian, ())?;

    (0..count)
        .map(|_| Entry::read_options(reader, endian, ()))
        .collect()
}

#[binrw::writer(writer, endian)]
fn write_entries(entries: &Vec<Entry>) -> BinResult<()> {
    (entries.len() as u32).write_options(writer, endian, ())?;
    entries.write_options(writer, endian, ())
}

#[binrw::parser(reader, endian)]
fn pairs() -> BinResult<Vec<(String, Vec<u8>)>> {
    let pairs: Vec<(arch::StringUtf8, arch::Bytes)> = until_eof(reader, endian, ())?;

    Ok(pairs
        .into_iter()
        .map(|(name, data)| (utf8(name), bytes(data)))
        .collect())
}

#[binrw::writer(writer, endian)]
fn write_pairs(pairs: &Vec<(String, Vec<u8>)>) -> BinResult<()> {
    for (name, data) in pairs {
        (to_utf8(name), to_bytes(data)).write_options(writer, endian, ())?;
    }

    Ok(())
}

/// The `SSH_FXP_INIT` and `SSH_FXP_VERSION` messages, opening the subsystem.
#[binrw]
#[derive(Debug, Clone, PartialEq, Eq)]
#[brw(big)]
pub struct Hello {
    /// The protocol version.
    pub version: u32,

    /// The advertised extensions, with their own version data.
    #[br(parse_with = pairs)]
    #[bw(write_with = write_pairs)]
    pub extensions: Vec<(String, Vec<u8>)>,
}

impl Hello {
    /// The data of the extension `name`, if advertised.
    pub fn extension(&self, name: &str) -> Option<&[u8]> {
        self.extensions
            .iter()
            .find(|(extension, _)| extension == name)
            .map(|(_, data)| data.as_slice())
    }

    pub(crate) fn encode(&self, kind: u8) -> Result<Vec<u8>> {
        to_vec(&(kind, self))
    }

    pub(crate) fn decode(payload: &[u8], kind: u8) -> Result<Self> {
        let mut cursor = Cursor::new(payload);

        let magic = u8::read_be(&mut cursor)?;
        if magic != kind {
            return Err(Error::UnexpectedMessage(magic));
        }

        Ok(Self::read_be(&mut cursor)?)
    }
}

/// The OpenSSH extensions known to this crate.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, AsRefStr, IntoStaticStr)]
pub enum Extension {
    /// Rename with POSIX semantics, overwriting the target.
    #[strum(serialize = "posix-rename@openssh.com")]
    PosixRename,

    /// File system statistics from a path.
    #[strum(serialize = "statvfs@openssh.com")]
    Statvfs,

    /// File system statistics from a handle.
    #[strum(serialize = "fstatvfs@openssh.com")]
    Fstatvfs,

    /// Hard link creation.
    #[strum(serialize = "hardlink@openssh.com")]
    Hardlink,

    /// Flush a file to the disk.
    #[strum(serialize = "fsync@openssh.com")]
    Fsync,

    /// Set attributes without following symbolic links.
    #[strum(serialize = "lsetstat@openssh.com")]
    Lsetstat,

    /// Canonicalize a path, expanding `~`.
    #[strum(serialize = "expand-path@openssh.com")]
    ExpandPath,

    /// Report the server limits.
    #[strum(serialize = "limits@openssh.com")]
    Limits,
}

impl Extension {
    /// Every known extension.
    pub const ALL: [Self; 8] = [
        Self::PosixRename,
        Self::Statvfs,
        Self::Fstatvfs,
        Self::Hardlink,
        Self::Fsync,
        Self::Lsetstat,
        Self::ExpandPath,
        Self::Limits,
    ];

    /// The version data advertised along the extension name.
    pub fn data(&self) -> &'static [u8] {
        match self {
            Self::Statvfs | Self::Fstatvfs => b"2",
            _ => b"1",
        }
    }

    /// The name of the extension on the wire.
    pub fn name(&self) -> &'static str {
        self.into()
    }
}

/// The server limits, reply to the `limits@openssh.com` extension.
#[binrw]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[brw(big)]
pub struct Limits {
    /// The maximum length of a packet.
    pub max_packet_length: u64,

    /// The maximum length of a read, `0` if unlimited.
    pub max_read_length: u64,

    /// The maximum length of a write, `0` if unlimited.
    pub max_write_length: u64,

    /// The maximum number of open handles, `0` if unlimited.
    pub max_open_handles: u64,
}

/// File system statistics, reply to the `statvfs@openssh.com` extensions.
#[allow(missing_docs)]
#[binrw]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[brw(big)]
pub struct Statvfs {
    pub bsize: u64,
    pub frsize: u64,
    pub blocks: u64,
    pub bfree: u64,
    pub bavail: u64,
    pub files: u64,
    pub ffree: u64,
    pub favail: u64,
    pub fsid: u64,
    pub flag: u64,
    pub namemax: u64,
}

/// A `SSH_FXP_EXTENDED` request.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extended {
    PosixRename { oldpath: String, newpath: String },
    Statvfs { path: String },
    Fstatvfs { handle: Handle },
    Hardlink { oldpath: String, newpath: String },
    Fsync { handle: Handle },
    Lsetstat { path: String, attrs: FileAttributes },
    ExpandPath { path: String },
    Limits,

    /// Any other extension, with its raw data.
    Other { name: String, data: Vec<u8> },
}

impl Extended {
    /// The known extension this request belongs to.
    pub fn extension(&self) -> Option<Extension> {
        Some(match self {
            Self::PosixRename { .. } => Extension::PosixRename,
            Self::Statvfs { .. } => Extension::Statvfs,
            Self::Fstatvfs { .. } => Extension::Fstatvfs,
            Self::Hardlink { .. } => Extension::Hardlink,
            Self::Fsync { .. } => Extension::Fsync,
            Self::Lsetstat { .. } => Extension::Lsetstat,
            Self::ExpandPath { .. } => Extension::ExpandPath,
            Self::Limits => Extension::Limits,
            Self::Other { .. } => return None,
        })
    }

    /// The name of the extended request on the wire.
    pub fn name(&self) -> &str {
        match self {
            Self::Other { name, .. } => name,
            known => known.extension().map(|ext| ext.name()).unwrap_or_default(),
        }
    }
}

fn string<R: Read + Seek>(reader: &mut R, endian: Endian) -> BinResult<String> {
    arch::StringUtf8::read_options(reader, endian, ()).map(utf8)
}

// The request body depends on the extension name, unknown ones being kept raw.
impl BinRead for Extended {
    type Args<'a> = ();

    fn read_options<R: Read + Seek>(reader: &mut R, endian: Endian, _: ()) -> BinResult<Self> {
        let name = string(reader, endian)?;

        Ok(match name.parse::<Extension>() {
            Ok(Extension::PosixRename) => Self::PosixRename {
                oldpath: string(reader, endian)?,
                newpath: string(reader, endian)?,
            },
            Ok(Extension::Statvfs) => Self::Statvfs {
                path: string(reader, endian)?,
            },
            Ok(Extension::Fstatvfs) => Self::Fstatvfs {
                handle: Handle::read_options(reader, endian, ())?,
            },
            Ok(Extension::Hardlink) => Self::Hardlink {
                oldpath: string(reader, endian)?,
                newpath: string(reader, endian)?,
            },
            Ok(Extension::Fsync) => Self::Fsync {
                handle: Handle::read_options(reader, endian, ())?,
            },
            Ok(Extension::Lsetstat) => Self::Lsetstat {
                path: string(reader, endian)?,
                attrs: FileAttributes::read_options(reader, endian, ())?,
            },
            Ok(Extension::ExpandPath) => Self::ExpandPath {
                path: string(reader, endian)?,
            },
            Ok(Extension::Limits) => Self::Limits,
            Err(_) => Self::Other {
                name,
                data: until_eof::<_, u8, _, _>(reader, endian, ())?,
            },
        })
    }
}

impl BinWrite for Extended {
    type Args<'a> = ();

    fn write_options<W: Write + Seek>(
        &self,
        writer: &mut W,
        endian: Endian,
        _: (),
    ) -> BinResult<()> {
        arch::StringUtf8::new(self.name()).write_options(writer, endian, ())?;

        match self {
            Self::PosixRename { oldpath, newpath } | Self::Hardlink { oldpath, newpath } => {
                (to_utf8(oldpath), to_utf8(newpath)).write_options(writer, endian, ())
            }
            Self::Statvfs { path } | Self::ExpandPath { path } => {
                to_utf8(path).write_options(writer, endian, ())
            }
            Self::Fstatvfs { handle } | Self::Fsync { handle } => {
                handle.write_options(writer, endian, ())
            }
            Self::Lsetstat { path, attrs } => {
                to_utf8(path).write_options(writer, endian, ())?;
                attrs.write_options(writer, endian, ())
            }
            Self::Limits => Ok(()),
            Self::Other { data, .. } => data.write_options(writer, endian, ()),
        }
    }
}

/// A request from the client.
#[allow(missing_docs)]
#[binrw]
#[derive(Debug, Clone, PartialEq, Eq)]
#[brw(big)]
#[br(import(kind: u8))]
pub enum Request {
    #[br(pre_assert(kind == OPEN))]
    Open {
        #[br(map = utf8)]
        #[bw(map = to_utf8)]
        filename: String,
        #[br(map = OpenFlags::from_bits_retain)]
        #[bw(map = OpenFlags::bits)]
        flags: OpenFlags,
        attrs: FileAttributes,
    },
    #[br(pre_assert(kind == CLOSE))]
    Close { handle: Handle },
    #[br(pre_assert(kind == READ))]
    Read {
        handle: Handle,
        offset: u64,
        len: u32,
    },
    #[br(pre_assert(kind == WRITE))]
    Write {
        handle: Handle,
        offset: u64,
        #[br(map = bytes)]
        #[bw(map = to_bytes)]
        data: Vec<u8>,
    },
    #[br(pre_assert(kind == LSTAT))]
    Lstat {
        #[br(map = utf8)]
        #[bw(map = to_utf8)]
        path: String,
    },
    #[br(pre_assert(kind == FSTAT))]
    Fstat { handle: Handle },
    #[br(pre_assert(kind == SETSTAT))]
    Setstat {
        #[br(map = utf8)]
        #[bw(map = to_utf8)]
        path: String,
        attrs: FileAttributes,
    },
    #[br(pre_assert(kind == FSETSTAT))]
    Fsetstat {
        handle: Handle,
        attrs: FileAttributes,
    },
    #[br(pre_assert(kind == OPENDIR))]
    Opendir {
        #[br(map = utf8)]
        #[bw(map = to_utf8)]
        path: String,
    },
    #[br(pre_assert(kind == READDIR))]
    Readdir { handle: Handle },
    #[br(pre_assert(kind == REMOVE))]
    Remove {
        #[br(map = utf8)]
        #[bw(map = to_utf8)]
        filename: String,
    },
    #[br(pre_assert(kind == MKDIR))]
    Mkdir {
        #[br(map = utf8)]
        #[bw(map = to_utf8)]
        path: String,
        attrs: FileAttributes,
    },
    #[br(pre_assert(kind == RMDIR))]
    Rmdir {
        #[br(map = utf8)]
        #[bw(map = to_utf8)]
        path: String,
    },
    #[br(pre_assert(kind == REALPATH))]
    Realpath {
        #[br(map = utf8)]
        #[bw(map = to_utf8)]
        path: String,
    },
    #[br(pre_assert(kind == STAT))]
    Stat {
        #[br(map = utf8)]
        #[bw(map = to_utf8)]
        path: String,
    },
    #[br(pre_assert(kind == RENAME))]
    Rename {
        #[br(map = utf8)]
        #[bw(map = to_utf8)]
        oldpath: String,
        #[br(map = utf8)]
        #[bw(map = to_utf8)]
        newpath: String,
    },
    #[br(pre_assert(kind == READLINK))]
    Readlink {
        #[br(map = utf8)]
        #[bw(map = to_utf8)]
        path: String,
    },
    /// Arguments are sent target first, in the order OpenSSH expects.
    #[br(pre_assert(kind == SYMLINK))]
    Symlink {
        #[br(map = utf8)]
        #[bw(map = to_utf8)]
        targetpath: String,
        #[br(map = utf8)]
        #[bw(map = to_utf8)]
        linkpath: String,
    },
    #[br(pre_assert(kind == EXTENDED))]
    Extended(Extended),
}

impl Request {
    fn kind(&self) -> u8 {
        match self {
            Self::Open { .. } => OPEN,
            Self::Close { .. } => CLOSE,
            Self::Read { .. } => READ,
            Self::Write { .. } => WRITE,
            Self::Lstat { .. } => LSTAT,
            Self::Fstat { .. } => FSTAT,
            Self::Setstat { .. } => SETSTAT,
            Self::Fsetstat { .. } => FSETSTAT,
            Self::Opendir { .. } => OPENDIR,
            Self::Readdir { .. } => READDIR,
            Self::Remove { .. } => REMOVE,
            Self::Mkdir { .. } => MKDIR,
            Self::Rmdir { .. } => RMDIR,
            Self::Realpath { .. } => REALPATH,
            Self::Stat { .. } => STAT,
            Self::Rename { .. } => RENAME,
            Self::Readlink { .. } => READLINK,
            Self::Symlink { .. } => SYMLINK,
            Self::Extended(_) => EXTENDED,
        }
    }

    /// Encode the request with its `id`, as a frame payload.
    pub fn encode(&self, id: u32) -> Result<Vec<u8>> {
        to_vec(&(self.kind(), id, self))
    }

    /// Decode a frame payload into a request and its id.
    ///
    /// Unknown request types fail with [`Error::UnexpectedMessage`].
    pub fn decode(payload: &[u8]) -> Result<(u32, Self)> {
        let mut cursor = Cursor::new(payload);
        let (kind, id) = <(u8, u32)>::read_be(&mut cursor)?;

        if !matches!(kind, OPEN..=SYMLINK | EXTENDED) {
            return Err(Error::UnexpectedMessage(kind));
        }

        Ok((id, Self::read_be_args(&mut cursor, (kind,))?))
    }
}

/// A reply from the server.
#[binrw]
#[derive(Debug, Clone, PartialEq, Eq)]
#[brw(big)]
#[br(import(kind: u8))]
pub enum Reply {
    /// The status of the operation.
    #[br(pre_assert(kind == STATUS))]
    Status {
        /// The status code.
        #[br(map = status_code)]
        #[bw(map = |code: &StatusCode| *code as u32)]
        code: StatusCode,

        /// A human-readable description.
        #[br(parse_with = status_message)]
        #[bw(map = |message: &String| (to_utf8(message), arch::StringAscii::default()))]
        message: String,
    },

    /// A handle to an opened file or directory.
    #[br(pre_assert(kind == HANDLE))]
    Handle(Handle),

    /// Data read from a file.
    #[br(pre_assert(kind == DATA))]
    Data(
        #[br(map = bytes)]
        #[bw(map = to_bytes)]
        Vec<u8>,
    ),

    /// A list of names with their attributes.
    #[br(pre_assert(kind == NAME))]
    Name(
        #[br(parse_with = entries)]
        #[bw(write_with = write_entries)]
        Vec<Entry>,
    ),

    /// The attributes of a file.
    #[br(pre_assert(kind == ATTRS))]
    Attrs(FileAttributes),

    /// The extension-specific reply to an extended request.
    #[br(pre_assert(kind == EXTENDED_REPLY))]
    Extended(#[br(parse_with = until_eof)] Vec<u8>),
}

impl Reply {
    /// A successful [`Reply::Status`].
    pub fn ok() -> Self {
        Self::Status {
            code: StatusCode::Ok,
            message: "Success".into(),
        }
    }

    /// A [`Reply::Status`] with the `code` and `message`.
    pub fn status(code: StatusCode, message: impl Into<String>) -> Self {
        Self::Status {
            code,
            message: message.into(),
        }
    }

    fn kind(&self) -> u8 {
        match self {
            Self::Status { .. } => STATUS,
            Self::Handle(_) => HANDLE,
            Self::Data(_) => DATA,
            Self::Name(_) => NAME,
            Self::Attrs(_) => ATTRS,
            Self::Extended(_) => EXTENDED_REPLY,
        }
    }

    /// Encode the reply to the request `id`, as a frame payload.
    pub fn encode(&self, id: u32) -> Result<Vec<u8>> {
        to_vec(&(self.kind(), id, self))
    }

    /// Decode a frame payload into a reply and the id of its request.
    pub fn decode(payload: &[u8]) -> Result<(u32, Self)> {
        let mut cursor = Cursor::new(payload);
        let (kind, id) = <(u8, u32)>::read_be(&mut cursor)?;

        if !matches!(kind, STATUS..=ATTRS | EXTENDED_REPLY) {
            return Err(Error::UnexpectedMessage(kind));
        }

        Ok((id, Self::read_be_args(&mut cursor, (kind,))?))
    }

    /// Turn a failure status into an [`Error::Status`], other replies being left as is.
    pub(crate) fn check(self) -> Result<Self> {
        match self {
            Self::Status { code, message } if code != StatusCode::Ok => {
                Err(Error::Status { code, message })
            }
            reply => Ok(reply),
        }
    }
}
