//! The requester side of the protocol.
//!
//! The [`Client`] performs no I/O by itself: the bytes from the server are
//! handed to [`Client::feed`] and the bytes to send are taken with
//! [`Client::take_output`], see [`crate::channel`] to bind it to a channel.

use std::collections::{HashMap, VecDeque};

use crate::{
    attrs::{FileAttributes, OpenFlags},
    frame::{self, Deframer, MAX_FRAME_LENGTH},
    msg::{
        from_slice, Entry, Extended, Extension, Handle, Hello, Limits, Reply, Request, StatusCode,
        Statvfs, INIT, VERSION, VERSION_MSG,
    },
    response::{failed, Pending, Response},
    Error, Result,
};

/// The maximum length of reads and writes, until the server reports its limits.
pub const DEFAULT_MAX_LENGTH: u32 = 32 * 1024;

/// The upper bound of reads and writes, whatever the server limits.
const MAX_DATA_LENGTH: u64 = 256 * 1024;

/// The room left for the message headers within the server packet length.
const HEADER_ROOM: u64 = 1024;

/// The number of concurrent writes issued by [`Client::write_all`].
const MAX_INFLIGHT: usize = 16;

/// The settings of a [`Client`].
#[derive(Debug, Clone)]
pub struct Config {
    /// The extensions advertised to the server in the `SSH_FXP_INIT`.
    pub extensions: Vec<(String, Vec<u8>)>,

    /// The maximum length of the frames accepted from the server.
    pub max_frame: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            extensions: Vec::new(),
            max_frame: MAX_FRAME_LENGTH,
        }
    }
}

type Callback = Box<dyn FnOnce(Result<Reply>) + Send>;

enum Waiter {
    Reply(Callback),
    Limits,
    Upload(u32),
    Download(u32),
}

impl std::fmt::Debug for Waiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Reply(_) => f.write_str("Reply"),
            Self::Limits => f.write_str("Limits"),
            Self::Upload(id) => f.debug_tuple("Upload").field(id).finish(),
            Self::Download(id) => f.debug_tuple("Download").field(id).finish(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Negotiating,
    Limiting,
    Ready,
    Closed,
}

#[derive(Debug)]
struct Upload {
    handle: Handle,
    offset: u64,
    data: Vec<u8>,
    chunk: usize,
    issued: usize,
    inflight: usize,
    failure: Option<Error>,
    pending: Pending<()>,
}

#[derive(Debug)]
struct Download {
    handle: Handle,
    offset: u64,
    data: Vec<u8>,
    pending: Pending<Vec<u8>>,
}

/// A file transfer client, issuing requests and correlating the replies by id.
#[derive(Debug)]
pub struct Client {
    state: State,
    deframer: Deframer,
    output: Vec<u8>,

    queue: VecDeque<(u32, Request)>,
    pending: HashMap<u32, Waiter>,
    next_id: u32,

    server: Option<Hello>,
    limits: Option<Limits>,
    max_read: u32,
    max_write: u32,

    uploads: HashMap<u32, Upload>,
    downloads: HashMap<u32, Download>,
    next_transfer: u32,

    /// Closes held back until the transfers on their handle complete.
    held: Vec<(Handle, Waiter)>,
}

impl Client {
    /// Create a client, the `SSH_FXP_INIT` being queued right away.
    pub fn new(config: Config) -> Result<Self> {
        let init = Hello {
            version: VERSION,
            extensions: config.extensions,
        };

        Ok(Self {
            state: State::Negotiating,
            deframer: Deframer::new(config.max_frame),
            output: frame::frame(&init.encode(INIT)?),
            queue: Default::default(),
            pending: Default::default(),
            next_id: 0,
            server: None,
            limits: None,
            max_read: DEFAULT_MAX_LENGTH,
            max_write: DEFAULT_MAX_LENGTH,
            uploads: Default::default(),
            downloads: Default::default(),
            next_transfer: 0,
            held: Vec::new(),
        })
    }

    /// Whether the negotiation completed, requests being sent right away.
    pub fn is_ready(&self) -> bool {
        self.state == State::Ready
    }

    /// Whether the client has been torn down.
    pub fn is_closed(&self) -> bool {
        self.state == State::Closed
    }

    /// The negotiated protocol version.
    pub fn version(&self) -> Option<u32> {
        self.server
            .as_ref()
            .map(|hello| hello.version.min(VERSION))
    }

    /// Whether the server advertised the `extension`.
    pub fn supports(&self, extension: Extension) -> bool {
        self.server
            .as_ref()
            .is_some_and(|hello| hello.extension(extension.name()).is_some())
    }

    /// The limits reported by the server.
    pub fn limits(&self) -> Option<&Limits> {
        self.limits.as_ref()
    }

    /// The maximum length of a single read.
    pub fn max_read(&self) -> u32 {
        self.max_read
    }

    /// The maximum length of a single write.
    pub fn max_write(&self) -> u32 {
        self.max_write
    }

    /// The number of requests awaiting a reply.
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// Take the bytes to be sent to the server.
    pub fn take_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.output)
    }

    /// Whether bytes are waiting to be sent to the server.
    pub fn has_output(&self) -> bool {
        !self.output.is_empty()
    }

    /// Process bytes received from the server.
    ///
    /// Any error is fatal, the client is then torn down.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<()> {
        if self.state == State::Closed {
            return Err(Error::NoResponse);
        }

        self.deframer.feed(bytes);

        let result = self.drain();
        if let Err(err) = &result {
            tracing::error!("Fatal error in the file transfer client: {err}");

            self.shutdown();
        }

        result
    }

    /// Tear the client down, failing every pending request with [`Error::NoResponse`].
    pub fn shutdown(&mut self) {
        if self.state != State::Closed {
            tracing::debug!(
                "File transfer client torn down with {} requests pending",
                self.pending.len() + self.queue.len()
            );

            self.state = State::Closed;
            self.queue.clear();
            self.pending.clear();
            self.uploads.clear();
            self.downloads.clear();
            self.held.clear();
        }
    }

    fn drain(&mut self) -> Result<()> {
        while let Some(payload) = self.deframer.next()? {
            self.process(&payload)?;
        }

        Ok(())
    }

    fn process(&mut self, payload: &[u8]) -> Result<()> {
        match self.state {
            State::Negotiating => {
                let hello = Hello::decode(payload, VERSION_MSG)?;
                if hello.version < VERSION {
                    return Err(Error::Version(hello.version));
                }

                tracing::debug!(
                    "Negotiated version {} with extensions {:?}",
                    hello.version.min(VERSION),
                    hello
                        .extensions
                        .iter()
                        .map(|(name, _)| name)
                        .collect::<Vec<_>>()
                );

                self.server = Some(hello);

                if self.supports(Extension::Limits) {
                    self.state = State::Limiting;

                    let id = self.id();
                    self.pending.insert(id, Waiter::Limits);
                    self.send(id, Request::Extended(Extended::Limits));
                } else {
                    self.ready();
                }
            }
            State::Limiting | State::Ready => {
                let (id, reply) = Reply::decode(payload)?;

                match self.pending.remove(&id) {
                    Some(waiter) => self.dispatch(waiter, Ok(reply)),
                    None => tracing::warn!("Ignoring a reply to the unknown request id {id}"),
                }
            }
            State::Closed => (),
        }

        Ok(())
    }

    fn dispatch(&mut self, waiter: Waiter, reply: Result<Reply>) {
        match waiter {
            Waiter::Reply(callback) => callback(reply),
            Waiter::Limits => {
                match reply
                    .and_then(Reply::check)
                    .and_then(extended)
                    .and_then(|data| from_slice::<Limits>(&data))
                {
                    Ok(limits) => {
                        self.max_read = clamp(limits.max_read_length, &limits);
                        self.max_write = clamp(limits.max_write_length, &limits);
                        self.limits = Some(limits);
                    }
                    Err(err) => tracing::warn!("Unable to query the server limits: {err}"),
                }

                self.ready();
            }
            Waiter::Upload(transfer) => {
                if let Some(upload) = self.uploads.get_mut(&transfer) {
                    upload.inflight -= 1;

                    if let Err(err) = reply.and_then(unit) {
                        upload.failure.get_or_insert(err);
                    }
                }

                self.upload(transfer);
                self.release();
            }
            Waiter::Download(transfer) => {
                match reply.and_then(data) {
                    Ok(Some(chunk)) if chunk.is_empty() => {
                        tracing::warn!("The server answered a read with no data");

                        if let Some(download) = self.downloads.remove(&transfer) {
                            download.pending.resolve(Err(Error::EmptyRead));
                        }
                    }
                    Ok(Some(chunk)) => {
                        if let Some(download) = self.downloads.get_mut(&transfer) {
                            download.data.extend(chunk);
                        }

                        self.download(transfer);
                    }
                    Ok(None) => {
                        if let Some(download) = self.downloads.remove(&transfer) {
                            download.pending.resolve(Ok(download.data));
                        }
                    }
                    Err(err) => {
                        if let Some(download) = self.downloads.remove(&transfer) {
                            download.pending.resolve(Err(err));
                        }
                    }
                }

                self.release();
            }
        }
    }

    fn ready(&mut self) {
        self.state = State::Ready;

        tracing::debug!(
            "File transfer client ready, flushing {} queued requests",
            self.queue.len()
        );

        while let Some((id, request)) = self.queue.pop_front() {
            self.send(id, request);
        }
    }

    fn id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);

        id
    }

    fn write(&mut self, id: u32, request: &Request) -> Result<()> {
        tracing::trace!("-> #{id} {request:?}");

        self.output.extend(frame::frame(&request.encode(id)?));

        Ok(())
    }

    /// Send the request unless it needs an extension the server lacks.
    fn send(&mut self, id: u32, request: Request) {
        let sent = match &request {
            Request::Extended(extended) => match extended.extension() {
                Some(extension) if !self.supports(extension) => {
                    Err(Error::Unsupported(extension.name()))
                }
                _ => self.write(id, &request),
            },
            _ => self.write(id, &request),
        };

        if let Err(err) = sent {
            if let Some(waiter) = self.pending.remove(&id) {
                self.dispatch(waiter, Err(err));
            }
        }
    }

    fn issue(&mut self, request: Request, waiter: Waiter) {
        if self.state == State::Closed {
            return;
        }

        let id = self.id();
        self.pending.insert(id, waiter);

        if self.state == State::Ready {
            self.send(id, request);
        } else {
            self.queue.push_back((id, request));
        }
    }

    fn call<T: Send + 'static>(
        &mut self,
        request: Request,
        map: impl FnOnce(Reply) -> Result<T> + Send + 'static,
    ) -> Response<T> {
        if self.state == State::Closed {
            return failed(Error::NoResponse);
        }

        let (waiter, response) = waiter(map);
        self.issue(request, waiter);

        response
    }

    /// Whether an upload or a download is running on the `handle`.
    fn is_busy(&self, handle: &Handle) -> bool {
        self.uploads.values().any(|upload| upload.handle == *handle)
            || self
                .downloads
                .values()
                .any(|download| download.handle == *handle)
    }

    /// Send the held closes whose handle is no longer busy.
    fn release(&mut self) {
        for (handle, waiter) in std::mem::take(&mut self.held) {
            if self.is_busy(&handle) {
                self.held.push((handle, waiter));
            } else {
                tracing::debug!("Transfers on {handle:?} completed, sending its close");

                self.issue(Request::Close { handle }, waiter);
            }
        }
    }

    /// Open the file at `filename`.
    pub fn open(
        &mut self,
        filename: impl Into<String>,
        flags: OpenFlags,
        attrs: FileAttributes,
    ) -> Response<Handle> {
        let request = Request::Open {
            filename: filename.into(),
            flags,
            attrs,
        };

        self.call(request, handle)
    }

    /// Close the `handle` of a file or a directory.
    ///
    /// The close is held back while [`Self::write_all`] or [`Self::read_to_end`]
    /// still have requests to send on the handle.
    pub fn close(&mut self, handle: &Handle) -> Response<()> {
        if self.is_busy(handle) {
            let (waiter, response) = waiter(unit);
            self.held.push((handle.clone(), waiter));

            return response;
        }

        let request = Request::Close {
            handle: handle.clone(),
        };

        self.call(request, unit)
    }

    /// Read up to `len` bytes at `offset`, capped to [`Self::max_read`], `None` at the end of the file.
    pub fn read(&mut self, handle: &Handle, offset: u64, len: u32) -> Response<Option<Vec<u8>>> {
        let request = Request::Read {
            handle: handle.clone(),
            offset,
            len: len.min(self.max_read),
        };

        self.call(request, data)
    }

    /// Write `data` at `offset`, capped to [`Self::max_write`],
    /// resolving to the number of bytes written.
    pub fn write_at(&mut self, handle: &Handle, offset: u64, data: &[u8]) -> Response<usize> {
        let len = data.len().min(self.max_write as usize);
        let request = Request::Write {
            handle: handle.clone(),
            offset,
            data: data[..len].to_vec(),
        };

        self.call(request, move |reply| unit(reply).map(|()| len))
    }

    /// The attributes of the file at `path`, without following symbolic links.
    pub fn lstat(&mut self, path: impl Into<String>) -> Response<FileAttributes> {
        self.call(Request::Lstat { path: path.into() }, attrs)
    }

    /// The attributes of the file at `path`.
    pub fn stat(&mut self, path: impl Into<String>) -> Response<FileAttributes> {
        self.call(Request::Stat { path: path.into() }, attrs)
    }

    /// The attributes of the open file.
    pub fn fstat(&mut self, handle: &Handle) -> Response<FileAttributes> {
        let request = Request::Fstat {
            handle: handle.clone(),
        };

        self.call(request, attrs)
    }

    /// Change the attributes of the file at `path`.
    pub fn setstat(&mut self, path: impl Into<String>, attrs: FileAttributes) -> Response<()> {
        let request = Request::Setstat {
            path: path.into(),
            attrs,
        };

        self.call(request, unit)
    }

    /// Change the attributes of the open file.
    pub fn fsetstat(&mut self, handle: &Handle, attrs: FileAttributes) -> Response<()> {
        let request = Request::Fsetstat {
            handle: handle.clone(),
            attrs,
        };

        self.call(request, unit)
    }

    /// Open the directory at `path` for listing.
    pub fn opendir(&mut self, path: impl Into<String>) -> Response<Handle> {
        self.call(Request::Opendir { path: path.into() }, handle)
    }

    /// Read the next entries of the open directory, `None` once exhausted.
    pub fn readdir(&mut self, handle: &Handle) -> Response<Option<Vec<Entry>>> {
        let request = Request::Readdir {
            handle: handle.clone(),
        };

        self.call(request, |reply| match reply {
            Reply::Status {
                code: StatusCode::Eof,
                ..
            } => Ok(None),
            reply => names(reply).map(Some),
        })
    }

    /// Remove the file at `filename`.
    pub fn remove(&mut self, filename: impl Into<String>) -> Response<()> {
        let request = Request::Remove {
            filename: filename.into(),
        };

        self.call(request, unit)
    }

    /// Create a directory at `path`.
    pub fn mkdir(&mut self, path: impl Into<String>, attrs: FileAttributes) -> Response<()> {
        let request = Request::Mkdir {
            path: path.into(),
            attrs,
        };

        self.call(request, unit)
    }

    /// Remove the directory at `path`.
    pub fn rmdir(&mut self, path: impl Into<String>) -> Response<()> {
        self.call(Request::Rmdir { path: path.into() }, unit)
    }

    /// Canonicalize the `path` on the server.
    pub fn realpath(&mut self, path: impl Into<String>) -> Response<String> {
        self.call(Request::Realpath { path: path.into() }, name)
    }

    /// Rename the file at `oldpath` to `newpath`.
    pub fn rename(
        &mut self,
        oldpath: impl Into<String>,
        newpath: impl Into<String>,
    ) -> Response<()> {
        let request = Request::Rename {
            oldpath: oldpath.into(),
            newpath: newpath.into(),
        };

        self.call(request, unit)
    }

    /// The target of the symbolic link at `path`.
    pub fn readlink(&mut self, path: impl Into<String>) -> Response<String> {
        self.call(Request::Readlink { path: path.into() }, name)
    }

    /// Create a symbolic link at `linkpath` pointing to `targetpath`.
    pub fn symlink(
        &mut self,
        linkpath: impl Into<String>,
        targetpath: impl Into<String>,
    ) -> Response<()> {
        let request = Request::Symlink {
            linkpath: linkpath.into(),
            targetpath: targetpath.into(),
        };

        self.call(request, unit)
    }

    /// Rename `oldpath` to `newpath`, replacing any existing file, with `posix-rename@openssh.com`.
    pub fn posix_rename(
        &mut self,
        oldpath: impl Into<String>,
        newpath: impl Into<String>,
    ) -> Response<()> {
        let request = Request::Extended(Extended::PosixRename {
            oldpath: oldpath.into(),
            newpath: newpath.into(),
        });

        self.call(request, unit)
    }

    /// Create a hard link at `newpath` to `oldpath`, with `hardlink@openssh.com`.
    pub fn hardlink(
        &mut self,
        oldpath: impl Into<String>,
        newpath: impl Into<String>,
    ) -> Response<()> {
        let request = Request::Extended(Extended::Hardlink {
            oldpath: oldpath.into(),
            newpath: newpath.into(),
        });

        self.call(request, unit)
    }

    /// Flush the open file to the disk, with `fsync@openssh.com`.
    pub fn fsync(&mut self, handle: &Handle) -> Response<()> {
        let request = Request::Extended(Extended::Fsync {
            handle: handle.clone(),
        });

        self.call(request, unit)
    }

    /// Change the attributes at `path` without following symbolic links, with `lsetstat@openssh.com`.
    pub fn lsetstat(&mut self, path: impl Into<String>, attrs: FileAttributes) -> Response<()> {
        let request = Request::Extended(Extended::Lsetstat {
            path: path.into(),
            attrs,
        });

        self.call(request, unit)
    }

    /// The statistics of the file system holding `path`, with `statvfs@openssh.com`.
    pub fn statvfs(&mut self, path: impl Into<String>) -> Response<Statvfs> {
        let request = Request::Extended(Extended::Statvfs { path: path.into() });

        self.call(request, statvfs)
    }

    /// The statistics of the file system holding the open file, with `fstatvfs@openssh.com`.
    pub fn fstatvfs(&mut self, handle: &Handle) -> Response<Statvfs> {
        let request = Request::Extended(Extended::Fstatvfs {
            handle: handle.clone(),
        });

        self.call(request, statvfs)
    }

    /// Canonicalize the `path`, expanding `~`, with `expand-path@openssh.com`.
    pub fn expand_path(&mut self, path: impl Into<String>) -> Response<String> {
        let request = Request::Extended(Extended::ExpandPath { path: path.into() });

        self.call(request, name)
    }

    /// Issue a vendor-specific extended request, resolving to the raw reply data.
    pub fn extended(&mut self, name: impl Into<String>, data: Vec<u8>) -> Response<Vec<u8>> {
        let request = Request::Extended(Extended::Other {
            name: name.into(),
            data,
        });

        self.call(request, |reply| match reply.check()? {
            Reply::Extended(data) => Ok(data),
            Reply::Status { .. } => Ok(Vec::new()),
            _ => Err(Error::UnexpectedReply),
        })
    }

    /// Write the whole `data` at `offset`, in writes of at most [`Self::max_write`] bytes.
    pub fn write_all(&mut self, handle: &Handle, offset: u64, data: Vec<u8>) -> Response<()> {
        if self.state == State::Closed {
            return failed(Error::NoResponse);
        }

        let (pending, response) = Pending::pair();
        if data.is_empty() {
            pending.resolve(Ok(()));

            return response;
        }

        let transfer = self.transfer();
        self.uploads.insert(
            transfer,
            Upload {
                handle: handle.clone(),
                offset,
                data,
                chunk: self.max_write as usize,
                issued: 0,
                inflight: 0,
                failure: None,
                pending,
            },
        );
        self.upload(transfer);

        response
    }

    /// Read the file from `offset` to its end, in reads of at most [`Self::max_read`] bytes.
    pub fn read_to_end(&mut self, handle: &Handle, offset: u64) -> Response<Vec<u8>> {
        if self.state == State::Closed {
            return failed(Error::NoResponse);
        }

        let (pending, response) = Pending::pair();

        let transfer = self.transfer();
        self.downloads.insert(
            transfer,
            Download {
                handle: handle.clone(),
                offset,
                data: Vec::new(),
                pending,
            },
        );
        self.download(transfer);

        response
    }

    fn transfer(&mut self) -> u32 {
        let transfer = self.next_transfer;
        self.next_transfer = self.next_transfer.wrapping_add(1);

        transfer
    }

    /// Issue the next writes of the upload, resolving it once every write completed.
    fn upload(&mut self, transfer: u32) {
        let Some(upload) = self.uploads.get_mut(&transfer) else {
            return;
        };

        let mut requests = Vec::new();
        while upload.failure.is_none()
            && upload.issued < upload.data.len()
            && upload.inflight < MAX_INFLIGHT
        {
            let len = upload.chunk.min(upload.data.len() - upload.issued);

            requests.push(Request::Write {
                handle: upload.handle.clone(),
                offset: upload.offset + upload.issued as u64,
                data: upload.data[upload.issued..upload.issued + len].to_vec(),
            });

            upload.issued += len;
            upload.inflight += 1;
        }

        let done = upload.inflight == 0
            && (upload.failure.is_some() || upload.issued == upload.data.len());

        if done {
            if let Some(upload) = self.uploads.remove(&transfer) {
                upload.pending.resolve(match upload.failure {
                    Some(err) => Err(err),
                    None => Ok(()),
                });
            }
        }

        for request in requests {
            self.issue(request, Waiter::Upload(transfer));
        }
    }

    /// Issue the next read of the download.
    fn download(&mut self, transfer: u32) {
        let Some(download) = self.downloads.get(&transfer) else {
            return;
        };

        let request = Request::Read {
            handle: download.handle.clone(),
            offset: download.offset + download.data.len() as u64,
            len: self.max_read,
        };

        self.issue(request, Waiter::Download(transfer));
    }
}

fn waiter<T: Send + 'static>(
    map: impl FnOnce(Reply) -> Result<T> + Send + 'static,
) -> (Waiter, Response<T>) {
    let (pending, response) = Pending::pair();

    let waiter = Waiter::Reply(Box::new(move |reply: Result<Reply>| {
        pending.resolve(reply.and_then(map));
    }));

    (waiter, response)
}

/// The length of reads or writes for the server `limit`, `0` being unlimited,
/// bounded so a request fits the server packet length.
fn clamp(limit: u64, limits: &Limits) -> u32 {
    let max = match limits.max_packet_length {
        0 => MAX_DATA_LENGTH,
        packet => MAX_DATA_LENGTH.min(packet.saturating_sub(HEADER_ROOM).max(1)),
    };

    match limit {
        0 => max as u32,
        limit => limit.min(max) as u32,
    }
}

fn unit(reply: Reply) -> Result<()> {
    match reply.check()? {
        Reply::Status { .. } => Ok(()),
        _ => Err(Error::UnexpectedReply),
    }
}

fn handle(reply: Reply) -> Result<Handle> {
    match reply.check()? {
        Reply::Handle(handle) => Ok(handle),
        _ => Err(Error::UnexpectedReply),
    }
}

fn attrs(reply: Reply) -> Result<FileAttributes> {
    match reply.check()? {
        Reply::Attrs(attrs) => Ok(attrs),
        _ => Err(Error::UnexpectedReply),
    }
}

fn names(reply: Reply) -> Result<Vec<Entry>> {
    match reply.check()? {
        Reply::Name(entries) => Ok(entries),
        _ => Err(Error::UnexpectedReply),
    }
}

fn name(reply: Reply) -> Result<String> {
    names(reply)?
        .into_iter()
        .next()
        .map(|entry| entry.filename)
        .ok_or(Error::UnexpectedReply)
}

fn data(reply: Reply) -> Result<Option<Vec<u8>>> {
    match reply {
        Reply::Status {
            code: StatusCode::Eof,
            ..
        } => Ok(None),
        reply => match reply.check()? {
            Reply::Data(data) => Ok(Some(data)),
            _ => Err(Error::UnexpectedReply),
        },
    }
}

fn extended(reply: Reply) -> Result<Vec<u8>> {
    match reply {
        Reply::Extended(data) => Ok(data),
        _ => Err(Error::UnexpectedReply),
    }
}

fn statvfs(reply: Reply) -> Result<Statvfs> {
    let data = extended(reply.check()?)?;

    from_slice(&data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msg::to_vec;

    /// Build a client already past the negotiation, with the server `extensions`.
    fn ready(extensions: &[Extension]) -> Client {
        let mut client = Client::new(Default::default()).unwrap();
        client.take_output();

        let version = Hello {
            version: VERSION,
            extensions: extensions
                .iter()
                .filter(|ext| **ext != Extension::Limits)
                .map(|ext| (ext.name().to_owned(), ext.data().to_vec()))
                .collect(),
        };
        client
            .feed(&frame::frame(&version.encode(VERSION_MSG).unwrap()))
            .unwrap();

        assert!(client.is_ready());

        client
    }

    /// Decode the requests sent by the client.
    fn sent(client: &mut Client) -> Vec<(u32, Request)> {
        let mut deframer = Deframer::new(MAX_FRAME_LENGTH);
        deframer.feed(&client.take_output());

        std::iter::from_fn(|| deframer.next().unwrap())
            .map(|payload| Request::decode(&payload).unwrap())
            .collect()
    }

    fn reply(client: &mut Client, id: u32, reply: Reply) {
        client.feed(&frame::frame(&reply.encode(id).unwrap())).unwrap();
    }

    #[test]
    fn requests_wait_for_the_negotiation() {
        let mut client = Client::new(Default::default()).unwrap();

        let mut deframer = Deframer::new(MAX_FRAME_LENGTH);
        deframer.feed(&client.take_output());
        let init = Hello::decode(&deframer.next().unwrap().unwrap(), INIT).unwrap();
        assert_eq!(init.version, VERSION);

        let stat = client.stat("/");
        assert!(!client.has_output());
        assert!(stat.try_take().is_none());

        let version = Hello {
            version: 3,
            extensions: vec![],
        };
        client
            .feed(&frame::frame(&version.encode(VERSION_MSG).unwrap()))
            .unwrap();

        assert_eq!(client.version(), Some(3));
        assert!(matches!(
            sent(&mut client).as_slice(),
            [(_, Request::Stat { .. })]
        ));
    }

    #[test]
    fn older_versions_are_refused() {
        let mut client = Client::new(Default::default()).unwrap();

        let version = Hello {
            version: 2,
            extensions: vec![],
        };

        assert!(matches!(
            client.feed(&frame::frame(&version.encode(VERSION_MSG).unwrap())),
            Err(Error::Version(2))
        ));
        assert!(client.is_closed());
    }

    #[test]
    fn limits_are_queried_when_offered() {
        let mut client = Client::new(Default::default()).unwrap();
        client.take_output();

        let version = Hello {
            version: 3,
            extensions: vec![("limits@openssh.com".into(), b"1".to_vec())],
        };
        client
            .feed(&frame::frame(&version.encode(VERSION_MSG).unwrap()))
            .unwrap();

        let read = client.read(&Handle(b"h".to_vec()), 0, u32::MAX);

        let requests = sent(&mut client);
        let [(id, Request::Extended(Extended::Limits))] = requests.as_slice() else {
            panic!("Expected a single limits request");
        };
        assert!(!client.is_ready());

        let limits = Limits {
            max_packet_length: 256 * 1024,
            max_read_length: 64 * 1024,
            max_write_length: 0,
            max_open_handles: 0,
        };
        reply(
            &mut client,
            *id,
            Reply::Extended(to_vec(&limits).unwrap()),
        );

        assert!(client.is_ready());
        assert_eq!(client.max_read(), 64 * 1024);
        assert_eq!(client.max_write(), 256 * 1024 - 1024);
        assert!(read.try_take().is_none());

        // The read queued before the limits were known keeps the conservative default.
        assert!(matches!(
            sent(&mut client).as_slice(),
            [(_, Request::Read { len: DEFAULT_MAX_LENGTH, .. })]
        ));
    }

    #[test]
    fn replies_are_matched_by_id() {
        let mut client = ready(&[]);

        let open = client.open("file", OpenFlags::READ, Default::default());
        let close = client.close(&Handle(b"other".to_vec()));

        let requests = sent(&mut client);
        let [(open_id, _), (close_id, _)] = requests.as_slice() else {
            panic!("Expected two requests");
        };

        reply(&mut client, *close_id, Reply::ok());
        assert!(open.try_take().is_none());
        assert!(matches!(close.try_take(), Some(Ok(()))));

        reply(&mut client, *open_id, Reply::Handle(Handle(b"h1".to_vec())));
        assert_eq!(open.try_take().unwrap().unwrap(), Handle(b"h1".to_vec()));
    }

    #[test]
    fn unknown_ids_are_ignored() {
        let mut client = ready(&[]);

        let stat = client.stat("/");

        reply(&mut client, 4242, Reply::ok());
        assert!(stat.try_take().is_none());
        assert!(!client.is_closed());
        assert_eq!(client.in_flight(), 1);
    }

    #[test]
    fn failure_status_is_reported_to_the_caller() {
        let mut client = ready(&[]);

        let remove = client.remove("missing");
        let requests = sent(&mut client);
        let [(id, _)] = requests.as_slice() else {
            panic!("Expected a single request");
        };

        reply(
            &mut client,
            *id,
            Reply::status(StatusCode::NoSuchFile, "No such file"),
        );

        assert!(matches!(
            remove.try_take(),
            Some(Err(Error::Status {
                code: StatusCode::NoSuchFile,
                ..
            }))
        ));
        assert!(!client.is_closed());
    }

    #[test]
    fn extensions_require_the_server_support() {
        let mut client = ready(&[Extension::Fsync]);

        let fsync = client.fsync(&Handle(b"h".to_vec()));
        let statvfs = client.statvfs("/");

        assert!(matches!(
            statvfs.try_take(),
            Some(Err(Error::Unsupported("statvfs@openssh.com")))
        ));
        assert!(fsync.try_take().is_none());
        assert!(matches!(
            sent(&mut client).as_slice(),
            [(_, Request::Extended(Extended::Fsync { .. }))]
        ));
    }

    #[test]
    fn writes_are_capped() {
        let mut client = ready(&[]);

        let write = client.write_at(&Handle(b"h".to_vec()), 0, &[0; 100_000]);
        let requests = sent(&mut client);
        let [(id, Request::Write { data, .. })] = requests.as_slice() else {
            panic!("Expected a single write");
        };
        assert_eq!(data.len(), DEFAULT_MAX_LENGTH as usize);

        reply(&mut client, *id, Reply::ok());
        assert_eq!(write.try_take().unwrap().unwrap(), DEFAULT_MAX_LENGTH as usize);
    }

    #[test]
    fn write_all_is_split_and_windowed() {
        let mut client = ready(&[]);
        let handle = Handle(b"h".to_vec());

        let len = DEFAULT_MAX_LENGTH as usize * (MAX_INFLIGHT + 4) + 10;
        let write = client.write_all(&handle, 100, vec![7; len]);

        let first = sent(&mut client);
        assert_eq!(first.len(), MAX_INFLIGHT);

        for (id, _) in first {
            reply(&mut client, id, Reply::ok());
        }

        let rest = sent(&mut client);
        assert_eq!(rest.len(), 5);
        assert!(matches!(
            rest.last(),
            Some((_, Request::Write { offset, data, .. }))
                if *offset == 100 + (len - 10) as u64 && data.len() == 10
        ));
        assert!(write.try_take().is_none());

        for (id, _) in rest {
            reply(&mut client, id, Reply::ok());
        }
        assert!(matches!(write.try_take(), Some(Ok(()))));
    }

    #[test]
    fn read_to_end_stops_at_eof() {
        let mut client = ready(&[]);

        let read = client.read_to_end(&Handle(b"h".to_vec()), 0);

        for chunk in [&b"hello "[..], &b"world"[..]] {
            let requests = sent(&mut client);
            let [(id, Request::Read { offset, .. })] = requests.as_slice() else {
                panic!("Expected a single read");
            };
            assert!(*offset == 0 || *offset == 6);

            reply(&mut client, *id, Reply::Data(chunk.to_vec()));
        }

        let requests = sent(&mut client);
        let [(id, Request::Read { offset: 11, .. })] = requests.as_slice() else {
            panic!("Expected a read at the end");
        };
        reply(&mut client, *id, Reply::status(StatusCode::Eof, "EOF"));

        assert_eq!(read.try_take().unwrap().unwrap(), b"hello world");
    }

    #[test]
    fn shutdown_fails_everything() {
        let mut client = ready(&[]);

        let stat = client.stat("/");
        let upload = client.write_all(&Handle(b"h".to_vec()), 0, vec![1; 10]);
        let download = client.read_to_end(&Handle(b"h".to_vec()), 0);

        client.shutdown();

        assert!(matches!(stat.try_take(), Some(Err(Error::NoResponse))));
        assert!(matches!(upload.try_take(), Some(Err(Error::NoResponse))));
        assert!(matches!(download.try_take(), Some(Err(Error::NoResponse))));
        assert!(matches!(
            client.stat("/").try_take(),
            Some(Err(Error::NoResponse))
        ));
    }

    #[test]
    fn limits_leave_room_for_the_headers() {
        let limits = Limits {
            max_packet_length: 34000,
            max_read_length: 0,
            max_write_length: 0,
            max_open_handles: 0,
        };

        assert_eq!(clamp(limits.max_write_length, &limits), 34000 - 1024);
        assert_eq!(clamp(4096, &limits), 4096);
        assert_eq!(
            clamp(
                0,
                &Limits {
                    max_packet_length: 0,
                    ..limits
                }
            ),
            MAX_DATA_LENGTH as u32
        );
    }

    #[test]
    fn empty_reads_are_refused() {
        let mut client = ready(&[]);

        let read = client.read_to_end(&Handle(b"h".to_vec()), 0);

        let requests = sent(&mut client);
        let [(id, Request::Read { .. })] = requests.as_slice() else {
            panic!("Expected a single read");
        };
        reply(&mut client, *id, Reply::Data(Vec::new()));

        assert!(matches!(read.try_take(), Some(Err(Error::EmptyRead))));
        assert!(sent(&mut client).is_empty());
        assert!(!client.is_closed());
    }

    #[test]
    fn close_waits_for_the_download() {
        let mut client = ready(&[]);
        let handle = Handle(b"h".to_vec());

        let read = client.read_to_end(&handle, 0);
        let close = client.close(&handle);
        let other = client.close(&Handle(b"other".to_vec()));

        let requests = sent(&mut client);
        let [(read_id, Request::Read { .. }), (_, Request::Close { handle: closed })] =
            requests.as_slice()
        else {
            panic!("Expected the read and the unrelated close");
        };
        assert_eq!(closed, &Handle(b"other".to_vec()));

        reply(&mut client, *read_id, Reply::Data(b"data".to_vec()));

        let requests = sent(&mut client);
        let [(read_id, Request::Read { offset: 4, .. })] = requests.as_slice() else {
            panic!("Expected the next read alone");
        };
        reply(&mut client, *read_id, Reply::status(StatusCode::Eof, "EOF"));
        assert_eq!(read.try_take().unwrap().unwrap(), b"data");

        let requests = sent(&mut client);
        let [(close_id, Request::Close { handle: closed })] = requests.as_slice() else {
            panic!("Expected the held close");
        };
        assert_eq!(closed, &handle);

        reply(&mut client, *close_id, Reply::ok());
        assert!(matches!(close.try_take(), Some(Ok(()))));
        assert!(other.try_take().is_none());
    }

    #[test]
    fn close_waits_for_the_upload() {
        let mut client = ready(&[]);
        let handle = Handle(b"h".to_vec());

        let upload = client.write_all(&handle, 0, vec![1; DEFAULT_MAX_LENGTH as usize + 1]);
        let close = client.close(&handle);

        let requests = sent(&mut client);
        assert_eq!(requests.len(), 2);
        assert!(requests
            .iter()
            .all(|(_, request)| matches!(request, Request::Write { .. })));

        for (id, _) in requests {
            reply(&mut client, id, Reply::ok());
        }
        assert!(matches!(upload.try_take(), Some(Ok(()))));

        let requests = sent(&mut client);
        let [(close_id, Request::Close { .. })] = requests.as_slice() else {
            panic!("Expected the held close");
        };
        reply(&mut client, *close_id, Reply::ok());
        assert!(matches!(close.try_take(), Some(Ok(()))));
    }

    #[test]
    fn held_closes_fail_on_shutdown() {
        let mut client = ready(&[]);
        let handle = Handle(b"h".to_vec());

        let _read = client.read_to_end(&handle, 0);
        let close = client.close(&handle);

        client.shutdown();

        assert!(matches!(close.try_take(), Some(Err(Error::NoResponse))));
    }
}
