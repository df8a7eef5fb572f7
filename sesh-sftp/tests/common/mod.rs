#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};

use sesh::side::{client::Client, server::Server};
use sesh_connect::{
    auth::{
        client,
        server::{self, Attempt, Handler, Response},
        Methods,
    },
    channel::Outcome,
    connect::{ChannelOpenContext, Config, Connect},
    Event,
};
use sesh_sftp::{
    attrs::{FileAttributes, OpenFlags},
    channel,
    msg::{Entry, Extended, Handle, Reply, Request, StatusCode},
};
use ssh_key::{Algorithm, PrivateKey};

pub fn init() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init()
        .ok();
}

struct Anyone;

impl Handler for Anyone {
    fn on_attempt(&mut self, _username: &str, attempt: Attempt<'_>) -> Response {
        match attempt {
            Attempt::Password { .. } => Response::Accept,
            _ => Response::Reject,
        }
    }
}

/// Shuttle bytes between both connections until neither has anything to say.
fn pump(client: &mut Connect<Client>, server: &mut Connect<Server>) {
    loop {
        let (left, right) = (client.take_output(), server.take_output());

        if left.is_empty() && right.is_empty() {
            break;
        }

        if !left.is_empty() {
            server.feed(&left).unwrap();
        }
        if !right.is_empty() {
            client.feed(&right).unwrap();
        }
    }
}

fn events<S: sesh_connect::auth::Side>(connect: &mut Connect<S>) -> Vec<Event> {
    std::iter::from_fn(|| connect.poll_event()).collect()
}

#[derive(Debug)]
enum Opened {
    File { path: String, flags: OpenFlags },
    Dir { path: String, listed: bool },
}

/// An in-memory file system, answering the requests of a [`sesh_sftp::Server`].
#[derive(Debug, Default)]
pub struct Memory {
    pub files: BTreeMap<String, Vec<u8>>,
    pub dirs: Vec<String>,

    handles: HashMap<Vec<u8>, Opened>,
    next_handle: u32,
}

impl Memory {
    fn handle(&mut self, opened: Opened) -> Reply {
        let handle = self.next_handle.to_be_bytes().to_vec();
        self.next_handle += 1;
        self.handles.insert(handle.clone(), opened);

        Reply::Handle(Handle(handle))
    }

    fn stat(&self, path: &str) -> Reply {
        if let Some(file) = self.files.get(path) {
            Reply::Attrs(FileAttributes {
                size: Some(file.len() as u64),
                permissions: Some(0o100644),
                ..Default::default()
            })
        } else if path == "/" || self.dirs.iter().any(|dir| dir == path) {
            Reply::Attrs(FileAttributes {
                permissions: Some(0o040755),
                ..Default::default()
            })
        } else {
            Reply::status(StatusCode::NoSuchFile, "No such file")
        }
    }

    /// Answer a single request.
    pub fn answer(&mut self, request: Request) -> Reply {
        match request {
            Request::Open {
                filename, flags, ..
            } => {
                if !self.files.contains_key(&filename) {
                    if !flags.contains(OpenFlags::CREAT) {
                        return Reply::status(StatusCode::NoSuchFile, "No such file");
                    }

                    self.files.insert(filename.clone(), Vec::new());
                } else if flags.contains(OpenFlags::TRUNC) {
                    self.files.insert(filename.clone(), Vec::new());
                }

                self.handle(Opened::File {
                    path: filename,
                    flags,
                })
            }
            Request::Opendir { path } => self.handle(Opened::Dir {
                path,
                listed: false,
            }),
            Request::Close { handle } => match self.handles.remove(&handle.0) {
                Some(_) => Reply::ok(),
                None => Reply::status(StatusCode::Failure, "Invalid handle"),
            },
            Request::Read {
                handle,
                offset,
                len,
            } => {
                let Some(Opened::File { path, .. }) = self.handles.get(&handle.0) else {
                    return Reply::status(StatusCode::Failure, "Invalid handle");
                };
                let file = &self.files[path];

                let start = (offset as usize).min(file.len());
                let end = (start + len as usize).min(file.len());
                if start == end {
                    Reply::status(StatusCode::Eof, "End of file")
                } else {
                    Reply::Data(file[start..end].to_vec())
                }
            }
            Request::Write {
                handle,
                offset,
                data,
            } => {
                let Some(Opened::File { path, flags }) = self.handles.get(&handle.0) else {
                    return Reply::status(StatusCode::Failure, "Invalid handle");
                };
                if !flags.contains(OpenFlags::WRITE) {
                    return Reply::status(StatusCode::PermissionDenied, "Read-only handle");
                }

                let file = self.files.entry(path.clone()).or_default();
                let end = offset as usize + data.len();
                if file.len() < end {
                    file.resize(end, 0);
                }
                file[offset as usize..end].copy_from_slice(&data);

                Reply::ok()
            }
            Request::Readdir { handle } => {
                let Some(Opened::Dir { path, listed }) = self.handles.get_mut(&handle.0) else {
                    return Reply::status(StatusCode::Failure, "Invalid handle");
                };
                if std::mem::replace(listed, true) {
                    return Reply::status(StatusCode::Eof, "No more entries");
                }

                let prefix = format!("{}/", path.trim_end_matches('/'));
                let entries = self
                    .files
                    .iter()
                    .filter_map(|(name, data)| {
                        let filename = name.strip_prefix(&prefix)?;

                        Some(Entry {
                            filename: filename.into(),
                            longname: format!("-rw-r--r-- {} {filename}", data.len()),
                            attrs: FileAttributes {
                                size: Some(data.len() as u64),
                                ..Default::default()
                            },
                        })
                    })
                    .collect();

                Reply::Name(entries)
            }
            Request::Stat { path } | Request::Lstat { path } => self.stat(&path),
            Request::Fstat { handle } => match self.handles.get(&handle.0) {
                Some(Opened::File { path, .. }) => {
                    let path = path.clone();
                    self.stat(&path)
                }
                _ => Reply::status(StatusCode::Failure, "Invalid handle"),
            },
            Request::Remove { filename } => match self.files.remove(&filename) {
                Some(_) => Reply::ok(),
                None => Reply::status(StatusCode::NoSuchFile, "No such file"),
            },
            Request::Mkdir { path, .. } => {
                self.dirs.push(path);

                Reply::ok()
            }
            Request::Realpath { path } => Reply::Name(vec![Entry {
                filename: if path == "." { "/".into() } else { path },
                longname: String::new(),
                attrs: Default::default(),
            }]),
            Request::Rename { oldpath, newpath }
            | Request::Extended(Extended::PosixRename { oldpath, newpath }) => {
                match self.files.remove(&oldpath) {
                    Some(data) => {
                        self.files.insert(newpath, data);

                        Reply::ok()
                    }
                    None => Reply::status(StatusCode::NoSuchFile, "No such file"),
                }
            }
            Request::Extended(Extended::Fsync { .. }) => Reply::ok(),
            _ => Reply::status(StatusCode::OpUnsupported, "Unsupported"),
        }
    }
}

/// A client and a server speaking the protocol over a `session` channel.
pub struct Harness {
    pub client: Connect<Client>,
    pub server: Connect<Server>,
    pub local: u32,
    pub remote: u32,

    pub sftp: sesh_sftp::Client,
    pub responder: sesh_sftp::Server,
    pub fs: Memory,
}

impl Harness {
    pub fn new(config: sesh_sftp::server::Config) -> Self {
        let key = PrivateKey::random(&mut rand::thread_rng(), Algorithm::Ed25519).unwrap();

        let mut client = Connect::new(
            Client::default(),
            client::Auth::new("user").password("secret"),
            Config::default(),
        )
        .unwrap();
        let mut server = Connect::new(
            Server {
                keys: vec![key],
                ..Default::default()
            },
            server::Auth::new(Methods::PASSWORD, Anyone),
            Config::default(),
        )
        .unwrap();

        let open = client.channel_open(ChannelOpenContext::Session).unwrap();
        pump(&mut client, &mut server);

        let remote = events(&mut server)
            .into_iter()
            .find_map(|event| match event {
                Event::ChannelOpen { channel, .. } => Some(channel),
                _ => None,
            })
            .unwrap();
        server.accept(remote).unwrap();
        pump(&mut client, &mut server);

        let local = open.try_take().unwrap().unwrap();

        let started = channel::start(&mut client, local).unwrap();
        pump(&mut client, &mut server);

        let requested = events(&mut server).into_iter().any(|event| {
            matches!(event, Event::Request { channel, context, .. }
                if channel == remote && channel::is_subsystem(&context))
        });
        assert!(requested);
        server.reply(remote, Outcome::Success).unwrap();
        pump(&mut client, &mut server);

        assert_eq!(started.try_take().unwrap().unwrap(), Outcome::Success);
        events(&mut client);

        Self {
            client,
            server,
            local,
            remote,
            sftp: sesh_sftp::Client::new(Default::default()).unwrap(),
            responder: sesh_sftp::Server::new(config),
            fs: Memory::default(),
        }
    }

    /// Carry the bytes between both endpoints, without answering any request.
    pub fn transfer(&mut self) {
        loop {
            channel::exchange(&mut self.client, self.local, &mut self.sftp).unwrap();
            channel::exchange(&mut self.server, self.remote, &mut self.responder).unwrap();

            if !self.client.has_output() && !self.server.has_output() {
                break;
            }

            pump(&mut self.client, &mut self.server);
        }

        events(&mut self.client);
        events(&mut self.server);
    }

    /// The requests received by the server, left unanswered.
    pub fn requests(&mut self) -> Vec<(u32, Request)> {
        std::iter::from_fn(|| self.responder.poll_request()).collect()
    }

    /// Run both endpoints until every request has been answered.
    pub fn run(&mut self) {
        loop {
            self.transfer();

            let requests = self.requests();
            if requests.is_empty() {
                break;
            }

            for (id, request) in requests {
                let reply = self.fs.answer(request);
                self.responder.reply(id, &reply).unwrap();
            }
        }
    }
}
