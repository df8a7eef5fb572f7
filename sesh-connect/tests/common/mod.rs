#![allow(dead_code)]

use sesh::side::{client::Client, server::Server};
use sesh_connect::{
    auth::{
        client,
        server::{self, Attempt, Handler, Response},
        Methods,
    },
    connect::{Config, Connect},
    Event, Result,
};
use ssh_key::{Algorithm, PrivateKey, PublicKey};

pub fn init() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init()
        .ok();
}

pub fn key() -> PrivateKey {
    PrivateKey::random(&mut rand::thread_rng(), Algorithm::Ed25519).unwrap()
}

pub fn server_config() -> Server {
    Server {
        keys: vec![key()],
        ..Default::default()
    }
}

/// Accepts `user` with the `hunter2` password, or with any of the keys.
pub struct Users {
    pub keys: Vec<PublicKey>,
}

impl Handler for Users {
    fn on_attempt(&mut self, username: &str, attempt: Attempt<'_>) -> Response {
        match attempt {
            Attempt::Password {
                password: "hunter2",
                ..
            } if username == "user" => Response::Accept,
            Attempt::Publickey { key, .. } if self.keys.contains(key) => Response::Accept,
            _ => Response::Reject,
        }
    }
}

pub fn server_auth(keys: Vec<PublicKey>) -> server::Auth {
    server::Auth::new(Methods::PASSWORD | Methods::PUBLICKEY, Users { keys })
}

pub fn connect(auth: client::Auth, config: Config) -> (Connect<Client>, Connect<Server>) {
    let client = Connect::new(Client::default(), auth, config).unwrap();
    let server = Connect::new(server_config(), server_auth(vec![]), config).unwrap();

    (client, server)
}

/// Shuttle bytes between both connections until neither has anything to say.
pub fn pump(client: &mut Connect<Client>, server: &mut Connect<Server>) -> Result<()> {
    loop {
        let (left, right) = (client.take_output(), server.take_output());

        if left.is_empty() && right.is_empty() {
            break Ok(());
        }

        if !left.is_empty() {
            server.feed(&left)?;
        }
        if !right.is_empty() {
            client.feed(&right)?;
        }
    }
}

/// An authenticated pair of connections, with the default settings.
pub fn pair() -> (Connect<Client>, Connect<Server>) {
    let (mut client, mut server) = connect(
        client::Auth::new("user").password("hunter2"),
        Config::default(),
    );

    pump(&mut client, &mut server).unwrap();

    assert!(client.is_authenticated());
    assert!(server.is_authenticated());

    events(&mut client);
    events(&mut server);

    (client, server)
}

pub fn events<S: sesh_connect::auth::Side>(connect: &mut Connect<S>) -> Vec<Event> {
    std::iter::from_fn(|| connect.poll_event()).collect()
}

/// Open a `session` channel from the client, accepted by the server.
pub fn channel(client: &mut Connect<Client>, server: &mut Connect<Server>) -> (u32, u32) {
    let response = client
        .channel_open(sesh_connect::connect::ChannelOpenContext::Session)
        .unwrap();
    pump(client, server).unwrap();

    let remote = match events(server).as_slice() {
        [Event::ChannelOpen { channel, .. }] => *channel,
        other => panic!("Unexpected events: {other:?}"),
    };
    server.accept(remote).unwrap();
    pump(client, server).unwrap();

    (response.try_take().unwrap().unwrap(), remote)
}
