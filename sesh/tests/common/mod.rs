use sesh::{
    side::{client::Client, server::Server, Side},
    Result, Session,
};

pub fn init() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init()
        .ok();
}

pub fn server() -> Server {
    Server {
        keys: vec![
            ssh_key::PrivateKey::random(&mut rand::thread_rng(), ssh_key::Algorithm::Ed25519)
                .unwrap(),
        ],
        ..Default::default()
    }
}

/// Shuttle bytes between both sessions until neither has anything to say.
pub fn pump<A: Side, B: Side>(a: &mut Session<A>, b: &mut Session<B>) -> Result<()> {
    loop {
        let (left, right) = (a.take_output(), b.take_output());

        if left.is_empty() && right.is_empty() {
            break Ok(());
        }

        if !left.is_empty() {
            b.feed(&left)?;
        }
        if !right.is_empty() {
            a.feed(&right)?;
        }
    }
}

pub fn pair(client: Client, server: Server) -> (Session<Client>, Session<Server>) {
    let mut client = Session::new(client).unwrap();
    let mut server = Session::new(server).unwrap();

    pump(&mut client, &mut server).unwrap();

    assert!(client.is_ready());
    assert!(server.is_ready());

    (client, server)
}
