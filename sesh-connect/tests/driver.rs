use async_std::net::{TcpListener, TcpStream};

use sesh::side::client::Client;
use sesh_connect::{
    auth::client,
    channel::Outcome,
    connect::{ChannelOpenContext, ChannelRequestContext, Config, Connect},
    Driver, Event,
};

mod common;

#[async_std::test]
async fn exec_over_tcp() -> Result<(), Box<dyn std::error::Error>> {
    common::init();

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let server = async_std::task::spawn(async move {
        let (stream, _) = listener.accept().await?;
        let connect = Connect::new(
            common::server_config(),
            common::server_auth(vec![]),
            Config::default(),
        )?;
        let mut driver = Driver::new(stream, connect);

        let mut commands = Vec::new();

        loop {
            match driver.next_event().await? {
                Event::ChannelOpen { channel, .. } => driver.connect().accept(channel)?,
                Event::Request {
                    channel,
                    context: ChannelRequestContext::Exec { command },
                    ..
                } => {
                    commands.push(command.into_vec());

                    let connect = driver.connect();
                    connect.reply(channel, Outcome::Success)?;
                    connect.write(channel, b"hello")?;
                    connect.write_ext(channel, 1, b"world")?;
                    connect.notify(channel, ChannelRequestContext::ExitStatus { code: 0 })?;
                    connect.eof(channel)?;
                    connect.close(channel)?;
                }
                Event::Closed { .. } => break,
                _ => (),
            }
        }

        driver.flush().await?;

        Ok::<_, sesh_connect::Error>(commands)
    });

    let stream = TcpStream::connect(addr).await?;
    let connect = Connect::new(
        Client::default(),
        client::Auth::new("user").password("hunter2"),
        Config::default(),
    )?;
    let mut driver = Driver::new(stream, connect);

    let open = driver.connect().channel_open(ChannelOpenContext::Session)?;
    let channel = driver.wait(open).await?;

    let exec = driver.connect().request(
        channel,
        ChannelRequestContext::Exec {
            command: b"greet".to_vec().into(),
        },
    )?;
    assert_eq!(driver.wait(exec).await?, Outcome::Success);

    let (mut stdout, mut stderr, mut status) = (Vec::new(), Vec::new(), None);

    loop {
        match driver.next_event().await? {
            Event::Data { .. } => {
                let connect = driver.connect();

                stdout.extend(connect.read(channel, usize::MAX)?);
                stderr.extend(connect.read_ext(channel, usize::MAX)?);
            }
            Event::Request {
                context: ChannelRequestContext::ExitStatus { code },
                ..
            } => status = Some(code),
            Event::Closed { .. } => break,
            _ => (),
        }
    }

    assert_eq!(stdout, b"hello");
    assert_eq!(stderr, b"world");
    assert_eq!(status, Some(0));

    assert_eq!(server.await?, vec![b"greet".to_vec()]);

    Ok(())
}
