#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use rstest::rstest;

use sesh::{
    algorithm::{Cipher, Compress, Hmac, Kex},
    msg::{
        connect::ChannelData,
        encode,
        trans::{DisconnectReason, ServiceAccept, ServiceRequest},
        userauth::AuthSuccess,
        PacketExt,
    },
    side::{
        client::{Algorithms, Client, Verdict},
        server::Server,
        Rekey,
    },
    Error, Session,
};

mod common;

fn data(session: &mut Session<impl sesh::side::Side>) -> Vec<Vec<u8>> {
    std::iter::from_fn(|| session.poll_packet())
        .map(|(_, packet)| packet.to::<ChannelData>().unwrap().data.into_vec())
        .collect()
}

#[test]
fn initiator_kex_preference_wins() {
    common::init();

    let client = Client {
        algorithms: Algorithms {
            kexs: vec![Kex::EcdhSha2Nistp256, Kex::Curve25519Sha256],
            ..Default::default()
        },
        ..Default::default()
    };
    let mut server = common::server();
    server.algorithms.kexs = vec![Kex::Curve25519Sha256, Kex::EcdhSha2Nistp256];

    let (client, server) = common::pair(client, server);

    assert_eq!(client.algorithms().unwrap().kex, Kex::EcdhSha2Nistp256);
    assert_eq!(client.algorithms(), server.algorithms());
    assert_eq!(client.session_id(), server.session_id());
}

#[rstest]
#[case("chacha20-poly1305@openssh.com", "hmac-sha2-256", "curve25519-sha256")]
#[case("aes256-gcm@openssh.com", "hmac-sha1", "ecdh-sha2-nistp384")]
#[case("aes128-gcm@openssh.com", "hmac-md5", "curve25519-sha256@libssh.org")]
#[case("aes256-ctr", "hmac-sha2-512-etm@openssh.com", "diffie-hellman-group14-sha256")]
#[case("aes192-ctr", "hmac-sha2-256", "diffie-hellman-group-exchange-sha256")]
#[case("aes128-ctr", "hmac-sha1-etm@openssh.com", "ecdh-sha2-nistp256")]
#[case("aes256-cbc", "hmac-sha2-512", "diffie-hellman-group1-sha1")]
#[case("aes128-cbc", "hmac-md5-etm@openssh.com", "diffie-hellman-group14-sha1")]
#[case("3des-cbc", "hmac-sha1", "curve25519-sha256")]
fn end_to_end(#[case] cipher: &str, #[case] mac: &str, #[case] kex: &str) {
    common::init();

    let client = Client {
        algorithms: Algorithms {
            kexs: vec![kex.parse().unwrap()],
            ciphers: vec![cipher.parse().unwrap()],
            macs: vec![mac.parse().unwrap()],
            ..Default::default()
        },
        ..Default::default()
    };
    let (mut client, mut server) = common::pair(client, common::server());

    let negotiated = client.algorithms().unwrap();
    assert_eq!(negotiated.kex.as_ref(), kex);
    assert_eq!(negotiated.client_to_server.cipher.as_ref(), cipher);
    if negotiated.client_to_server.cipher.is_aead() {
        assert_eq!(negotiated.client_to_server.hmac, Hmac::None);
    } else {
        assert_eq!(negotiated.client_to_server.hmac.as_ref(), mac);
    }

    client
        .send(&ServiceRequest {
            service_name: "ssh-userauth".into(),
        })
        .unwrap();
    common::pump(&mut client, &mut server).unwrap();

    let request = server.poll_packet().unwrap().1.to::<ServiceRequest>().unwrap();
    server
        .send(&ServiceAccept {
            service_name: request.service_name,
        })
        .unwrap();
    common::pump(&mut client, &mut server).unwrap();

    assert_eq!(
        &*client
            .poll_packet()
            .unwrap()
            .1
            .to::<ServiceAccept>()
            .unwrap()
            .service_name,
        "ssh-userauth"
    );
}

#[test]
fn rekey_preserves_data_order() {
    common::init();

    let (mut client, mut server) = common::pair(Client::default(), common::server());
    let session_id = client.session_id().unwrap().to_vec();

    let message = |i: u32| ChannelData {
        recipient_channel: 0,
        data: i.to_be_bytes().to_vec().into(),
    };

    for i in 0..10 {
        client.send(&message(i)).unwrap();
    }
    client.rekey().unwrap();
    for i in 10..20 {
        client.send(&message(i)).unwrap();
        server.send(&message(i)).unwrap();
    }

    common::pump(&mut client, &mut server).unwrap();

    assert!(client.is_ready() && server.is_ready());
    assert_eq!(client.session_id().unwrap(), session_id);
    assert_eq!(
        data(&mut server),
        (0..20u32)
            .map(|i| i.to_be_bytes().to_vec())
            .collect::<Vec<_>>()
    );
    assert_eq!(
        data(&mut client),
        (10..20u32)
            .map(|i| i.to_be_bytes().to_vec())
            .collect::<Vec<_>>()
    );
}

#[test]
fn rekey_after_packet_threshold() {
    common::init();

    let client = Client {
        rekey: Rekey {
            packets: 8,
            ..Default::default()
        },
        ..Default::default()
    };
    let (mut client, mut server) = common::pair(client, common::server());

    for i in 0..32u32 {
        client
            .send(&ChannelData {
                recipient_channel: 1,
                data: i.to_be_bytes().to_vec().into(),
            })
            .unwrap();

        if i % 3 == 0 {
            common::pump(&mut client, &mut server).unwrap();
        }
    }
    common::pump(&mut client, &mut server).unwrap();

    assert_eq!(data(&mut server).len(), 32);
    assert_eq!(client.session_id(), server.session_id());
}

#[test]
fn strict_kex_is_negotiated() {
    common::init();

    let (client, server) = common::pair(Client::default(), common::server());
    assert!(client.is_strict() && server.is_strict());

    let client = Client {
        extensions: false,
        ..Default::default()
    };
    let (client, server) = common::pair(client, common::server());
    assert!(!client.is_strict() && !server.is_strict());
}

#[test]
fn strict_kex_rejects_injected_packets() {
    common::init();

    let mut client = Session::new(Client::default()).unwrap();
    let mut server = Session::new(common::server()).unwrap();

    let output = client.take_output();
    let eol = output.iter().position(|byte| *byte == b'\n').unwrap() + 1;

    // An unencrypted `SSH_MSG_IGNORE` slipped in before the `SSH_MSG_KEXINIT`.
    let injected = [0, 0, 0, 12, 6, 2, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];

    server.feed(&output[..eol]).unwrap();
    server.feed(&injected).unwrap();

    assert!(matches!(
        server.feed(&output[eol..]),
        Err(Error::StrictKex(20))
    ));
    assert!(server.is_disconnected());
}

#[test]
fn deferred_host_verification() {
    common::init();

    let client = Client {
        verifier: Arc::new(|_: &ssh_key::PublicKey| Verdict::Defer),
        ..Default::default()
    };
    let server: Server = common::server();
    let host_key = server.keys[0].public_key().clone();

    let mut client = Session::new(client).unwrap();
    let mut server = Session::new(server).unwrap();

    client
        .send(&ServiceRequest {
            service_name: "ssh-userauth".into(),
        })
        .unwrap();
    common::pump(&mut client, &mut server).unwrap();

    assert_eq!(client.pending_host_key(), Some(&host_key));
    assert!(!client.is_ready() && !server.is_ready());

    client.verify_host(true).unwrap();
    common::pump(&mut client, &mut server).unwrap();

    assert!(client.is_ready() && server.is_ready());
    assert!(server.poll_packet().unwrap().1.is::<ServiceRequest>());
}

#[test]
fn rejected_host_key_disconnects() {
    common::init();

    let client = Client {
        verifier: Arc::new(|_: &ssh_key::PublicKey| Verdict::Defer),
        ..Default::default()
    };
    let mut client = Session::new(client).unwrap();
    let mut server = Session::new(common::server()).unwrap();

    common::pump(&mut client, &mut server).unwrap();

    assert!(matches!(
        client.verify_host(false),
        Err(Error::HostKeyRejected)
    ));
    assert!(matches!(
        server.feed(&client.take_output()),
        Err(Error::Disconnected(DisconnectReason::HostKeyNotVerifiable))
    ));
}

#[test]
fn greeting_is_received_by_the_client() {
    common::init();

    let server = Server {
        greeting: vec!["Welcome".into(), "to the machine".into()],
        ..common::server()
    };
    let (client, _) = common::pair(Client::default(), server);

    assert_eq!(client.greeting(), ["Welcome", "to the machine"]);
}

#[test]
fn no_common_cipher_is_named() {
    common::init();

    let client = Client {
        algorithms: Algorithms {
            ciphers: vec![Cipher::TDesCbc],
            ..Default::default()
        },
        ..Default::default()
    };
    let mut server = common::server();
    server.algorithms.ciphers = vec![Cipher::Aes128Ctr];

    let mut client = Session::new(client).unwrap();
    let mut server = Session::new(server).unwrap();

    assert!(matches!(
        common::pump(&mut client, &mut server),
        Err(Error::NoCommonCipher)
    ));
}

#[rstest]
#[case(Compress::Zlib)]
#[case(Compress::ZlibOpenssh)]
fn compression_survives_authentication_and_rekey(#[case] compress: Compress) {
    common::init();

    let client = Client {
        algorithms: Algorithms {
            compressions: vec![compress.clone()],
            ..Default::default()
        },
        ..Default::default()
    };
    let (mut client, mut server) = common::pair(client, common::server());

    assert_eq!(client.algorithms().unwrap().client_to_server.compress, compress);
    assert_eq!(server.algorithms().unwrap().server_to_client.compress, compress);

    let message = |i: u32| ChannelData {
        recipient_channel: 0,
        data: vec![i as u8; 512].into(),
    };

    let expected = (0..3).map(|i| vec![i as u8; 512]).collect::<Vec<_>>();

    client.send(&message(0)).unwrap();
    server.send(&message(0)).unwrap();
    common::pump(&mut client, &mut server).unwrap();

    assert_eq!(data(&mut server), expected[..1]);
    assert_eq!(data(&mut client), expected[..1]);

    // Starts the compression held back by `zlib@openssh.com`, in both directions.
    server.send_payload(encode(&AuthSuccess).unwrap()).unwrap();
    common::pump(&mut client, &mut server).unwrap();
    assert!(client.poll_packet().unwrap().1.is::<AuthSuccess>());

    client.send(&message(1)).unwrap();
    server.send(&message(1)).unwrap();
    client.rekey().unwrap();
    client.send(&message(2)).unwrap();
    server.send(&message(2)).unwrap();
    common::pump(&mut client, &mut server).unwrap();

    assert_eq!(data(&mut server), expected[1..]);
    assert_eq!(data(&mut client), expected[1..]);
}
