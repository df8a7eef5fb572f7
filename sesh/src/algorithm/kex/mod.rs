use std::io::Cursor;

use binrw::BinWrite;
use num_bigint::BigUint;
use secrecy::{ExposeSecret, SecretBox};
use signature::{SignatureEncoding, Signer, Verifier};
use ssh_key::{PrivateKey, PublicKey, Signature};
use ssh_packet::kex::EcdhExchange;
use strum::{AsRefStr, EnumString};

use crate::{
    msg::{
        arch::{self, NameList},
        encode, magnitude, mpint,
        trans::{
            KexEcdhInit, KexEcdhReply, KexGexGroup, KexGexInit, KexGexReply, KexGexRequest,
            KexInit, KexdhInit, KexdhReply,
        },
        Packet, PacketExt,
    },
    Error, Result,
};

use super::{HashAlg, Key, Negociate};

mod dh;
use dh::Group;

mod ecdh;
use ecdh::EphemeralSecret;

/// Group sizes requested in a group-exchange, as `(min, n, max)`.
const GEX_REQUEST: (u32, u32, u32) = (2048, 3072, 8192);

impl Negociate for Kex {
    const ERR: Error = Error::NoCommonKex;

    fn field(kex: &KexInit) -> &NameList {
        &kex.kex_algorithms
    }
}

/// SSH key-exchange algorithms.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, EnumString, AsRefStr)]
#[strum(serialize_all = "kebab-case")]
pub enum Kex {
    /// Curve25519 ECDH with sha-2-256 digest.
    #[strum(serialize = "curve25519-sha256")]
    Curve25519Sha256,

    /// Curve25519 ECDH with sha-2-256 digest (pre-RFC 8731).
    #[strum(serialize = "curve25519-sha256@libssh.org")]
    Curve25519Sha256Libssh,

    /// NIST P-256 ECDH with sha-2-256 digest.
    #[strum(serialize = "ecdh-sha2-nistp256")]
    EcdhSha2Nistp256,

    /// NIST P-384 ECDH with sha-2-384 digest.
    #[strum(serialize = "ecdh-sha2-nistp384")]
    EcdhSha2Nistp384,

    /// Diffie-Hellman group-exchange with sha-2-256 digest.
    #[strum(serialize = "diffie-hellman-group-exchange-sha256")]
    DiffieHellmanGroupExchangeSha256,

    /// Diffie-Hellman group-exchange with sha-1 digest.
    #[strum(serialize = "diffie-hellman-group-exchange-sha1")]
    DiffieHellmanGroupExchangeSha1,

    /// Diffie-Hellman on the 4096-bit MODP group with sha-2-512 digest.
    #[strum(serialize = "diffie-hellman-group16-sha512")]
    DiffieHellmanGroup16Sha512,

    /// Diffie-Hellman on the 2048-bit MODP group with sha-2-256 digest.
    #[strum(serialize = "diffie-hellman-group14-sha256")]
    DiffieHellmanGroup14Sha256,

    /// Diffie-Hellman on the 2048-bit MODP group with sha-1 digest.
    #[strum(serialize = "diffie-hellman-group14-sha1")]
    DiffieHellmanGroup14Sha1,

    /// Diffie-Hellman on the 1024-bit Oakley group with sha-1 digest.
    #[strum(serialize = "diffie-hellman-group1-sha1")]
    DiffieHellmanGroup1Sha1,
}

impl Kex {
    pub(crate) fn hash(&self) -> HashAlg {
        match self {
            Self::DiffieHellmanGroupExchangeSha1
            | Self::DiffieHellmanGroup14Sha1
            | Self::DiffieHellmanGroup1Sha1 => HashAlg::Sha1,
            Self::Curve25519Sha256
            | Self::Curve25519Sha256Libssh
            | Self::EcdhSha2Nistp256
            | Self::DiffieHellmanGroupExchangeSha256
            | Self::DiffieHellmanGroup14Sha256 => HashAlg::Sha256,
            Self::EcdhSha2Nistp384 => HashAlg::Sha384,
            Self::DiffieHellmanGroup16Sha512 => HashAlg::Sha512,
        }
    }

    fn method(&self) -> Result<Method> {
        Ok(match self {
            Self::Curve25519Sha256
            | Self::Curve25519Sha256Libssh
            | Self::EcdhSha2Nistp256
            | Self::EcdhSha2Nistp384 => Method::Ecdh,
            Self::DiffieHellmanGroupExchangeSha256 | Self::DiffieHellmanGroupExchangeSha1 => {
                Method::Gex
            }
            Self::DiffieHellmanGroup16Sha512 => Method::Dh(Group::group16()?),
            Self::DiffieHellmanGroup14Sha256 | Self::DiffieHellmanGroup14Sha1 => {
                Method::Dh(Group::group14()?)
            }
            Self::DiffieHellmanGroup1Sha1 => Method::Dh(Group::group1()?),
        })
    }

    /// Start the exchange as the client, returning the first message to send.
    pub(crate) fn client_start(&self) -> Result<(ClientExchange, Vec<u8>)> {
        Ok(match self.method()? {
            Method::Ecdh => {
                let secret = EphemeralSecret::random(self)?;
                let payload = encode(&KexEcdhInit {
                    q_c: secret.public().into(),
                })?;

                (ClientExchange::Ecdh(secret), payload)
            }
            Method::Dh(group) => {
                let (x, e) = group.keypair();
                let payload = encode(&KexdhInit {
                    e: mpint(&e.to_bytes_be()),
                })?;

                (ClientExchange::Dh { group, x, e }, payload)
            }
            Method::Gex => {
                let (min, n, max) = GEX_REQUEST;
                let request = KexGexRequest { min, n, max };
                let payload = encode(&request)?;

                (ClientExchange::GexRequested(request), payload)
            }
        })
    }

    /// Start the exchange as the server, awaiting for the client's first message.
    pub(crate) fn server_start(&self) -> Result<ServerExchange> {
        Ok(match self.method()? {
            Method::Ecdh => ServerExchange::Ecdh,
            Method::Dh(group) => ServerExchange::Dh(group),
            Method::Gex => ServerExchange::GexRequested,
        })
    }
}

enum Method {
    Ecdh,
    Dh(Group),
    Gex,
}

/// Serialize the `value` as SSH binary data.
fn serialize<T>(value: &T) -> Result<Vec<u8>>
where
    T: for<'w> BinWrite<Args<'w> = ()>,
{
    let mut buffer = Cursor::new(Vec::new());
    value.write_be(&mut buffer)?;

    Ok(buffer.into_inner())
}

/// The data bound by the exchange hash, common to all methods.
#[derive(Debug)]
pub struct Transcript<'t> {
    pub v_c: &'t [u8],
    pub v_s: &'t [u8],
    pub i_c: &'t [u8],
    pub i_s: &'t [u8],
}

impl Transcript<'_> {
    /// The exchange hash of the elliptic-curve methods (RFC 5656).
    fn ecdh(
        &self,
        alg: HashAlg,
        k_s: &[u8],
        q_c: &[u8],
        q_s: &[u8],
        k: arch::MpInt,
    ) -> Result<Vec<u8>> {
        let exchange = EcdhExchange {
            v_c: self.v_c.to_vec().into(),
            v_s: self.v_s.to_vec().into(),
            i_c: self.i_c.to_vec().into(),
            i_s: self.i_s.to_vec().into(),
            k_s: k_s.to_vec().into(),
            q_c: q_c.to_vec().into(),
            q_s: q_s.to_vec().into(),
            k,
        };

        Ok(alg.digest(&[serialize(&exchange)?.as_slice()]))
    }

    /// The exchange hash of the finite-field methods, the method-specific
    /// fields being in `exchange`, between `K_S` and `K`.
    fn dh<E>(&self, alg: HashAlg, k_s: &[u8], exchange: &E, k: &arch::MpInt) -> Result<Vec<u8>>
    where
        E: for<'w> BinWrite<Args<'w> = ()>,
    {
        let head: [arch::Bytes; 5] = [
            self.v_c.to_vec().into(),
            self.v_s.to_vec().into(),
            self.i_c.to_vec().into(),
            self.i_s.to_vec().into(),
            k_s.to_vec().into(),
        ];

        Ok(alg.digest(&[
            serialize(&head)?.as_slice(),
            serialize(exchange)?.as_slice(),
            serialize(k)?.as_slice(),
        ]))
    }
}

/// The result of a completed exchange.
pub struct Exchanged {
    /// The shared secret `K`, encoded as a `mpint`.
    pub secret: SecretBox<Vec<u8>>,

    /// The exchange hash `H`.
    pub hash: Vec<u8>,

    /// The host key of the server.
    pub host_key: PublicKey,
}

impl Exchanged {
    fn new(shared: &arch::MpInt, hash: Vec<u8>, host_key: PublicKey) -> Result<Self> {
        Ok(Self {
            secret: SecretBox::new(Box::new(serialize(shared)?)),
            hash,
            host_key,
        })
    }
}

/// A step forward in the exchange.
pub enum Advance<E> {
    /// The exchange continues, with a message to send.
    Continue(E, Vec<u8>),

    /// The exchange is complete, with an optional final message to send.
    Done(Exchanged, Option<Vec<u8>>),
}

/// The client-side state of an exchange.
pub enum ClientExchange {
    Ecdh(EphemeralSecret),
    Dh {
        group: Group,
        x: BigUint,
        e: BigUint,
    },
    GexRequested(KexGexRequest),
    Gex {
        request: KexGexRequest,
        group: Group,
        x: BigUint,
        e: BigUint,
    },
}

impl ClientExchange {
    pub fn advance(
        self,
        kex: &Kex,
        key: &Key,
        packet: &Packet,
        transcript: &Transcript<'_>,
    ) -> Result<Advance<Self>> {
        let alg = kex.hash();

        match self {
            Self::Ecdh(secret) => {
                let reply: KexEcdhReply = packet.to()?;

                let q_c = secret.public();
                let shared = mpint(&secret.agree(&reply.q_s)?);

                let hash = transcript.ecdh(alg, &reply.k_s, &q_c, &reply.q_s, shared.clone())?;
                let host_key = verify(key, &reply.k_s, &reply.signature, &hash)?;

                Ok(Advance::Done(Exchanged::new(&shared, hash, host_key)?, None))
            }
            Self::Dh { group, x, e } => {
                let reply: KexdhReply = packet.to()?;

                let f = BigUint::from_bytes_be(magnitude(&reply.f)?);
                let shared = mpint(&group.agree(&x, &f)?);

                let hash = transcript.dh(
                    alg,
                    &reply.k_s,
                    &(mpint(&e.to_bytes_be()), reply.f.clone()),
                    &shared,
                )?;
                let host_key = verify(key, &reply.k_s, &reply.signature, &hash)?;

                Ok(Advance::Done(Exchanged::new(&shared, hash, host_key)?, None))
            }
            Self::GexRequested(request) => {
                let KexGexGroup { p, g } = packet.to()?;

                let group =
                    Group::from_parameters(magnitude(&p)?, magnitude(&g)?, request.min, request.max)?;
                let (x, e) = group.keypair();
                let payload = encode(&KexGexInit {
                    e: mpint(&e.to_bytes_be()),
                })?;

                tracing::debug!("Server offered a group of {} bits", group.p.bits());

                Ok(Advance::Continue(
                    Self::Gex {
                        request,
                        group,
                        x,
                        e,
                    },
                    payload,
                ))
            }
            Self::Gex {
                request,
                group,
                x,
                e,
            } => {
                let reply: KexGexReply = packet.to()?;

                let f = BigUint::from_bytes_be(magnitude(&reply.f)?);
                let shared = mpint(&group.agree(&x, &f)?);

                let hash = transcript.dh(
                    alg,
                    &reply.k_s,
                    &(
                        (request.min, request.n, request.max),
                        (mpint(&group.p.to_bytes_be()), mpint(&group.g.to_bytes_be())),
                        (mpint(&e.to_bytes_be()), reply.f.clone()),
                    ),
                    &shared,
                )?;
                let host_key = verify(key, &reply.k_s, &reply.signature, &hash)?;

                Ok(Advance::Done(Exchanged::new(&shared, hash, host_key)?, None))
            }
        }
    }
}

/// The server-side state of an exchange.
pub enum ServerExchange {
    Ecdh,
    Dh(Group),
    GexRequested,
    Gex { request: KexGexRequest, group: Group },
}

impl ServerExchange {
    pub fn advance(
        self,
        kex: &Kex,
        host: &PrivateKey,
        packet: &Packet,
        transcript: &Transcript<'_>,
    ) -> Result<Advance<Self>> {
        let alg = kex.hash();
        let host_key = host.public_key().clone();
        let k_s = host_key.to_bytes()?;

        match self {
            Self::Ecdh => {
                let KexEcdhInit { q_c } = packet.to()?;

                let secret = EphemeralSecret::random(kex)?;
                let q_s = secret.public();
                let shared = mpint(&secret.agree(&q_c)?);

                let hash = transcript.ecdh(alg, &k_s, &q_c, &q_s, shared.clone())?;
                let payload = encode(&KexEcdhReply {
                    signature: sign(host, &hash)?.into(),
                    k_s: k_s.into(),
                    q_s: q_s.into(),
                })?;

                Ok(Advance::Done(
                    Exchanged::new(&shared, hash, host_key)?,
                    Some(payload),
                ))
            }
            Self::Dh(group) => {
                let KexdhInit { e } = packet.to()?;

                let (y, f) = group.keypair();
                let shared = mpint(&group.agree(&y, &BigUint::from_bytes_be(magnitude(&e)?))?);
                let f = mpint(&f.to_bytes_be());

                let hash = transcript.dh(alg, &k_s, &(e, f.clone()), &shared)?;
                let payload = encode(&KexdhReply {
                    signature: sign(host, &hash)?.into(),
                    k_s: k_s.into(),
                    f,
                })?;

                Ok(Advance::Done(
                    Exchanged::new(&shared, hash, host_key)?,
                    Some(payload),
                ))
            }
            Self::GexRequested => {
                let request: KexGexRequest = packet.to()?;

                if request.min > request.n || request.n > request.max {
                    return Err(Error::KexError);
                }

                let group = Group::for_request(request.min, request.n, request.max)?;
                let payload = encode(&KexGexGroup {
                    p: mpint(&group.p.to_bytes_be()),
                    g: mpint(&group.g.to_bytes_be()),
                })?;

                Ok(Advance::Continue(Self::Gex { request, group }, payload))
            }
            Self::Gex { request, group } => {
                let KexGexInit { e } = packet.to()?;

                let (y, f) = group.keypair();
                let shared = mpint(&group.agree(&y, &BigUint::from_bytes_be(magnitude(&e)?))?);
                let f = mpint(&f.to_bytes_be());

                let hash = transcript.dh(
                    alg,
                    &k_s,
                    &(
                        (request.min, request.n, request.max),
                        (mpint(&group.p.to_bytes_be()), mpint(&group.g.to_bytes_be())),
                        (e, f.clone()),
                    ),
                    &shared,
                )?;
                let payload = encode(&KexGexReply {
                    signature: sign(host, &hash)?.into(),
                    k_s: k_s.into(),
                    f,
                })?;

                Ok(Advance::Done(
                    Exchanged::new(&shared, hash, host_key)?,
                    Some(payload),
                ))
            }
        }
    }
}

/// Verify the server's signature of the exchange `hash`, returning its host key.
fn verify(key: &Key, k_s: &[u8], signature: &[u8], hash: &[u8]) -> Result<PublicKey> {
    let host_key = PublicKey::from_bytes(k_s)?;
    let signature = Signature::try_from(signature)?;

    if signature.algorithm() != *key {
        tracing::warn!(
            "Host signature algorithm `{}` differs from the negociated `{}`",
            signature.algorithm(),
            key
        );

        return Err(Error::KexError);
    }

    Verifier::verify(&host_key, hash, &signature)?;

    Ok(host_key)
}

fn sign(host: &PrivateKey, hash: &[u8]) -> Result<Vec<u8>> {
    let signature: Signature = Signer::try_sign(host, hash)?;

    Ok(signature.to_vec())
}

impl std::fmt::Debug for Exchanged {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Exchanged")
            .field("hash", &self.hash)
            .field("host_key", &self.host_key.algorithm())
            .finish_non_exhaustive()
    }
}

impl Exchanged {
    /// The shared secret `K`, encoded as a `mpint`.
    pub fn secret(&self) -> &[u8] {
        self.secret.expose_secret()
    }
}
