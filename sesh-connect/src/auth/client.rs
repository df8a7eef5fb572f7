//! Client-side authentication mechanics.

use std::collections::VecDeque;

use binrw::meta::ReadMagic;
use sesh::{
    msg::{
        trans::{ServiceAccept, ServiceRequest},
        userauth::{
            AuthBanner, AuthFailure, AuthMethod, AuthPkOk, AuthRequest, AuthSuccess,
            PublickeySignedData,
        },
        Packet, PacketExt,
    },
    side::client::Client,
    Session,
};
use signature::{SignatureEncoding, Signer};
use ssh_key::{Algorithm, HashAlg, Signature};

#[doc(no_inline)]
pub use ssh_key::PrivateKey;

use super::{private::Authenticator, CONNECTION_SERVICE_NAME, SERVICE_NAME};
use crate::{Error, Event, Result};

#[derive(Debug, Clone)]
enum Method {
    Password { password: String },
    Publickey { key: Box<PrivateKey> },
}

impl Method {
    fn name(&self) -> &'static str {
        match self {
            Self::Password { .. } => "password",
            Self::Publickey { .. } => "publickey",
        }
    }
}

#[derive(Debug, Default)]
enum State {
    #[default]
    Idle,
    Requested,
    Attempting,
    Offering {
        key: Box<PrivateKey>,
    },
    Authenticated,
}

/// The authentication procedure for client-side sessions.
#[derive(Debug)]
pub struct Auth {
    state: State,

    username: String,
    methods: VecDeque<Method>,
}

impl Auth {
    /// Create an [`Auth`] procedure for the provided _username_.
    ///
    /// # Note
    /// The procedure always starts with the `none` authentication method
    /// to discover the methods available on the server, then attempts
    /// the provided methods in order, as long as the server allows them.
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            state: Default::default(),
            username: username.into(),
            methods: Default::default(),
        }
    }

    /// Attempt to authenticate with the `password` method.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.methods.push_back(Method::Password {
            password: password.into(),
        });

        self
    }

    /// Attempt to authenticate with the `publickey` method.
    pub fn publickey(mut self, key: impl Into<PrivateKey>) -> Self {
        self.methods.push_back(Method::Publickey {
            key: Box::new(key.into()),
        });

        self
    }

    fn request(&self, method: AuthMethod) -> AuthRequest {
        AuthRequest {
            username: self.username.as_str().into(),
            service_name: CONNECTION_SERVICE_NAME.into(),
            method,
        }
    }

    /// Attempt the first of our methods the server allows to continue with.
    fn next(&mut self, session: &mut Session<Client>, failure: AuthFailure) -> Result<()> {
        let allowed = failure.continue_with.into_iter().collect::<Vec<_>>();
        let position = self
            .methods
            .iter()
            .position(|method| allowed.contains(&method.name()));

        let Some(method) = position.and_then(|position| self.methods.remove(position)) else {
            tracing::warn!("No more methods to attempt, server allows {allowed:?}");

            return Err(Error::AuthExhausted);
        };

        tracing::debug!("Attempting the `{}` method", method.name());

        match method {
            Method::Password { password } => {
                session.send(&self.request(AuthMethod::Password {
                    password: password.into(),
                    new: None,
                }))?;

                self.state = State::Attempting;
            }
            Method::Publickey { key } => {
                session.send(&self.request(publickey(&key)?))?;

                self.state = State::Offering { key };
            }
        }

        Ok(())
    }

    /// Sign and send the `publickey` request, once the key is acceptable to the server.
    fn signed(&self, session: &mut Session<Client>, key: &PrivateKey) -> Result<()> {
        let mut request = self.request(publickey(key)?);

        let data = PublickeySignedData::new(session.session_id().unwrap_or_default(), &request)
            .ok_or(Error::UnexpectedMessage(AuthPkOk::MAGIC))?
            .encode()?;
        let signature: Signature = Signer::try_sign(key, &data).map_err(sesh::Error::from)?;

        if let AuthMethod::Publickey {
            signature: slot, ..
        } = &mut request.method
        {
            *slot = Some(signature.to_vec().into());
        }

        session.send(&request)?;

        Ok(())
    }
}

/// The unsigned `publickey` method for the `key`.
fn publickey(key: &PrivateKey) -> Result<AuthMethod> {
    Ok(AuthMethod::Publickey {
        algorithm: algorithm(key).as_str().as_bytes().to_vec().into(),
        blob: key
            .public_key()
            .to_bytes()
            .map_err(sesh::Error::from)?
            .into(),
        signature: None,
    })
}

/// The signature algorithm to authenticate with the `key`, RSA keys signing with `rsa-sha2-512`.
fn algorithm(key: &PrivateKey) -> Algorithm {
    match key.algorithm() {
        Algorithm::Rsa { .. } => Algorithm::Rsa {
            hash: Some(HashAlg::Sha512),
        },
        other => other,
    }
}

impl Authenticator<Client> for Auth {
    fn start(&mut self, session: &mut Session<Client>) -> Result<()> {
        if let State::Idle = self.state {
            session.send(&ServiceRequest {
                service_name: SERVICE_NAME.into(),
            })?;

            self.state = State::Requested;
        }

        Ok(())
    }

    fn handle(&mut self, session: &mut Session<Client>, packet: &Packet) -> Result<Option<Event>> {
        let magic = packet.magic().unwrap_or_default();

        match (std::mem::take(&mut self.state), magic) {
            (State::Requested, ServiceAccept::MAGIC) => {
                let accept: ServiceAccept = packet.to()?;
                if &*accept.service_name != SERVICE_NAME {
                    return Err(sesh::Error::UnknownService.into());
                }

                session.send(&self.request(AuthMethod::None))?;
                self.state = State::Attempting;

                Ok(None)
            }
            (state, AuthBanner::MAGIC) => {
                self.state = state;

                let banner: AuthBanner = packet.to()?;

                Ok(Some(Event::Banner(banner.message.to_string())))
            }
            (State::Attempting | State::Offering { .. }, AuthFailure::MAGIC) => {
                self.next(session, packet.to()?)?;

                Ok(None)
            }
            (State::Offering { key }, AuthPkOk::MAGIC) => {
                self.signed(session, &key)?;
                self.state = State::Attempting;

                Ok(None)
            }
            (State::Attempting | State::Offering { .. }, AuthSuccess::MAGIC) => {
                tracing::debug!("Authenticated as `{}`", self.username);

                self.state = State::Authenticated;

                Ok(Some(Event::Authenticated {
                    username: self.username.clone(),
                }))
            }
            (state, magic) => {
                self.state = state;

                Err(Error::UnexpectedMessage(magic))
            }
        }
    }

    fn is_authenticated(&self) -> bool {
        matches!(self.state, State::Authenticated)
    }
}
