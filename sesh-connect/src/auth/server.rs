//! Server-side authentication mechanics.

use binrw::meta::ReadMagic;
use sesh::{
    msg::{
        arch::NameList,
        trans::{ServiceAccept, ServiceRequest},
        userauth::{
            AuthBanner, AuthFailure, AuthMethod, AuthPkOk, AuthRequest, AuthRequestHeader,
            AuthSuccess, PublickeySignedData,
        },
        Packet, PacketExt,
    },
    side::server::Server,
    Session,
};
use signature::Verifier;
use ssh_key::{PublicKey, Signature};

use super::{private::Authenticator, Methods, CONNECTION_SERVICE_NAME, SERVICE_NAME};
use crate::{Error, Event, Result};

/// The default maximum number of authentication attempts per session.
pub const MAX_ATTEMPTS: usize = 20;

/// An authentication attempt from the client, to be accepted or rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt<'a> {
    /// The `none` method.
    None,

    /// The `password` method.
    Password {
        /// The password.
        password: &'a str,

        /// The new password, when changing it.
        new: Option<&'a str>,
    },

    /// The `publickey` method.
    Publickey {
        /// The public key of the client.
        key: &'a PublicKey,

        /// Whether the client proved it holds the private key,
        /// or only asked whether the key is acceptable.
        signed: bool,
    },
}

/// The response to an authentication [`Attempt`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    /// _Accept_ the authentication attempt.
    Accept,

    /// _Reject_ the authentication attempt.
    Reject,
}

/// A handler deciding the outcome of authentication attempts.
pub trait Handler: Send {
    /// Decide whether `username` is authenticated by the `attempt`.
    fn on_attempt(&mut self, username: &str, attempt: Attempt<'_>) -> Response;
}

impl<F: FnMut(&str, Attempt<'_>) -> Response + Send> Handler for F {
    fn on_attempt(&mut self, username: &str, attempt: Attempt<'_>) -> Response {
        (self)(username, attempt)
    }
}

#[derive(Debug)]
enum State {
    Unauthorized,
    Transient,
    Authorized,
}

/// The authentication procedure for server-side sessions.
pub struct Auth {
    state: State,

    banner: Option<String>,
    methods: Methods,
    max_attempts: usize,
    attempts: usize,
    handler: Box<dyn Handler>,
}

impl Auth {
    /// Create an [`Auth`] procedure from the allowed `methods` and an authentication `handler`.
    pub fn new(methods: Methods, handler: impl Handler + 'static) -> Self {
        Self {
            state: State::Unauthorized,
            banner: None,
            methods: methods | Methods::NONE,
            max_attempts: MAX_ATTEMPTS,
            attempts: 0,
            handler: Box::new(handler),
        }
    }

    /// Send the `banner` to the client when it requests the authentication.
    pub fn banner(mut self, banner: impl Into<String>) -> Self {
        self.banner = Some(banner.into());

        self
    }

    /// Disconnect the client after `max_attempts` attempts.
    pub fn max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts;

        self
    }

    fn failure(&self, session: &mut Session<Server>) -> Result<Option<Event>> {
        session.send(&AuthFailure {
            continue_with: NameList::new(&self.methods.names().collect::<Vec<_>>()),
            partial_success: false.into(),
        })?;

        Ok(None)
    }

    fn decide(
        &mut self,
        session: &mut Session<Server>,
        username: String,
        attempt: Attempt<'_>,
    ) -> Result<Option<Event>> {
        match self.handler.on_attempt(&username, attempt) {
            Response::Accept => {
                tracing::debug!("Authenticated `{username}`");

                session.send(&AuthSuccess)?;
                self.state = State::Authorized;

                Ok(Some(Event::Authenticated { username }))
            }
            Response::Reject => self.failure(session),
        }
    }

    /// Count an attempt for the `service_name`, refusing it past the limit.
    fn admit(&mut self, service_name: &str) -> Result<()> {
        if service_name != CONNECTION_SERVICE_NAME {
            tracing::warn!("Unknown service `{service_name}` in authentication request");

            return Err(sesh::Error::UnknownService.into());
        }

        self.attempts += 1;
        if self.attempts > self.max_attempts {
            return Err(Error::AuthExhausted);
        }

        Ok(())
    }

    fn on_request(&mut self, session: &mut Session<Server>, packet: &Packet) -> Result<Option<Event>> {
        let request: AuthRequest = match packet.to() {
            Ok(request) => request,
            Err(_) => {
                let header: AuthRequestHeader = packet.to()?;
                self.admit(&header.service_name)?;

                tracing::debug!("Unsupported method `{}` from the client", &*header.method);

                return self.failure(session);
            }
        };
        self.admit(&request.service_name)?;

        let username = request.username.to_string();

        match &request.method {
            AuthMethod::None => self.decide(session, username, Attempt::None),
            AuthMethod::Password { password, new } if self.methods.contains(Methods::PASSWORD) => {
                let attempt = Attempt::Password {
                    password,
                    new: new.as_deref(),
                };

                self.decide(session, username, attempt)
            }
            AuthMethod::Publickey {
                algorithm,
                blob,
                signature,
            } if self.methods.contains(Methods::PUBLICKEY) => {
                let Ok(key) = PublicKey::from_bytes(blob) else {
                    tracing::debug!("Unparseable public key from the client");

                    return self.failure(session);
                };

                match signature {
                    None => {
                        let attempt = Attempt::Publickey {
                            key: &key,
                            signed: false,
                        };

                        match self.handler.on_attempt(&username, attempt) {
                            Response::Accept => {
                                session.send(&AuthPkOk {
                                    algorithm: algorithm.clone(),
                                    blob: blob.clone(),
                                })?;

                                Ok(None)
                            }
                            Response::Reject => self.failure(session),
                        }
                    }
                    Some(signature) => {
                        let data = PublickeySignedData::new(
                            session.session_id().unwrap_or_default(),
                            &request,
                        )
                        .map(|data| data.encode())
                        .transpose()?
                        .unwrap_or_default();

                        let verified = Signature::try_from(&**signature)
                            .ok()
                            .filter(|signature| {
                                signature.algorithm().as_str().as_bytes() == &**algorithm
                            })
                            .is_some_and(|signature| {
                                Verifier::verify(&key, &data, &signature).is_ok()
                            });

                        if verified {
                            let attempt = Attempt::Publickey {
                                key: &key,
                                signed: true,
                            };

                            self.decide(session, username, attempt)
                        } else {
                            tracing::debug!("Invalid signature for the `publickey` method");

                            self.failure(session)
                        }
                    }
                }
            }
            _ => self.failure(session),
        }
    }
}

impl std::fmt::Debug for Auth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Auth")
            .field("state", &self.state)
            .field("methods", &self.methods)
            .field("attempts", &self.attempts)
            .finish_non_exhaustive()
    }
}

impl Authenticator<Server> for Auth {
    fn start(&mut self, _: &mut Session<Server>) -> Result<()> {
        Ok(())
    }

    fn handle(&mut self, session: &mut Session<Server>, packet: &Packet) -> Result<Option<Event>> {
        let magic = packet.magic().unwrap_or_default();

        match magic {
            ServiceRequest::MAGIC if matches!(self.state, State::Unauthorized) => {
                let ServiceRequest { service_name } = packet.to()?;
                if &*service_name != SERVICE_NAME {
                    tracing::warn!(
                        "Service `{}` requested before authentication",
                        &*service_name
                    );

                    return Err(sesh::Error::UnknownService.into());
                }

                session.send(&ServiceAccept { service_name })?;

                if let Some(message) = self.banner.take() {
                    session.send(&AuthBanner {
                        message: message.into(),
                        language: Default::default(),
                    })?;
                }

                self.state = State::Transient;

                Ok(None)
            }
            AuthRequest::MAGIC if matches!(self.state, State::Transient) => {
                self.on_request(session, packet)
            }
            AuthRequest::MAGIC if matches!(self.state, State::Authorized) => {
                tracing::debug!("Ignoring authentication request after success");

                Ok(None)
            }
            magic => Err(Error::UnexpectedMessage(magic)),
        }
    }

    fn is_authenticated(&self) -> bool {
        matches!(self.state, State::Authorized)
    }
}
