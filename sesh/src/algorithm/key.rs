pub use ssh_key::Algorithm as Key;

use crate::{
    msg::{arch::NameList, trans::KexInit},
    Error,
};

use super::Negociate;

impl Negociate for Key {
    const ERR: Error = Error::NoCommonKey;

    fn field(kex: &KexInit) -> &NameList {
        &kex.server_host_key_algorithms
    }
}

/// The signature algorithm a host key is advertised with.
///
/// RSA keys are only offered with `rsa-sha2-512` signatures.
pub(crate) fn advertised(key: &ssh_key::PrivateKey) -> Key {
    match key.algorithm() {
        Key::Rsa { .. } => Key::Rsa {
            hash: Some(ssh_key::HashAlg::Sha512),
        },
        other => other,
    }
}
