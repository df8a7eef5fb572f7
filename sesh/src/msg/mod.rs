//! Messages of the SSH protocol, grouped by layer.
//!
//! The messages are the ones from [`ssh_packet`], completed with the
//! extensions and the catch-all variants it doesn't carry.

use std::fmt;

use binrw::{
    meta::{ReadEndian, ReadMagic, WriteEndian},
    BinRead, BinWrite,
};

use crate::{Error, Result};

#[doc(no_inline)]
pub use ssh_packet::{arch, Packet};

pub mod connect;
pub mod trans;
pub mod userauth;

/// A message of the protocol, identified by its first byte.
pub trait Message:
    for<'r> BinRead<Args<'r> = ()>
    + ReadEndian
    + for<'w> BinWrite<Args<'w> = ()>
    + WriteEndian
    + ReadMagic<MagicType = u8>
    + fmt::Debug
{
}

impl<T> Message for T where
    T: for<'r> BinRead<Args<'r> = ()>
        + ReadEndian
        + for<'w> BinWrite<Args<'w> = ()>
        + WriteEndian
        + ReadMagic<MagicType = u8>
        + fmt::Debug
{
}

/// Serialize a `message` into a payload, prefixed with its message number.
pub fn encode<T: Message>(message: &T) -> Result<Vec<u8>> {
    Ok(Packet::write(message)?.payload)
}

/// Typed access to the payload of a [`Packet`].
pub trait PacketExt {
    /// The message number of the packet, if not empty.
    fn magic(&self) -> Option<u8>;

    /// Whether the packet holds a message of type `T`.
    fn is<T: Message>(&self) -> bool;

    /// Deserialize the packet as a message of type `T`.
    fn to<T: Message>(&self) -> Result<T>;
}

impl PacketExt for Packet {
    fn magic(&self) -> Option<u8> {
        self.payload.first().copied()
    }

    fn is<T: Message>(&self) -> bool {
        self.magic() == Some(<T as ReadMagic>::MAGIC)
    }

    fn to<T: Message>(&self) -> Result<T> {
        match self.magic() {
            Some(magic) if magic == <T as ReadMagic>::MAGIC => Ok(self.read::<T>()?),
            Some(magic) => Err(Error::UnexpectedMessage(magic)),
            None => Err(Error::Malformed("empty payload")),
        }
    }
}

/// Encode the big-endian `magnitude` of a non-negative integer as an
/// [`arch::MpInt`], without its superfluous leading zeroes.
pub fn mpint(magnitude: &[u8]) -> arch::MpInt {
    let start = magnitude
        .iter()
        .position(|&byte| byte != 0)
        .unwrap_or(magnitude.len());

    arch::MpInt::new(magnitude[start..].to_vec())
}

/// The big-endian magnitude of a non-negative [`arch::MpInt`].
pub fn magnitude(value: &arch::MpInt) -> Result<&[u8]> {
    match value.first() {
        Some(byte) if byte & 0x80 != 0 => Err(Error::Malformed("negative mpint")),
        _ => {
            let start = value.iter().position(|&byte| byte != 0).unwrap_or(value.len());

            Ok(&value[start..])
        }
    }
}

#[cfg(test)]
mod tests {
    use binrw::BinReaderExt;

    use super::{trans::Ignore, *};

    #[test]
    fn packet_rejects_other_messages() {
        let packet = Packet {
            payload: encode(&Ignore {
                data: b"filler".to_vec().into(),
            })
            .unwrap(),
        };

        assert!(packet.is::<Ignore>());
        assert!(matches!(
            packet.to::<trans::NewKeys>(),
            Err(Error::UnexpectedMessage(2))
        ));
        assert_eq!(&*packet.to::<Ignore>().unwrap().data, b"filler");
        assert!(matches!(
            Packet { payload: vec![] }.to::<Ignore>(),
            Err(Error::Malformed(_))
        ));
    }

    #[test]
    fn mpint_is_minimal_and_positive() {
        assert_eq!(&*mpint(&[0, 0, 0x12, 0x34]), &[0x12, 0x34]);
        assert_eq!(&*mpint(&[0, 0x80]), &[0, 0x80]);
        assert!(mpint(&[0, 0]).is_empty());

        assert_eq!(magnitude(&mpint(&[0xff, 1])).unwrap(), &[0xff, 1]);

        let negative: arch::MpInt = std::io::Cursor::new([0, 0, 0, 1, 0x80]).read_be().unwrap();
        assert!(matches!(magnitude(&negative), Err(Error::Malformed(_))));
    }
}
