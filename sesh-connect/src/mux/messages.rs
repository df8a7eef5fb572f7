use binrw::binrw;
use sesh::msg::{connect, Packet, PacketExt};

use crate::{Error, Result};

/// The purpose of this macro is to automatically document variants
/// and link to the underlying item documentation.
macro_rules! message {
    ($( #[$meta:meta] )* $vis:vis enum $enum:ident { $( $name:ident($path:path) ),+ $(,)? }) => {
        $( #[$meta] )*
        #[binrw]
        #[derive(Debug, Clone)]
        #[brw(big)]
        $vis enum $enum {
            $(
                #[doc = concat!("See [`", stringify!($path), "`] for more details.")]
                $name($path)
            ),+
        }
    };
}

message! {
    /// The messages of the connection protocol, as dispatched by the multiplexer.
    pub enum Inbound {
        GlobalRequest(connect::GlobalRequest),
        RequestSuccess(connect::RequestSuccess),
        RequestFailure(connect::RequestFailure),

        Open(connect::ChannelOpen),
        OpenConfirmation(connect::ChannelOpenConfirmation),
        OpenFailure(connect::ChannelOpenFailure),

        WindowAdjust(connect::ChannelWindowAdjust),
        Data(Data),
        Eof(connect::ChannelEof),
        Close(connect::ChannelClose),

        Control(Control),
    }
}

message! {
    /// A channel request, or the reply to one.
    pub enum Control {
        Request(connect::ChannelRequest),
        Success(connect::ChannelSuccess),
        Failure(connect::ChannelFailure),
    }
}

message! {
    /// Data flowing on a channel.
    pub enum Data {
        Data(connect::ChannelData),
        ExtendedData(connect::ChannelExtendedData),
    }
}

/// The message numbers of the connection protocol.
const CONNECTION_MESSAGES: std::ops::RangeInclusive<u8> = 80..=127;

impl TryFrom<&Packet> for Inbound {
    type Error = Error;

    fn try_from(packet: &Packet) -> Result<Self> {
        let magic = packet.magic().unwrap_or_default();
        if !CONNECTION_MESSAGES.contains(&magic) {
            return Err(Error::UnexpectedMessage(magic));
        }

        packet.read::<Self>().map_err(|err| {
            tracing::debug!("Unparseable message #{magic} from peer: {err}");

            Error::UnexpectedMessage(magic)
        })
    }
}

impl Control {
    pub fn recipient_channel(&self) -> u32 {
        let (Self::Request(connect::ChannelRequest {
            recipient_channel, ..
        })
        | Self::Success(connect::ChannelSuccess { recipient_channel })
        | Self::Failure(connect::ChannelFailure { recipient_channel })) = self;

        *recipient_channel
    }
}

impl Data {
    pub fn recipient_channel(&self) -> u32 {
        let (Self::Data(connect::ChannelData {
            recipient_channel, ..
        })
        | Self::ExtendedData(connect::ChannelExtendedData {
            recipient_channel, ..
        })) = self;

        *recipient_channel
    }

    pub fn data_type(&self) -> Option<u32> {
        match self {
            Self::Data(_) => None,
            Self::ExtendedData(connect::ChannelExtendedData { data_type, .. }) => {
                Some(code(data_type))
            }
        }
    }

    pub fn data(self) -> Vec<u8> {
        let (Self::Data(connect::ChannelData { data, .. })
        | Self::ExtendedData(connect::ChannelExtendedData { data, .. })) = self;

        data.into_vec()
    }
}

/// The numeric code of an extended data type.
pub fn code(data_type: &connect::ChannelExtendedDataType) -> u32 {
    match data_type {
        connect::ChannelExtendedDataType::Stderr => 1,
        connect::ChannelExtendedDataType::Other(code) => *code,
    }
}

/// The extended data type for a numeric `code`.
pub fn data_type(code: u32) -> connect::ChannelExtendedDataType {
    match code {
        1 => connect::ChannelExtendedDataType::Stderr,
        code => connect::ChannelExtendedDataType::Other(code),
    }
}

#[cfg(test)]
mod tests {
    use sesh::msg::encode;

    use super::*;

    #[test]
    fn dispatches_by_message_number() {
        let packet = Packet {
            payload: encode(&connect::ChannelExtendedData {
                recipient_channel: 2,
                data_type: data_type(1),
                data: b"oops".to_vec().into(),
            })
            .unwrap(),
        };

        let Ok(Inbound::Data(data)) = Inbound::try_from(&packet) else {
            panic!("Expected extended data");
        };
        assert_eq!(data.recipient_channel(), 2);
        assert_eq!(data.data_type(), Some(1));
        assert_eq!(data.data(), b"oops");
    }

    #[test]
    fn nested_controls_are_reached() {
        let packet = Packet {
            payload: encode(&connect::ChannelFailure {
                recipient_channel: 7,
            })
            .unwrap(),
        };

        let Ok(Inbound::Control(control)) = Inbound::try_from(&packet) else {
            panic!("Expected a channel control message");
        };
        assert!(matches!(control, Control::Failure(_)));
        assert_eq!(control.recipient_channel(), 7);
    }

    #[test]
    fn refuses_foreign_messages() {
        let packet = Packet { payload: vec![52] };

        assert!(matches!(
            Inbound::try_from(&packet),
            Err(Error::UnexpectedMessage(52))
        ));
    }

    #[test]
    fn refuses_truncated_messages() {
        let packet = Packet {
            payload: vec![94, 0, 0],
        };

        assert!(matches!(
            Inbound::try_from(&packet),
            Err(Error::UnexpectedMessage(94))
        ));
    }

    #[test]
    fn extended_data_codes() {
        assert_eq!(code(&data_type(1)), 1);
        assert_eq!(code(&data_type(0xfe000000)), 0xfe000000);
    }
}
