//! ICMP messages (RFC 792). These are only ever decoded for display; the engine never sends them.

use crate::{checksum, read_u16, MalformedPacket};

const ICMP_HEADER_LEN: usize = 4;

/// The reason given by a "destination unreachable" message.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Unreachable {
    Network,
    Host,
    Protocol,
    Port,
    Other(u8),
}

impl From<u8> for Unreachable {
    fn from(code: u8) -> Self {
        match code {
            0 => Self::Network,
            1 => Self::Host,
            2 => Self::Protocol,
            3 => Self::Port,
            x => Self::Other(x),
        }
    }
}

impl std::fmt::Display for Unreachable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Network => write!(f, "network unreachable"),
            Self::Host => write!(f, "host unreachable"),
            Self::Protocol => write!(f, "protocol unreachable"),
            Self::Port => write!(f, "port unreachable"),
            Self::Other(code) => write!(f, "code {code}"),
        }
    }
}

/// An ICMP message classified by its type and code.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum IcmpMessage {
    EchoReply,
    DestinationUnreachable(Unreachable),
    EchoRequest,
    TimeExceeded,
    ParameterProblem,
    Other { kind: u8, code: u8 },
}

impl IcmpMessage {
    pub fn classify(kind: u8, code: u8) -> Self {
        match kind {
            0 => Self::EchoReply,
            3 => Self::DestinationUnreachable(Unreachable::from(code)),
            8 => Self::EchoRequest,
            11 => Self::TimeExceeded,
            12 => Self::ParameterProblem,
            kind => Self::Other { kind, code },
        }
    }
}

impl std::fmt::Display for IcmpMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EchoReply => write!(f, "echo reply"),
            Self::DestinationUnreachable(reason) => {
                write!(f, "destination unreachable: {reason}")
            }
            Self::EchoRequest => write!(f, "echo request"),
            Self::TimeExceeded => write!(f, "time exceeded"),
            Self::ParameterProblem => write!(f, "parameter problem"),
            Self::Other { kind, code } => write!(f, "type {kind} code {code}"),
        }
    }
}

/// A read-only view of an ICMP message.
#[derive(Copy, Clone, Debug)]
pub struct IcmpReader<T> {
    buffer: T,
}

impl<T: AsRef<[u8]>> IcmpReader<T> {
    pub fn parse(buffer: T) -> Result<Self, MalformedPacket> {
        if buffer.as_ref().len() < ICMP_HEADER_LEN {
            return Err(MalformedPacket::Truncated);
        }
        Ok(Self { buffer })
    }

    fn buf(&self) -> &[u8] {
        self.buffer.as_ref()
    }

    /// The ICMP "type" field.
    pub fn kind(&self) -> u8 {
        self.buf()[0]
    }

    pub fn code(&self) -> u8 {
        self.buf()[1]
    }

    pub fn checksum(&self) -> u16 {
        read_u16(&self.buf()[2..4])
    }

    pub fn message(&self) -> IcmpMessage {
        IcmpMessage::classify(self.kind(), self.code())
    }

    /// The bytes following the type, code and checksum fields.
    pub fn body(&self) -> &[u8] {
        &self.buf()[ICMP_HEADER_LEN..]
    }

    /// The ICMP checksum covers the whole message with no pseudo-header.
    pub fn verify_checksum(&self) -> bool {
        checksum::verify(self.buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify() {
        assert_eq!(IcmpMessage::classify(0, 0), IcmpMessage::EchoReply);
        assert_eq!(
            IcmpMessage::classify(3, 3),
            IcmpMessage::DestinationUnreachable(Unreachable::Port)
        );
        assert_eq!(
            IcmpMessage::classify(3, 13),
            IcmpMessage::DestinationUnreachable(Unreachable::Other(13))
        );
        assert_eq!(IcmpMessage::classify(8, 0), IcmpMessage::EchoRequest);
        assert_eq!(IcmpMessage::classify(11, 1), IcmpMessage::TimeExceeded);
        assert_eq!(IcmpMessage::classify(12, 0), IcmpMessage::ParameterProblem);
        assert_eq!(
            IcmpMessage::classify(42, 7),
            IcmpMessage::Other { kind: 42, code: 7 }
        );
    }

    #[test]
    fn display() {
        assert_eq!(
            IcmpMessage::classify(3, 3).to_string(),
            "destination unreachable: port unreachable"
        );
        assert_eq!(
            IcmpMessage::classify(3, 1).to_string(),
            "destination unreachable: host unreachable"
        );
        assert_eq!(IcmpMessage::classify(8, 0).to_string(), "echo request");
    }

    #[test]
    fn parse_and_verify() {
        // echo request, id 1, seq 1, payload "hi"
        let mut msg = [8u8, 0, 0, 0, 0, 1, 0, 1, b'h', b'i'];
        let sum = !checksum::ones_complement_sum(&msg);
        msg[2..4].copy_from_slice(&sum.to_be_bytes());

        let icmp = IcmpReader::parse(&msg[..]).unwrap();
        assert_eq!(icmp.message(), IcmpMessage::EchoRequest);
        assert_eq!(icmp.body(), &[0, 1, 0, 1, b'h', b'i']);
        assert!(icmp.verify_checksum());

        msg[9] = b'o';
        assert!(!IcmpReader::parse(&msg[..]).unwrap().verify_checksum());
    }

    #[test]
    fn parse_short() {
        assert_eq!(
            IcmpReader::parse(&[3u8, 3, 0][..]).unwrap_err(),
            MalformedPacket::Truncated
        );
    }
}
