//! The station announcement datagram.
//!
//! 21 bytes, network byte order: port (u16), station type (u32), then an
//! optional NUL-padded UTF-8 name of up to 15 bytes. Decoding is a pure
//! function of those bytes; it never looks at the sender.

use crate::errors::Error;
use crate::station::{Station, StationType};
use crate::wire::{Reader, Writer};

pub const PORT_SIZE: usize = 2;
pub const TYPE_SIZE: usize = 4;
pub const NAME_SIZE: usize = 15;
pub const PACKET_SIZE: usize = PORT_SIZE + TYPE_SIZE + NAME_SIZE;

/// Decoded announcement contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub kind: StationType,
    pub port: u16,
    pub name: Option<String>,
}

impl Packet {
    /// Decodes one announcement. Rejects wrong lengths, unknown station
    /// types and name bytes that are not UTF-8.
    pub fn decode(data: &[u8]) -> Result<Self, Error> {
        if data.len() != PACKET_SIZE {
            return Err(Error::InvalidPacketLength(data.len()));
        }

        let mut r = Reader::new(data);
        let port = r.u16_be();
        let raw_kind = r.u32_be();

        let kind = StationType::from_wire(raw_kind);
        if kind == StationType::Unknown {
            return Err(Error::UnknownStationType(raw_kind));
        }

        let name_field: [u8; NAME_SIZE] = r.bytes();
        let name = if name_field.iter().all(|b| *b == 0) {
            None
        } else {
            let trimmed = match name_field.iter().position(|b| *b == 0) {
                Some(end) => &name_field[..end],
                None => &name_field[..],
            };
            match std::str::from_utf8(trimmed) {
                Ok(s) => Some(s.to_string()),
                Err(_) => return Err(Error::InvalidStation),
            }
        };

        Ok(Self { kind, port, name })
    }

    /// Encodes the announcement; the inverse of [Packet::decode]. Names
    /// longer than 15 bytes are truncated at a character boundary.
    pub fn encode(&self) -> [u8; PACKET_SIZE] {
        let mut out = [0u8; PACKET_SIZE];
        let mut w = Writer::new(&mut out);
        w.u16_be(self.port);
        w.u32_be(self.kind.to_wire());

        if let Some(name) = &self.name {
            let mut end = name.len().min(NAME_SIZE);
            while !name.is_char_boundary(end) {
                end -= 1;
            }
            w.bytes(name[..end].as_bytes());
        }

        out
    }

    /// Builds the admitted [Station] from this packet and the datagram's
    /// sender address.
    pub fn into_station(self, address: impl Into<String>) -> Station {
        let st = Station::new(self.kind, address, self.port);
        match self.name {
            Some(name) => st.with_name(name),
            None => st,
        }
    }
}

#[cfg(test)]
mod test {
    use super::{Packet, PACKET_SIZE};
    use crate::errors::Error;
    use crate::station::StationType;

    fn announcement(port: u16, kind: u32, name: &[u8]) -> Vec<u8> {
        let mut data = Vec::with_capacity(PACKET_SIZE);
        data.extend_from_slice(&port.to_be_bytes());
        data.extend_from_slice(&kind.to_be_bytes());
        let mut field = [0u8; 15];
        field[..name.len()].copy_from_slice(name);
        data.extend_from_slice(&field);
        data
    }

    #[test]
    fn decodes_named_rover() {
        let data = announcement(1234, 2, b"rover-01");
        let packet = Packet::decode(&data).unwrap();
        assert_eq!(packet.kind, StationType::Rover);
        assert_eq!(packet.port, 1234);
        assert_eq!(packet.name.as_deref(), Some("rover-01"));

        let st = packet.into_station("192.0.2.7");
        assert_eq!(st.kind, StationType::Rover);
        assert_eq!(st.address, "192.0.2.7");
        assert_eq!(st.port, 1234);
        assert_eq!(st.name.as_deref(), Some("rover-01"));
    }

    #[test]
    fn all_zero_name_is_absent() {
        let data = announcement(1234, 1, b"");
        let packet = Packet::decode(&data).unwrap();
        assert_eq!(packet.kind, StationType::Base);
        assert!(packet.name.is_none());
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(matches!(
            Packet::decode(&[0u8; 6]),
            Err(Error::InvalidPacketLength(6))
        ));
        assert!(matches!(
            Packet::decode(&[0u8; 22]),
            Err(Error::InvalidPacketLength(22))
        ));
    }

    #[test]
    fn rejects_unknown_type() {
        let data = announcement(1234, 3, b"x");
        assert!(matches!(
            Packet::decode(&data),
            Err(Error::UnknownStationType(3))
        ));

        let data = announcement(1234, 0, b"");
        assert!(matches!(
            Packet::decode(&data),
            Err(Error::UnknownStationType(0))
        ));
    }

    #[test]
    fn rejects_invalid_utf8_name() {
        let data = announcement(1234, 2, &[0xFF, 0xFE]);
        assert!(matches!(Packet::decode(&data), Err(Error::InvalidStation)));
    }

    #[test]
    fn decode_is_pure() {
        let data = announcement(9000, 2, b"same");
        assert_eq!(Packet::decode(&data).unwrap(), Packet::decode(&data).unwrap());
    }

    #[test]
    fn encode_decode_round_trip() {
        let packet = Packet {
            kind: StationType::Base,
            port: 2101,
            name: Some("bench-roof".to_string()),
        };
        assert_eq!(Packet::decode(&packet.encode()).unwrap(), packet);
    }
}
