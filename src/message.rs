//! Application message contract.
//!
//! Message schemas only ever see the payload region of a packet. Framing,
//! CRC and collation are handled below them, so a message that writes
//! itself into a [`PacketWriter`] can be sent standalone or bundled into a
//! collated packet without change.
//!
//! # Example
//!
//! ```
//! use tes_wire::message::Message;
//! use tes_wire::protocol::{PacketReader, PacketWriter};
//! use tes_wire::Result;
//!
//! #[derive(Debug, PartialEq)]
//! struct FrameEnd {
//!     frame: u32,
//! }
//!
//! impl Message for FrameEnd {
//!     fn write(&self, writer: &mut PacketWriter) -> Result<()> {
//!         writer.write(self.frame)
//!     }
//!
//!     fn read(reader: &mut PacketReader) -> Result<Self> {
//!         Ok(Self { frame: reader.read()? })
//!     }
//! }
//!
//! let packet = FrameEnd { frame: 12 }.to_packet(2, 1).unwrap();
//! assert_eq!(FrameEnd::from_packet(&packet).unwrap(), FrameEnd { frame: 12 });
//! ```

use crate::error::Result;
use crate::protocol::{Packet, PacketReader, PacketWriter};

/// A payload that can serialise itself into and out of a packet.
pub trait Message: Sized {
    /// Append this message's fields to `writer`.
    ///
    /// Running out of space is `BufferOverflow`, which the writer reports
    /// before anything is truncated.
    fn write(&self, writer: &mut PacketWriter) -> Result<()>;

    /// Decode a message from the payload cursor.
    fn read(reader: &mut PacketReader) -> Result<Self>;

    /// Build a finalised, CRC-carrying packet holding this message.
    fn to_packet(&self, routing_id: u16, message_id: u16) -> Result<Packet> {
        let mut writer = PacketWriter::new(routing_id, message_id);
        self.write(&mut writer)?;
        writer.finalise()
    }

    /// Decode a message from the start of a packet's payload.
    fn from_packet(packet: &Packet) -> Result<Self> {
        Self::read(&mut packet.reader())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TesError;
    use crate::protocol::routing;

    #[derive(Debug, PartialEq)]
    struct Control {
        flags: u32,
        value32: u32,
        value64: u64,
    }

    impl Message for Control {
        fn write(&self, writer: &mut PacketWriter) -> Result<()> {
            writer.write(self.flags)?;
            writer.write(self.value32)?;
            writer.write(self.value64)
        }

        fn read(reader: &mut PacketReader) -> Result<Self> {
            Ok(Self {
                flags: reader.read()?,
                value32: reader.read()?,
                value64: reader.read()?,
            })
        }
    }

    #[test]
    fn test_message_packet_roundtrip() {
        let message = Control {
            flags: 1,
            value32: 33,
            value64: u64::MAX - 1,
        };
        let packet = message.to_packet(routing::CONTROL, 4).unwrap();

        assert_eq!(packet.routing_id(), routing::CONTROL);
        assert_eq!(packet.message_id(), 4);
        assert_eq!(packet.payload_len(), 16);
        assert_eq!(Control::from_packet(&packet).unwrap(), message);
    }

    #[test]
    fn test_message_read_short_payload() {
        let packet = Packet::new(routing::CONTROL, 4, vec![0u8; 10]).unwrap();
        let result = Control::from_packet(&packet);
        assert!(matches!(result, Err(TesError::InsufficientData { .. })));
    }

    #[test]
    fn test_message_write_overflow() {
        let mut writer = PacketWriter::with_limit(routing::CONTROL, 4, 12);
        let message = Control {
            flags: 0,
            value32: 0,
            value64: 0,
        };
        assert!(matches!(
            message.write(&mut writer),
            Err(TesError::BufferOverflow { .. })
        ));
    }
}
