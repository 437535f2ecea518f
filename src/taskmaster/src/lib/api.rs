use std::convert::TryFrom;
use std::io::{Read, Write};

use libq::io::{read_u32, write_u32, Endianness};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::error::{MasterError, ProtocolError};

/// Size of the fixed header: kind + total length
pub const HEADER_LENGTH: u32 = 8;

/// Largest message (header included) either side will accept
pub const MAX_MESSAGE_LENGTH: u32 = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum MessageKind {
    Start = 0,
    Stop = 1,
    Restart = 2,
    Status = 3,
    ReloadConfig = 4,
    Exit = 5,
    ReplyOk = 6,
    ReplyError = 7,
}

impl MessageKind {
    pub fn is_request(&self) -> bool {
        return match self {
            MessageKind::ReplyOk | MessageKind::ReplyError => false,
            _ => true,
        };
    }
}

#[derive(Debug)]
pub struct MessageHeader {
    pub kind: MessageKind,
    pub length: u32,
}

impl MessageHeader {
    pub fn read<T: Read>(reader: &mut T) -> Result<MessageHeader, ProtocolError> {
        let endian = &Endianness::Little;
        let raw_kind = read_u32(reader, endian)?;
        let length = read_u32(reader, endian)?;

        let kind = MessageKind::try_from(raw_kind).map_err(|_| ProtocolError::UnknownKind(raw_kind))?;
        if length <= HEADER_LENGTH {
            return Err(ProtocolError::Malformed("message has no payload"));
        }

        if length > MAX_MESSAGE_LENGTH {
            return Err(ProtocolError::Malformed("message too long"));
        }

        return Ok(MessageHeader {
            kind: kind,
            length: length,
        });
    }
}

/// One request or reply: a kind and a single line of text
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub kind: MessageKind,
    pub payload: String,
}

impl Message {
    pub fn new<S: Into<String>>(kind: MessageKind, payload: S) -> Message {
        return Message {
            kind: kind,
            payload: payload.into(),
        };
    }

    /// The reply that carries the outcome of a master operation
    pub fn reply(result: Result<String, MasterError>) -> Message {
        return match result {
            Ok(text) => Message::new(MessageKind::ReplyOk, text),
            Err(err) => Message::new(MessageKind::ReplyError, err.to_string()),
        };
    }

    pub fn read<T: Read>(reader: &mut T) -> Result<Message, ProtocolError> {
        let header = MessageHeader::read(reader)?;

        let mut payload = vec![0; (header.length - HEADER_LENGTH) as usize];
        reader.read_exact(&mut payload)?;

        match payload.pop() {
            Some(0) => {}
            _ => {
                return Err(ProtocolError::Malformed("payload is not NUL terminated"));
            }
        }

        if payload.contains(&0) {
            return Err(ProtocolError::Malformed("payload contains a NUL byte"));
        }

        let text = String::from_utf8(payload).map_err(|_| ProtocolError::Malformed("payload is not valid UTF-8"))?;
        return Ok(Message::new(header.kind, text));
    }

    pub fn write<T: Write>(&self, writer: &mut T) -> Result<(), ProtocolError> {
        if self.payload.as_bytes().contains(&0) {
            return Err(ProtocolError::Malformed("payload contains a NUL byte"));
        }

        let length = HEADER_LENGTH as usize + self.payload.len() + 1;
        if length > MAX_MESSAGE_LENGTH as usize {
            return Err(ProtocolError::Malformed("message too long"));
        }

        let mut buf = Vec::with_capacity(length);
        let endian = &Endianness::Little;
        write_u32(&mut buf, self.kind.into(), endian)?;
        write_u32(&mut buf, length as u32, endian)?;
        buf.extend_from_slice(self.payload.as_bytes());
        buf.push(0);

        writer.write_all(&buf)?;
        writer.flush()?;
        return Ok(());
    }
}
