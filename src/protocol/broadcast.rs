use super::body::FieldWriter;
use super::header::{Action, Header, HeaderError, Object};
use crate::config::PROTOCOL_VERSION;
use bytes::Bytes;

/// Out-of-band notification fanned out to the other connections
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Broadcast {
    /// A message was posted; peers receive it as a CREATE/MESSAGE frame
    Message {
        channel_name: String,
        display_name: String,
        timestamp: u64,
        content: String,
    },
}

impl Broadcast {
    /// Complete frame, header included
    pub fn encode(&self) -> Result<Bytes, HeaderError> {
        let (object, body) = match self {
            Broadcast::Message {
                channel_name,
                display_name,
                timestamp,
                content,
            } => {
                let mut writer = FieldWriter::new();
                writer
                    .field(channel_name)
                    .field(display_name)
                    .hex(*timestamp)
                    .field(content);
                (Object::Message, writer.finish())
            }
        };

        let body_len = u16::try_from(body.len()).map_err(|_| HeaderError::OutOfRange {
            field: "body_len",
            value: u32::try_from(body.len()).unwrap_or(u32::MAX),
            width: 16,
        })?;
        let header = Header::new(PROTOCOL_VERSION, Action::Create as u8, object as u8, body_len)?;

        let mut frame = Vec::with_capacity(Header::LEN + body.len());
        frame.extend_from_slice(&header.to_bytes()?);
        frame.extend_from_slice(&body);
        Ok(Bytes::from(frame))
    }
}
