use super::body::FieldReader;
use super::header::{Action, Header, Object};
use super::status::StatusCode;
use crate::config::MAX_NAME_LEN;
use bytes::Bytes;
use std::net::SocketAddr;
use thiserror::Error;

/// Why a frame's body could not be turned into a [`Request`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("unsupported action {0}")]
    UnsupportedAction(u8),

    #[error("unknown object {0}")]
    UnknownObject(u8),

    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("field `{0}` is empty")]
    EmptyField(&'static str),

    #[error("field `{0}` exceeds {1} bytes")]
    FieldTooLong(&'static str, usize),

    #[error("field `{0}` is not valid UTF-8")]
    InvalidUtf8(&'static str),

    #[error("field `{0}` has an invalid value")]
    InvalidValue(&'static str),

    #[error("unexpected data after the last field")]
    TrailingData,
}

impl ParseError {
    pub fn status(&self) -> StatusCode {
        match self {
            ParseError::UnsupportedAction(_) => StatusCode::Invalid,
            _ => StatusCode::BadRequest,
        }
    }
}

/// Typed request payload, one variant per supported (action, object) pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestBody {
    CreateUser {
        login_token: String,
        display_name: String,
        password: String,
    },
    CreateChannel {
        channel_name: String,
        display_name: String,
        public: bool,
    },
    CreateMessage {
        channel_name: String,
        display_name: String,
        timestamp: u64,
        content: String,
    },
    CreateAuth {
        login_token: String,
        password: String,
    },
}

impl RequestBody {
    /// Tokenize `raw` according to the layout implied by `header`
    pub fn parse(header: &Header, raw: &[u8]) -> Result<Self, ParseError> {
        match header.action() {
            Some(Action::Create) => {}
            _ => return Err(ParseError::UnsupportedAction(header.action)),
        }

        let object = header
            .object()
            .ok_or(ParseError::UnknownObject(header.object))?;

        let mut fields = FieldReader::new(raw);
        let body = match object {
            Object::User => RequestBody::CreateUser {
                login_token: fields.text("login_token", MAX_NAME_LEN)?,
                display_name: fields.text("display_name", MAX_NAME_LEN)?,
                password: fields.long_text("password")?,
            },
            Object::Channel => RequestBody::CreateChannel {
                channel_name: fields.text("channel_name", MAX_NAME_LEN)?,
                display_name: fields.text("display_name", MAX_NAME_LEN)?,
                public: fields.flag("public")?,
            },
            Object::Message => RequestBody::CreateMessage {
                channel_name: fields.text("channel_name", MAX_NAME_LEN)?,
                display_name: fields.text("display_name", MAX_NAME_LEN)?,
                timestamp: fields.hex("timestamp")?,
                content: fields.long_text("content")?,
            },
            Object::Auth => RequestBody::CreateAuth {
                login_token: fields.text("login_token", MAX_NAME_LEN)?,
                password: fields.long_text("password")?,
            },
        };
        fields.finish()?;

        Ok(body)
    }
}

/// One fully parsed request, owned by the exchange that read it
#[derive(Debug, Clone)]
pub struct Request {
    pub header: Header,
    pub raw_body: Bytes,
    pub sender: SocketAddr,
    pub body: RequestBody,
}

impl Request {
    pub fn parse(header: Header, raw_body: Bytes, sender: SocketAddr) -> Result<Self, ParseError> {
        let body = RequestBody::parse(&header, &raw_body)?;
        Ok(Self {
            header,
            raw_body,
            sender,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(action: Action, object: Object, body: &[u8]) -> Header {
        Header::new(1, action as u8, object as u8, body.len() as u16).unwrap()
    }

    fn parse(action: Action, object: Object, body: &[u8]) -> Result<RequestBody, ParseError> {
        RequestBody::parse(&header(action, object, body), body)
    }

    #[test]
    fn test_create_user() {
        let body = parse(Action::Create, Object::User, b"tok\x03alice\x03pw\x03").unwrap();
        assert_eq!(
            body,
            RequestBody::CreateUser {
                login_token: "tok".into(),
                display_name: "alice".into(),
                password: "pw".into(),
            }
        );
    }

    #[test]
    fn test_create_user_two_fields_rejected() {
        let err = parse(Action::Create, Object::User, b"tok\x03alice\x03").unwrap_err();
        assert_eq!(err, ParseError::MissingField("password"));
        assert_eq!(err.status(), StatusCode::BadRequest);
    }

    #[test]
    fn test_create_user_four_fields_rejected() {
        let err = parse(Action::Create, Object::User, b"tok\x03alice\x03pw\x03x\x03").unwrap_err();
        assert_eq!(err, ParseError::TrailingData);
        assert_eq!(err.status(), StatusCode::BadRequest);
    }

    #[test]
    fn test_create_channel() {
        let body = parse(Action::Create, Object::Channel, b"general\x03alice\x030\x03").unwrap();
        assert_eq!(
            body,
            RequestBody::CreateChannel {
                channel_name: "general".into(),
                display_name: "alice".into(),
                public: false,
            }
        );
    }

    #[test]
    fn test_create_message() {
        let raw = b"general\x03alice\x0318c2f1a9b00\x03hello there\x03";
        let body = parse(Action::Create, Object::Message, raw).unwrap();
        assert_eq!(
            body,
            RequestBody::CreateMessage {
                channel_name: "general".into(),
                display_name: "alice".into(),
                timestamp: 0x18c2f1a9b00,
                content: "hello there".into(),
            }
        );
    }

    #[test]
    fn test_create_message_zero_timestamp() {
        let raw = b"general\x03alice\x030\x03hi\x03";
        assert_eq!(
            parse(Action::Create, Object::Message, raw),
            Err(ParseError::InvalidValue("timestamp"))
        );
    }

    #[test]
    fn test_create_auth() {
        let body = parse(Action::Create, Object::Auth, b"tok\x03pw\x03").unwrap();
        assert_eq!(
            body,
            RequestBody::CreateAuth {
                login_token: "tok".into(),
                password: "pw".into(),
            }
        );
    }

    #[test]
    fn test_unsupported_action() {
        let err = parse(Action::Read, Object::User, b"").unwrap_err();
        assert_eq!(err, ParseError::UnsupportedAction(2));
        assert_eq!(err.status(), StatusCode::Invalid);

        let unknown = Header::new(1, 9, 1, 0).unwrap();
        assert_eq!(
            RequestBody::parse(&unknown, b"").unwrap_err().status(),
            StatusCode::Invalid
        );
    }

    #[test]
    fn test_unknown_object() {
        let unknown = Header::new(1, 1, 42, 0).unwrap();
        let err = RequestBody::parse(&unknown, b"").unwrap_err();
        assert_eq!(err, ParseError::UnknownObject(42));
        assert_eq!(err.status(), StatusCode::BadRequest);
    }

    #[test]
    fn test_name_too_long() {
        let raw = b"abcdefghijklmnopqrstuvwxyz\x03alice\x03pw\x03";
        assert_eq!(
            parse(Action::Create, Object::User, raw),
            Err(ParseError::FieldTooLong("login_token", MAX_NAME_LEN))
        );
    }
}
