use super::body::FieldWriter;
use super::broadcast::Broadcast;
use super::header::{Action, Header, Object};
use super::status::StatusCode;
use crate::config::PROTOCOL_VERSION;
use bytes::Bytes;

/// Which CREATE/USER field collided with an existing user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserField {
    LoginToken = 1,
    DisplayName = 2,
}

/// What a successful CREATE/AUTH hands back to the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthGrant {
    pub display_name: String,
    pub privilege: u8,
    pub channels: Vec<String>,
}

/// Status-specific data a handler attaches to its result
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Detail {
    #[default]
    None,
    NonUnique(UserField),
    Auth(AuthGrant),
}

/// The slot a handler fills in while processing one request
#[derive(Debug, Default)]
pub struct Reply {
    pub status: Option<StatusCode>,
    pub detail: Detail,
    pub broadcast: Option<Broadcast>,
}

impl Reply {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = Some(status);
    }

    pub fn conflict(&mut self, field: UserField) {
        self.status = Some(StatusCode::Conflict);
        self.detail = Detail::NonUnique(field);
    }

    pub fn grant(&mut self, grant: AuthGrant) {
        self.status = Some(StatusCode::Ok);
        self.detail = Detail::Auth(grant);
    }

    pub fn broadcast(&mut self, broadcast: Broadcast) {
        self.broadcast = Some(broadcast);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseBody {
    /// Status code only
    Success,
    Auth(AuthGrant),
    NonUnique {
        field: UserField,
        message: String,
    },
    Error {
        message: String,
    },
}

/// A response frame ready to be written
#[derive(Debug, Clone)]
pub struct Response {
    pub header: Header,
    pub status: StatusCode,
    pub body: ResponseBody,
    pub raw_body: Bytes,
}

impl Response {
    /// Assemble the response to a request carrying `request` as its header.
    ///
    /// The reply echoes the request's action and object. A body that cannot
    /// be described by the 16-bit length field is replaced by a 500.
    pub fn build(request: &Header, status: StatusCode, detail: Detail) -> Self {
        let body = select_body(request, status, detail);
        let raw_body = serialize(status, &body);

        match u16::try_from(raw_body.len()) {
            Ok(body_len) => Self {
                header: reply_header(request, body_len),
                status,
                body,
                raw_body,
            },
            Err(_) => {
                let status = StatusCode::InternalError;
                let body = ResponseBody::Error {
                    message: error_message(request, status),
                };
                let raw_body = serialize(status, &body);
                let body_len = u16::try_from(raw_body.len()).unwrap_or(u16::MAX);
                Self {
                    header: reply_header(request, body_len),
                    status,
                    body,
                    raw_body,
                }
            }
        }
    }
}

fn reply_header(request: &Header, body_len: u16) -> Header {
    Header {
        version: PROTOCOL_VERSION,
        action: request.action,
        object: request.object,
        body_len,
    }
}

fn select_body(request: &Header, status: StatusCode, detail: Detail) -> ResponseBody {
    match (status, detail) {
        (StatusCode::Ok, Detail::Auth(grant)) => ResponseBody::Auth(grant),
        (StatusCode::Conflict, Detail::NonUnique(field)) => ResponseBody::NonUnique {
            field,
            message: format!("{}: field not unique", label(request)),
        },
        (status, _) if status.is_success() => ResponseBody::Success,
        (status, _) => ResponseBody::Error {
            message: error_message(request, status),
        },
    }
}

fn serialize(status: StatusCode, body: &ResponseBody) -> Bytes {
    let mut writer = FieldWriter::with_status(status);
    match body {
        ResponseBody::Success => {}
        ResponseBody::Auth(grant) => {
            writer
                .field(&grant.display_name)
                .number(grant.privilege)
                .number(grant.channels.len());
            for channel in &grant.channels {
                writer.field(channel);
            }
        }
        ResponseBody::NonUnique { field, message } => {
            writer.number(*field as u8).field(message);
        }
        ResponseBody::Error { message } => {
            writer.field(message);
        }
    }
    writer.finish()
}

/// Human-readable prefix, e.g. `Create user`
fn label(header: &Header) -> String {
    let action = match header.action() {
        Some(Action::Create) => "Create",
        Some(Action::Read) => "Read",
        Some(Action::Update) => "Update",
        Some(Action::Delete) => "Delete",
        None => return "Request".to_string(),
    };
    match header.object() {
        Some(object) => format!("{} {}", action, object.label()),
        None => action.to_string(),
    }
}

fn error_message(header: &Header, status: StatusCode) -> String {
    let reason = match (header.object(), status) {
        (Some(Object::Channel), StatusCode::Forbidden) => "user not found",
        (Some(Object::Channel), StatusCode::NotFound) => "global admin not found",
        (Some(Object::Channel), StatusCode::Conflict) => "channel name already exists",
        (Some(Object::Message), StatusCode::Forbidden) => "user not found",
        (Some(Object::Message), StatusCode::NotFound) => "channel not found",
        (Some(Object::User), StatusCode::Conflict) => "field not unique",
        (Some(Object::Auth), StatusCode::Forbidden) => "user not found",
        (
            _,
            StatusCode::BadRequest
            | StatusCode::Invalid
            | StatusCode::InternalError
            | StatusCode::Unavailable
            | StatusCode::Timeout
            | StatusCode::VersionMismatch,
        ) => status.reason(),
        _ => "undefined error",
    };
    format!("{}: {}", label(header), reason)
}
