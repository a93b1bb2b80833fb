//! Wire protocol: header codec, body fields, typed requests and responses.

mod body;
mod broadcast;
mod header;
mod request;
mod response;
mod status;

pub use body::{FieldReader, FieldWriter, DELIM};
pub use broadcast::Broadcast;
pub use header::{Action, Header, HeaderError, Object};
pub use request::{ParseError, Request, RequestBody};
pub use response::{AuthGrant, Detail, Reply, Response, ResponseBody, UserField};
pub use status::StatusCode;
