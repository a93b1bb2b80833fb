//! Request handlers.
//!
//! [`Handler`] is the seam between the exchange driver and business logic.
//! [`ChatHandler`] implements the CREATE operations on top of a [`Store`].
//!
//! Key layout:
//!
//! | key                     | value                                     |
//! |-------------------------|-------------------------------------------|
//! | `user:<login_token>`    | display name, password                    |
//! | `display:<name>`        | login token                               |
//! | `channel_name:<name>`   | channel id                                |
//! | `channel:<id>`          | channel name, creator, public flag        |
//! | `channels:<display>`    | names of channels created by that user    |
//! | `message:<id>`          | channel, sender, timestamp, content       |
//!
//! Values are stored with the same delimiter framing as request bodies.

use crate::error::{Error, Result};
use crate::protocol::{
    AuthGrant, Broadcast, FieldReader, FieldWriter, Reply, Request, RequestBody, StatusCode,
    UserField, DELIM,
};
use crate::store::{Inserted, Store};
use tracing::{debug, error};
use uuid::Uuid;

/// Processes one parsed request.
///
/// The handler owns `request` for the duration of the call and must leave a
/// status in `reply` before returning; a missing status is answered with 500.
pub trait Handler {
    fn handle(&mut self, request: Request, reply: &mut Reply);
}

/// Privilege level granted to every authenticated user
const DEFAULT_PRIVILEGE: u8 = 0;

pub struct ChatHandler<S> {
    store: S,
}

impl<S: Store> ChatHandler<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn into_store(self) -> S {
        self.store
    }

    fn create_user(
        &self,
        login_token: &str,
        display_name: &str,
        password: &str,
        reply: &mut Reply,
    ) -> Result<()> {
        let user_key = format!("user:{login_token}");
        let display_key = format!("display:{display_name}");

        if self.store.contains(user_key.as_bytes()) {
            reply.conflict(UserField::LoginToken);
            return Ok(());
        }
        if self.store.contains(display_key.as_bytes()) {
            reply.conflict(UserField::DisplayName);
            return Ok(());
        }

        let mut record = FieldWriter::new();
        record.field(display_name).field(password);
        if self.store.insert_unique(user_key.as_bytes(), &record.finish())? == Inserted::Conflict {
            reply.conflict(UserField::LoginToken);
            return Ok(());
        }
        if let Err(e) = self.store.put(display_key.as_bytes(), login_token.as_bytes()) {
            return Err(self.roll_back(&[user_key.as_str()], e));
        }

        debug!("Created user {}", display_name);
        reply.set_status(StatusCode::Created);
        Ok(())
    }

    fn create_channel(
        &self,
        channel_name: &str,
        display_name: &str,
        public: bool,
        reply: &mut Reply,
    ) -> Result<()> {
        if !self.user_exists(display_name) {
            reply.set_status(StatusCode::Forbidden);
            return Ok(());
        }

        let id = Uuid::new_v4().to_string();
        let name_key = format!("channel_name:{channel_name}");
        if self.store.insert_unique(name_key.as_bytes(), id.as_bytes())? == Inserted::Conflict {
            reply.set_status(StatusCode::Conflict);
            return Ok(());
        }

        let record_key = format!("channel:{id}");
        if let Err(e) = self.write_channel(&record_key, channel_name, display_name, public) {
            return Err(self.roll_back(&[name_key.as_str(), record_key.as_str()], e));
        }

        debug!("Created channel {} ({})", channel_name, id);
        reply.set_status(StatusCode::Created);
        Ok(())
    }

    /// Channel record plus the creator's channel list; the list goes last
    fn write_channel(
        &self,
        record_key: &str,
        channel_name: &str,
        display_name: &str,
        public: bool,
    ) -> Result<()> {
        let mut record = FieldWriter::new();
        record
            .field(channel_name)
            .field(display_name)
            .number(u8::from(public));
        self.store.put(record_key.as_bytes(), &record.finish())?;

        let list_key = format!("channels:{display_name}");
        let mut list = self
            .store
            .get(list_key.as_bytes())?
            .map(|bytes| bytes.to_vec())
            .unwrap_or_default();
        list.extend_from_slice(channel_name.as_bytes());
        list.push(DELIM);
        self.store.put(list_key.as_bytes(), &list)
    }

    /// Undo the keys a failed multi-key write already created
    fn roll_back(&self, keys: &[&str], cause: Error) -> Error {
        for key in keys {
            if let Err(e) = self.store.remove(key.as_bytes()) {
                error!("Failed to roll back {}: {}", key, e);
            }
        }
        cause
    }

    fn create_message(
        &self,
        channel_name: String,
        display_name: String,
        timestamp: u64,
        content: String,
        reply: &mut Reply,
    ) -> Result<()> {
        if !self.user_exists(&display_name) {
            reply.set_status(StatusCode::Forbidden);
            return Ok(());
        }
        if !self
            .store
            .contains(format!("channel_name:{channel_name}").as_bytes())
        {
            reply.set_status(StatusCode::NotFound);
            return Ok(());
        }

        let id = Uuid::new_v4().to_string();
        let mut record = FieldWriter::new();
        record
            .field(&channel_name)
            .field(&display_name)
            .hex(timestamp)
            .field(&content);
        let key = format!("message:{id}");
        if self.store.insert_unique(key.as_bytes(), &record.finish())? == Inserted::Conflict {
            reply.set_status(StatusCode::Conflict);
            return Ok(());
        }

        debug!("Stored message {} in {}", id, channel_name);
        reply.set_status(StatusCode::Created);
        reply.broadcast(Broadcast::Message {
            channel_name,
            display_name,
            timestamp,
            content,
        });
        Ok(())
    }

    fn create_auth(&self, login_token: &str, password: &str, reply: &mut Reply) -> Result<()> {
        let Some(record) = self.store.get(format!("user:{login_token}").as_bytes())? else {
            reply.set_status(StatusCode::Forbidden);
            return Ok(());
        };

        let mut fields = FieldReader::new(&record);
        let display_name = fields.long_text("display_name").map_err(corrupt)?;
        let stored_password = fields.long_text("password").map_err(corrupt)?;
        fields.finish().map_err(corrupt)?;

        if !constant_time_eq(password.as_bytes(), stored_password.as_bytes()) {
            reply.set_status(StatusCode::Forbidden);
            return Ok(());
        }

        let channels = match self.store.get(format!("channels:{display_name}").as_bytes())? {
            Some(list) => list
                .split(|b| *b == DELIM)
                .filter(|name| !name.is_empty())
                .map(|name| String::from_utf8(name.to_vec()).map_err(corrupt))
                .collect::<Result<Vec<_>>>()?,
            None => Vec::new(),
        };

        debug!("Authenticated {}", display_name);
        reply.grant(AuthGrant {
            display_name,
            privilege: DEFAULT_PRIVILEGE,
            channels,
        });
        Ok(())
    }

    fn user_exists(&self, display_name: &str) -> bool {
        self.store
            .contains(format!("display:{display_name}").as_bytes())
    }
}

impl<S: Store> Handler for ChatHandler<S> {
    fn handle(&mut self, request: Request, reply: &mut Reply) {
        let sender = request.sender;
        let result = match request.body {
            RequestBody::CreateUser {
                login_token,
                display_name,
                password,
            } => self.create_user(&login_token, &display_name, &password, reply),
            RequestBody::CreateChannel {
                channel_name,
                display_name,
                public,
            } => self.create_channel(&channel_name, &display_name, public, reply),
            RequestBody::CreateMessage {
                channel_name,
                display_name,
                timestamp,
                content,
            } => self.create_message(channel_name, display_name, timestamp, content, reply),
            RequestBody::CreateAuth {
                login_token,
                password,
            } => self.create_auth(&login_token, &password, reply),
        };

        if let Err(e) = result {
            error!("Failed to handle request from {}: {}", sender, e);
            *reply = Reply::new();
            reply.set_status(StatusCode::InternalError);
        }
    }
}

fn corrupt<E: std::fmt::Display>(e: E) -> Error {
    Error::Other(anyhow::anyhow!("corrupt stored record: {}", e))
}

/// Constant-time comparison so password checks don't leak via timing
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (byte_a, byte_b) in a.iter().zip(b.iter()) {
        result |= byte_a ^ byte_b;
    }
    result == 0
}
