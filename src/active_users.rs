use crate::config::{MAX_IP_LEN, MAX_NAME_LEN};
use std::collections::HashMap;
use std::net::SocketAddr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ActiveUserError {
    #[error("display name exceeds {} bytes", MAX_NAME_LEN)]
    NameTooLong,

    #[error("address exceeds {} bytes", MAX_IP_LEN)]
    AddressTooLong,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveUser {
    pub display_name: String,
    pub ip: String,
}

/// Users signed in on a live connection, keyed by connection slot
#[derive(Debug, Default)]
pub struct ActiveUsers {
    users: HashMap<usize, ActiveUser>,
}

impl ActiveUsers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the user signed in on `slot`, replacing any previous entry
    pub fn register(
        &mut self,
        slot: usize,
        display_name: &str,
        addr: SocketAddr,
    ) -> Result<(), ActiveUserError> {
        if display_name.len() > MAX_NAME_LEN {
            return Err(ActiveUserError::NameTooLong);
        }
        let ip = addr.to_string();
        if ip.len() > MAX_IP_LEN {
            return Err(ActiveUserError::AddressTooLong);
        }

        self.users.insert(
            slot,
            ActiveUser {
                display_name: display_name.to_string(),
                ip,
            },
        );
        Ok(())
    }

    pub fn get(&self, slot: usize) -> Option<&ActiveUser> {
        self.users.get(&slot)
    }

    pub fn by_name(&self, display_name: &str) -> Option<(usize, &ActiveUser)> {
        self.users
            .iter()
            .find(|(_, user)| user.display_name == display_name)
            .map(|(slot, user)| (*slot, user))
    }

    pub fn by_ip(&self, ip: &str) -> Option<(usize, &ActiveUser)> {
        self.users
            .iter()
            .find(|(_, user)| user.ip == ip)
            .map(|(slot, user)| (*slot, user))
    }

    /// Change the display name of every session signed in as `old`.
    /// Returns how many sessions were updated.
    pub fn rename(&mut self, old: &str, new: &str) -> Result<usize, ActiveUserError> {
        if new.len() > MAX_NAME_LEN {
            return Err(ActiveUserError::NameTooLong);
        }

        let mut renamed = 0;
        for user in self.users.values_mut() {
            if user.display_name == old {
                user.display_name = new.to_string();
                renamed += 1;
            }
        }
        Ok(renamed)
    }

    pub fn remove(&mut self, slot: usize) -> Option<ActiveUser> {
        self.users.remove(&slot)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}
