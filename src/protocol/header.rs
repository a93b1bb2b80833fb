//! Fixed 4-byte frame header.
//!
//! One big-endian 32-bit word, most significant bits first:
//!
//! ```text
//!  31    28 27    24 23            16 15                             0
//! +--------+--------+----------------+--------------------------------+
//! | version| action |     object     |            body_len            |
//! +--------+--------+----------------+--------------------------------+
//! ```

use thiserror::Error;

/// A run of `width` bits starting `shift` bits above the least significant bit
#[derive(Debug, Clone, Copy)]
struct Field {
    name: &'static str,
    shift: u32,
    width: u32,
}

impl Field {
    const fn mask(self) -> u32 {
        ((1u64 << self.width) - 1) as u32
    }

    fn get(self, word: u32) -> u32 {
        (word >> self.shift) & self.mask()
    }

    fn put(self, word: u32, value: u32) -> Result<u32, HeaderError> {
        if value > self.mask() {
            return Err(HeaderError::OutOfRange {
                field: self.name,
                value,
                width: self.width,
            });
        }
        Ok(word | (value << self.shift))
    }
}

const VERSION: Field = Field {
    name: "version",
    shift: 28,
    width: 4,
};
const ACTION: Field = Field {
    name: "action",
    shift: 24,
    width: 4,
};
const OBJECT: Field = Field {
    name: "object",
    shift: 16,
    width: 8,
};
const BODY_LEN: Field = Field {
    name: "body_len",
    shift: 0,
    width: 16,
};

// The four fields must tile the word exactly, with no gaps or overlap.
const _: () = {
    assert!(BODY_LEN.shift == 0);
    assert!(BODY_LEN.shift + BODY_LEN.width == OBJECT.shift);
    assert!(OBJECT.shift + OBJECT.width == ACTION.shift);
    assert!(ACTION.shift + ACTION.width == VERSION.shift);
    assert!(VERSION.shift + VERSION.width == 32);
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HeaderError {
    #[error("header field `{field}` value {value} does not fit in {width} bits")]
    OutOfRange {
        field: &'static str,
        value: u32,
        width: u32,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Create = 1,
    Read = 2,
    Update = 3,
    Delete = 4,
}

impl Action {
    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            1 => Some(Action::Create),
            2 => Some(Action::Read),
            3 => Some(Action::Update),
            4 => Some(Action::Delete),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Object {
    User = 1,
    Channel = 2,
    Message = 3,
    Auth = 4,
}

impl Object {
    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            1 => Some(Object::User),
            2 => Some(Object::Channel),
            3 => Some(Object::Message),
            4 => Some(Object::Auth),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Object::User => "user",
            Object::Channel => "channel",
            Object::Message => "message",
            Object::Auth => "auth",
        }
    }
}

/// Decoded frame header
///
/// `action` and `object` are kept as raw wire values so that a header with an
/// unknown action can still be echoed back in the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: u8,
    pub action: u8,
    pub object: u8,
    pub body_len: u16,
}

impl Header {
    pub const LEN: usize = 4;

    /// Build a header, rejecting values wider than their field
    pub fn new(version: u8, action: u8, object: u8, body_len: u16) -> Result<Self, HeaderError> {
        let header = Self {
            version,
            action,
            object,
            body_len,
        };
        header.encode()?;
        Ok(header)
    }

    pub fn decode(word: u32) -> Result<Self, HeaderError> {
        Ok(Self {
            version: narrow(VERSION, word)?,
            action: narrow(ACTION, word)?,
            object: narrow(OBJECT, word)?,
            body_len: narrow(BODY_LEN, word)?,
        })
    }

    pub fn encode(&self) -> Result<u32, HeaderError> {
        let word = VERSION.put(0, self.version.into())?;
        let word = ACTION.put(word, self.action.into())?;
        let word = OBJECT.put(word, self.object.into())?;
        BODY_LEN.put(word, self.body_len.into())
    }

    pub fn from_bytes(bytes: [u8; Self::LEN]) -> Result<Self, HeaderError> {
        Self::decode(u32::from_be_bytes(bytes))
    }

    pub fn to_bytes(&self) -> Result<[u8; Self::LEN], HeaderError> {
        Ok(self.encode()?.to_be_bytes())
    }

    pub fn action(&self) -> Option<Action> {
        Action::from_wire(self.action)
    }

    pub fn object(&self) -> Option<Object> {
        Object::from_wire(self.object)
    }
}

fn narrow<T: TryFrom<u32>>(field: Field, word: u32) -> Result<T, HeaderError> {
    let value = field.get(word);
    T::try_from(value).map_err(|_| HeaderError::OutOfRange {
        field: field.name,
        value,
        width: field.width,
    })
}
