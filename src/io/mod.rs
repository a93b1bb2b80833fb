mod receiver;

pub use receiver::{ReceiveError, Receiver};
