use crate::io::Receiver;
use std::io::{self, ErrorKind, Write};
use std::net::{SocketAddr, TcpStream};

/// One accepted client: its socket wrapped in a [`Receiver`], plus the
/// peer address captured at accept time.
///
/// The socket stays in blocking mode. Readiness only tells the server that an
/// exchange can start; the exchange itself then runs to completion.
pub struct Connection {
    receiver: Receiver<TcpStream>,
    peer: SocketAddr,
}

impl Connection {
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            receiver: Receiver::new(stream),
            peer,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn stream(&self) -> &TcpStream {
        self.receiver.get_ref()
    }

    pub fn receiver_mut(&mut self) -> &mut Receiver<TcpStream> {
        &mut self.receiver
    }

    /// Whether another exchange can start without waiting for a new
    /// readiness event.
    ///
    /// True when bytes are already buffered, when the socket has unread
    /// data, or when the peer has closed (the next exchange observes EOF).
    pub fn has_pending_input(&mut self) -> io::Result<bool> {
        if self.receiver.buffered() > 0 {
            return Ok(true);
        }

        let stream = self.receiver.get_ref();
        stream.set_nonblocking(true)?;
        let mut byte = [0u8; 1];
        let result = loop {
            match stream.peek(&mut byte) {
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                other => break other,
            }
        };
        stream.set_nonblocking(false)?;

        match result {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Write a complete frame produced outside this connection's own exchange
    pub fn send(&mut self, frame: &[u8]) -> io::Result<()> {
        let stream = self.receiver.get_mut();
        stream.write_all(frame)?;
        stream.flush()
    }
}
