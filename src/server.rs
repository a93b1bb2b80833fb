use crate::active_users::ActiveUsers;
use crate::config::{Config, CONNECTION_QUEUE, MAX_CONNECTIONS};
use crate::error::Result;
use crate::handler::Handler;
use crate::network::{exchange, Connection, ConnectionTable, Outcome};
use crate::protocol::Broadcast;
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token, Waker};
use std::io::{self, ErrorKind};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const LISTENER: Token = Token(usize::MAX);
const WAKER: Token = Token(usize::MAX - 1);

/// Cancellation token for a running [`Server`].
///
/// Requesting shutdown sets a flag and wakes the poll; the loop notices it
/// between readiness waits, so an in-flight exchange always completes.
#[derive(Clone)]
pub struct ShutdownHandle {
    requested: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl ShutdownHandle {
    pub fn request(&self) {
        self.requested.store(true, Ordering::Release);
        if let Err(e) = self.waker.wake() {
            warn!("Failed to wake event loop: {}", e);
        }
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }
}

/// Single-threaded, readiness-driven chat server
///
/// Owns the listening socket and every accepted connection. Each readiness
/// round accepts pending connections up to [`MAX_CONNECTIONS`], then runs
/// exchanges on ready connections in ascending slot order.
pub struct Server<H> {
    poll: Poll,
    events: Events,
    listener: TcpListener,
    local_addr: SocketAddr,
    accepting: bool,
    connections: ConnectionTable<Connection>,
    active_users: ActiveUsers,
    handler: H,
    shutdown: ShutdownHandle,
    tcp_nodelay: bool,
    exchange_timeout: Option<Duration>,
}

impl<H: Handler> Server<H> {
    /// Bind the listening socket and set up readiness polling
    pub fn bind(config: &Config, handler: H) -> Result<Self> {
        let addr = SocketAddr::V4(config.listen_addr()?);
        let listener = create_listener(addr)?;
        let local_addr = listener.local_addr()?;

        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER)?);
        let fd = listener.as_raw_fd();
        poll.registry()
            .register(&mut SourceFd(&fd), LISTENER, Interest::READABLE)?;

        info!("Server listening on {}", local_addr);

        Ok(Self {
            poll,
            events: Events::with_capacity(MAX_CONNECTIONS + 2),
            listener,
            local_addr,
            accepting: true,
            connections: ConnectionTable::new(MAX_CONNECTIONS),
            active_users: ActiveUsers::new(),
            handler,
            shutdown: ShutdownHandle {
                requested: Arc::new(AtomicBool::new(false)),
                waker,
            },
            tcp_nodelay: config.tcp_nodelay,
            exchange_timeout: config.exchange_timeout(),
        })
    }

    /// Serve until shutdown is requested.
    ///
    /// Returns an error only if the readiness wait itself fails.
    pub fn run(&mut self) -> Result<()> {
        while !self.shutdown.is_requested() {
            self.poll_once(None)?;
        }

        info!("Shutting down");
        if !self.connections.is_empty() {
            info!("Closing {} connection(s)", self.connections.len());
            for slot in self.connections.slots() {
                self.close(slot);
            }
        }
        Ok(())
    }

    /// One readiness round: wait, accept, serve
    pub fn poll_once(&mut self, timeout: Option<Duration>) -> Result<()> {
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::Interrupted => return Ok(()),
            Err(e) => {
                error!("Readiness wait failed: {}", e);
                return Err(e.into());
            }
        }

        let mut listener_ready = false;
        let mut ready = Vec::new();
        for event in self.events.iter() {
            match event.token() {
                LISTENER => listener_ready = true,
                WAKER => {}
                Token(slot) => ready.push((slot, event.is_error())),
            }
        }
        ready.sort_unstable_by_key(|(slot, _)| *slot);

        if listener_ready && self.accepting {
            self.accept_pending();
        }

        for (slot, failed) in ready {
            if failed {
                debug!("Socket error on slot {}", slot);
                self.remove(slot);
            } else {
                self.service(slot);
            }
        }

        Ok(())
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Whether the listening socket is currently registered for readiness
    pub fn is_accepting(&self) -> bool {
        self.accepting
    }

    pub fn into_handler(self) -> H {
        self.handler
    }

    fn accept_pending(&mut self) {
        // Readiness is edge-triggered: drain the backlog or we may never hear
        // about the remaining connections.
        while !self.connections.is_full() {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    if let Err(e) = self.admit(stream, peer) {
                        warn!("Failed to admit {}: {}", peer, e);
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                    break;
                }
            }
        }

        if self.connections.is_full() {
            self.pause_accepting();
        }
    }

    fn admit(&mut self, stream: TcpStream, peer: SocketAddr) -> io::Result<()> {
        stream.set_nonblocking(false)?;
        stream.set_nodelay(self.tcp_nodelay)?;
        stream.set_read_timeout(self.exchange_timeout)?;
        stream.set_write_timeout(self.exchange_timeout)?;
        let fd = stream.as_raw_fd();

        let slot = self
            .connections
            .insert(Connection::new(stream, peer))
            .ok_or_else(|| io::Error::new(ErrorKind::Other, "connection table full"))?;

        if let Err(e) =
            self.poll
                .registry()
                .register(&mut SourceFd(&fd), Token(slot), Interest::READABLE)
        {
            self.connections.remove(slot);
            return Err(e);
        }

        info!(
            "Accepted connection from {} on slot {} ({} active)",
            peer,
            slot,
            self.connections.len()
        );
        Ok(())
    }

    fn pause_accepting(&mut self) {
        if !self.accepting {
            return;
        }
        let fd = self.listener.as_raw_fd();
        if let Err(e) = self.poll.registry().deregister(&mut SourceFd(&fd)) {
            error!("Failed to pause listener: {}", e);
            return;
        }
        self.accepting = false;
        info!("Connection limit of {} reached, pausing accept", MAX_CONNECTIONS);
    }

    fn resume_accepting(&mut self) {
        if self.accepting || self.shutdown.is_requested() {
            return;
        }
        // A fresh registration reports a backlog that built up while paused.
        let fd = self.listener.as_raw_fd();
        if let Err(e) = self
            .poll
            .registry()
            .register(&mut SourceFd(&fd), LISTENER, Interest::READABLE)
        {
            error!("Failed to resume listener: {}", e);
            return;
        }
        self.accepting = true;
        debug!("Accepting connections again");
    }

    /// Run exchanges on `slot` until its input is drained or it is removed
    fn service(&mut self, slot: usize) {
        loop {
            let Some(conn) = self.connections.get_mut(slot) else {
                return;
            };
            let peer = conn.peer();
            let cycle = exchange::serve(conn.receiver_mut(), peer, &mut self.handler);

            if let Some(grant) = cycle.login {
                if let Some((other, user)) = self.active_users.by_name(&grant.display_name) {
                    if other != slot {
                        debug!("{} is also signed in from {}", user.display_name, user.ip);
                    }
                }
                match self.active_users.register(slot, &grant.display_name, peer) {
                    Ok(()) => info!(
                        "{} signed in from {} ({} signed in)",
                        grant.display_name,
                        peer,
                        self.active_users.len()
                    ),
                    Err(e) => warn!("Not tracking {} from {}: {}", grant.display_name, peer, e),
                }
            }

            if let Some(broadcast) = cycle.broadcast {
                self.fan_out(slot, &broadcast);
            }

            match cycle.outcome {
                Outcome::Ok => {}
                Outcome::Eof => {
                    self.remove(slot);
                    return;
                }
                Outcome::Fatal => {
                    warn!("Dropping connection from {}", peer);
                    self.remove(slot);
                    return;
                }
            }

            let Some(conn) = self.connections.get_mut(slot) else {
                return;
            };
            match conn.has_pending_input() {
                Ok(true) => continue,
                Ok(false) => return,
                Err(e) => {
                    warn!("Failed to check {} for input: {}", peer, e);
                    self.remove(slot);
                    return;
                }
            }
        }
    }

    /// Deliver `broadcast` to every connection except `origin`
    fn fan_out(&mut self, origin: usize, broadcast: &Broadcast) {
        let frame = match broadcast.encode() {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Cannot encode broadcast: {}", e);
                return;
            }
        };

        let mut failed = Vec::new();
        for (slot, conn) in self.connections.iter_mut() {
            if slot == origin {
                continue;
            }
            if let Err(e) = conn.send(&frame) {
                debug!("Broadcast to {} failed: {}", conn.peer(), e);
                failed.push(slot);
            }
        }

        for slot in failed {
            self.remove(slot);
        }
    }

    /// Close a connection and re-enable accepting if it had been paused
    fn remove(&mut self, slot: usize) {
        self.close(slot);
        if !self.connections.is_full() {
            self.resume_accepting();
        }
    }

    fn close(&mut self, slot: usize) {
        let Some(conn) = self.connections.remove(slot) else {
            return;
        };

        let fd = conn.stream().as_raw_fd();
        if let Err(e) = self.poll.registry().deregister(&mut SourceFd(&fd)) {
            debug!("Failed to deregister slot {}: {}", slot, e);
        }
        self.active_users.remove(slot);

        info!(
            "Connection from {} closed ({} active)",
            conn.peer(),
            self.connections.len()
        );
    }
}

fn create_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = socket2::Socket::new(
        socket2::Domain::for_address(addr),
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(CONNECTION_QUEUE)?;

    Ok(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Action, Header, Object, Reply, Request, RequestBody, StatusCode};
    use std::io::{Read, Write};
    use std::thread::{self, JoinHandle};

    /// Creates everything, echoes messages to the other connections
    struct Accept;

    impl Handler for Accept {
        fn handle(&mut self, request: Request, reply: &mut Reply) {
            if let RequestBody::CreateMessage {
                channel_name,
                display_name,
                timestamp,
                content,
            } = request.body
            {
                reply.broadcast(Broadcast::Message {
                    channel_name,
                    display_name,
                    timestamp,
                    content,
                });
            }
            reply.set_status(StatusCode::Created);
        }
    }

    fn server_with(exchange_timeout_ms: Option<u64>) -> Server<Accept> {
        let config = Config {
            port: 0,
            exchange_timeout_ms,
            ..Default::default()
        };
        Server::bind(&config, Accept).unwrap()
    }

    fn server() -> Server<Accept> {
        server_with(None)
    }

    fn pump(server: &mut Server<Accept>, done: impl Fn(&Server<Accept>) -> bool) {
        for _ in 0..200 {
            server.poll_once(Some(Duration::from_millis(10))).unwrap();
            if done(server) {
                return;
            }
        }
        panic!("server never reached the expected state");
    }

    /// Keep the loop turning while `client` talks to it from another thread
    fn drive<T>(server: &mut Server<Accept>, client: JoinHandle<T>) -> T {
        for _ in 0..500 {
            if client.is_finished() {
                break;
            }
            server.poll_once(Some(Duration::from_millis(10))).unwrap();
        }
        client.join().unwrap()
    }

    fn frame(object: Object, body: &[u8]) -> Vec<u8> {
        let header =
            Header::new(1, Action::Create as u8, object as u8, body.len() as u16).unwrap();
        let mut frame = header.to_bytes().unwrap().to_vec();
        frame.extend_from_slice(body);
        frame
    }

    fn create_user_frame() -> Vec<u8> {
        frame(Object::User, b"tok\x03alice\x03pw\x03")
    }

    fn message_frame(content: &str) -> Vec<u8> {
        let body = format!("general\x03alice\x0318c2f1a9b00\x03{content}\x03");
        frame(Object::Message, body.as_bytes())
    }

    fn read_frame(stream: &mut TcpStream) -> (Header, Vec<u8>) {
        let mut word = [0u8; Header::LEN];
        stream.read_exact(&mut word).unwrap();
        let header = Header::from_bytes(word).unwrap();
        let mut body = vec![0u8; header.body_len as usize];
        stream.read_exact(&mut body).unwrap();
        (header, body)
    }

    #[test]
    fn test_admission_control() {
        let mut server = server();
        let addr = server.local_addr();

        let mut clients: Vec<TcpStream> = (0..MAX_CONNECTIONS)
            .map(|_| TcpStream::connect(addr).unwrap())
            .collect();
        pump(&mut server, |s| s.connection_count() == MAX_CONNECTIONS);
        assert!(!server.is_accepting());

        // Completes the handshake in the kernel backlog but is not admitted
        let mut extra = TcpStream::connect(addr).unwrap();
        extra.write_all(&create_user_frame()).unwrap();
        for _ in 0..5 {
            server.poll_once(Some(Duration::from_millis(10))).unwrap();
        }
        assert_eq!(server.connection_count(), MAX_CONNECTIONS);
        extra.set_nonblocking(true).unwrap();
        let mut buf = [0u8; 1];
        assert_eq!(
            extra.read(&mut buf).unwrap_err().kind(),
            ErrorKind::WouldBlock
        );
        extra.set_nonblocking(false).unwrap();

        // Freeing a slot re-enables accepting
        drop(clients.remove(0));
        pump(&mut server, |s| s.connection_count() < MAX_CONNECTIONS);
        assert!(server.is_accepting());

        pump(&mut server, |s| s.connection_count() == MAX_CONNECTIONS);
        for _ in 0..5 {
            server.poll_once(Some(Duration::from_millis(10))).unwrap();
        }

        extra
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        assert_eq!(read_frame(&mut extra).1, b"201\x03");
    }

    #[test]
    fn test_pipelined_frames_served_in_one_round() {
        let mut server = server();
        let mut client = TcpStream::connect(server.local_addr()).unwrap();
        pump(&mut server, |s| s.connection_count() == 1);

        let mut frames = create_user_frame();
        frames.extend(create_user_frame());
        client.write_all(&frames).unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();

        let mut received = Vec::new();
        for _ in 0..200 {
            server.poll_once(Some(Duration::from_millis(10))).unwrap();
            client.set_nonblocking(true).unwrap();
            let mut buf = [0u8; 64];
            while let Ok(n) = client.read(&mut buf) {
                if n == 0 {
                    break;
                }
                received.extend_from_slice(&buf[..n]);
            }
            client.set_nonblocking(false).unwrap();
            if received.len() >= 2 * (Header::LEN + 4) {
                break;
            }
        }
        assert_eq!(received.len(), 2 * (Header::LEN + 4));
        assert_eq!(&received[Header::LEN..Header::LEN + 4], b"201\x03");
    }

    #[test]
    fn test_disconnect_frees_slot() {
        let mut server = server();
        let client = TcpStream::connect(server.local_addr()).unwrap();
        pump(&mut server, |s| s.connection_count() == 1);

        drop(client);
        pump(&mut server, |s| s.connection_count() == 0);
        assert!(server.is_accepting());
    }

    #[test]
    fn test_peer_stalled_mid_frame_is_dropped() {
        let mut server = server_with(Some(100));
        let addr = server.local_addr();

        let mut stalled = TcpStream::connect(addr).unwrap();
        pump(&mut server, |s| s.connection_count() == 1);

        // Half a header, then silence
        stalled.write_all(&create_user_frame()[..2]).unwrap();
        pump(&mut server, |s| s.connection_count() == 0);
        assert!(server.is_accepting());

        stalled
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let mut buf = [0u8; 1];
        assert_eq!(stalled.read(&mut buf).unwrap(), 0);

        let client = thread::spawn(move || {
            let mut client = TcpStream::connect(addr).unwrap();
            client
                .set_read_timeout(Some(Duration::from_secs(2)))
                .unwrap();
            client.write_all(&create_user_frame()).unwrap();
            read_frame(&mut client).1
        });
        assert_eq!(drive(&mut server, client), b"201\x03");
    }

    #[test]
    fn test_peer_that_stops_reading_is_dropped() {
        let mut server = server_with(Some(100));
        let addr = server.local_addr();

        let sender = TcpStream::connect(addr).unwrap();
        pump(&mut server, |s| s.connection_count() == 1);

        // Small receive window that is never drained
        let idle = socket2::Socket::new(socket2::Domain::IPV4, socket2::Type::STREAM, None)
            .unwrap();
        idle.set_recv_buffer_size(4096).unwrap();
        idle.connect(&addr.into()).unwrap();
        let mut idle: TcpStream = idle.into();
        pump(&mut server, |s| s.connection_count() == 2);

        let stop = Arc::new(AtomicBool::new(false));
        let poster = thread::spawn({
            let stop = Arc::clone(&stop);
            move || {
                let mut sender = sender;
                sender
                    .set_read_timeout(Some(Duration::from_secs(5)))
                    .unwrap();
                let frame = message_frame(&"x".repeat(32 * 1024));
                let mut posted = 0;
                while !stop.load(Ordering::Acquire) {
                    sender.write_all(&frame).unwrap();
                    assert_eq!(read_frame(&mut sender).1, b"201\x03");
                    posted += 1;
                }
                posted
            }
        });

        for _ in 0..5_000 {
            if server.connection_count() == 1 {
                break;
            }
            server.poll_once(Some(Duration::from_millis(10))).unwrap();
        }
        assert_eq!(server.connection_count(), 1);

        stop.store(true, Ordering::Release);
        assert!(drive(&mut server, poster) > 0);

        // Whatever was queued before the drop, then end of stream
        idle.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let mut buf = vec![0u8; 64 * 1024];
        while idle.read(&mut buf).unwrap() > 0 {}
    }

    #[test]
    fn test_broadcast_drops_reset_peer() {
        let mut server = server();
        let addr = server.local_addr();

        let mut sender = TcpStream::connect(addr).unwrap();
        pump(&mut server, |s| s.connection_count() == 1);
        let dead = socket2::Socket::new(socket2::Domain::IPV4, socket2::Type::STREAM, None)
            .unwrap();
        dead.connect(&addr.into()).unwrap();
        pump(&mut server, |s| s.connection_count() == 2);
        let mut watcher = TcpStream::connect(addr).unwrap();
        pump(&mut server, |s| s.connection_count() == 3);

        // Abortive close: the next write to this peer fails
        dead.set_linger(Some(Duration::ZERO)).unwrap();
        drop(dead);
        sender.write_all(&message_frame("hello")).unwrap();
        thread::sleep(Duration::from_millis(50));

        pump(&mut server, |s| s.connection_count() == 2);
        assert!(server.is_accepting());

        sender
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        assert_eq!(read_frame(&mut sender).1, b"201\x03");

        watcher
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let (header, body) = read_frame(&mut watcher);
        assert_eq!(header.object(), Some(Object::Message));
        assert_eq!(
            RequestBody::parse(&header, &body).unwrap(),
            RequestBody::CreateMessage {
                channel_name: "general".into(),
                display_name: "alice".into(),
                timestamp: 0x18c2f1a9b00,
                content: "hello".into(),
            }
        );
    }

    #[test]
    fn test_shutdown_from_another_thread() {
        let mut server = server();
        let handle = server.shutdown_handle();
        assert!(!handle.is_requested());

        let signaller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            handle.request();
        });

        server.run().unwrap();
        signaller.join().unwrap();
        assert!(server.shutdown_handle().is_requested());
    }
}
