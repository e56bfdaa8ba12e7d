use crate::config::ClientOptions;
use crate::constants::{CONTROL_BUFFER_SIZE, MAX_SEND_OPERATIONS};
use crate::core_error::{BufferOverflow, ClientError, EnqueueError, PollStatus, ProtocolError};
use crate::core_ftpcommand::ftpcommand::is_valid_argument;
use crate::core_ftpcommand::{FtpCommand, Reply};
use crate::core_network::buffer::ControlBuffer;
use crate::core_network::pasv::{parse_pasv_reply, resolve_data_endpoint};
use crate::core_network::socket::{check_connected, is_transient, open_nonblocking, OpenError};
use crate::core_transfer::{CompletionCallback, SendOperation, SendQueue, SlotProgress, Source};
use crate::session::{transition, ConnectionState, Credentials, Transition};
use log::{debug, error, info, trace, warn};
use mio::net::TcpStream;
use mio::{Events, Interest, Poll, Token};
use std::fs::File;
use std::io::{self, Read};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::Path;
use std::time::{Duration, Instant};

const CONTROL: Token = Token(0);
const DATA_TOKEN_BASE: usize = 1;

fn data_token(slot: usize) -> Token {
    Token(DATA_TOKEN_BASE + slot)
}

/// Descriptors reported ready by one readiness wait.
#[derive(Default)]
struct Readiness {
    control_read: bool,
    control_write: bool,
    data_write: [bool; MAX_SEND_OPERATIONS],
}

impl Readiness {
    fn is_idle(&self) -> bool {
        !self.control_read && !self.control_write && !self.data_write.iter().any(|w| *w)
    }
}

/// Effect of one reply line, computed while the line is still borrowed from the receive buffer.
enum ReplyStep {
    Enter(ConnectionState),
    RejectPassword,
    Passive(Result<SocketAddrV4, ProtocolError>),
    OpenDataChannel,
    Ignore,
}

/// Non-blocking passive-mode FTP upload client.
///
/// Everything happens inside [`FtpClient::poll`]: each call waits once for readiness of the
/// control socket and the open data sockets, then processes at most one reply line, one
/// control write and one write per ready data socket. Borrowed upload buffers live for `'a`.
pub struct FtpClient<'a> {
    control_addr: SocketAddrV4,
    data_addr: Option<SocketAddrV4>,
    credentials: Credentials,
    options: ClientOptions,
    state: ConnectionState,
    control: Option<TcpStream>,
    poll: Poll,
    events: Events,
    recv_buffer: ControlBuffer,
    send_buffer: ControlBuffer,
    queue: SendQueue<'a>,
    last_error: Option<i32>,
}

fn owned_copy(value: Option<&str>, what: &str) -> Result<Option<String>, ClientError> {
    let Some(value) = value else {
        return Ok(None);
    };
    if !is_valid_argument(value) {
        return Err(ClientError::Context(format!(
            "{} must be non-empty and free of CR/LF",
            what
        )));
    }
    let mut owned = String::new();
    owned
        .try_reserve_exact(value.len())
        .map_err(|e| ClientError::Resource(format!("{}: {}", what, e)))?;
    owned.push_str(value);
    Ok(Some(owned))
}

impl<'a> FtpClient<'a> {
    pub fn new(
        ip: Ipv4Addr,
        port: u16,
        username: Option<&str>,
        password: Option<&str>,
    ) -> Result<Self, ClientError> {
        Self::with_options(ip, port, username, password, ClientOptions::default())
    }

    pub fn with_options(
        ip: Ipv4Addr,
        port: u16,
        username: Option<&str>,
        password: Option<&str>,
        options: ClientOptions,
    ) -> Result<Self, ClientError> {
        if ip.is_unspecified() || ip.is_broadcast() {
            return Err(ClientError::Context(format!("invalid server address {}", ip)));
        }
        if port == 0 {
            return Err(ClientError::Context("server port must not be zero".to_string()));
        }

        let credentials = Credentials {
            username: owned_copy(username, "username")?,
            password: owned_copy(password, "password")?,
        };
        let poll = Poll::new()
            .map_err(|e| ClientError::Resource(format!("readiness poller: {}", e)))?;

        Ok(Self {
            control_addr: SocketAddrV4::new(ip, port),
            data_addr: None,
            credentials,
            options,
            state: ConnectionState::Disconnected,
            control: None,
            poll,
            events: Events::with_capacity(MAX_SEND_OPERATIONS + 1),
            recv_buffer: ControlBuffer::new(),
            send_buffer: ControlBuffer::new(),
            queue: SendQueue::new(),
            last_error: None,
        })
    }

    /// Opens the control connection and waits up to `timeout` for it to complete.
    ///
    /// A zero timeout selects the configured default. Does nothing if the client is already
    /// fully connected.
    pub fn connect(&mut self, timeout: Duration) -> Result<(), ClientError> {
        if self.state.is_fully_connected() && self.control.is_some() {
            return Ok(());
        }

        self.close();
        self.recv_buffer.clear();
        self.send_buffer.clear();
        self.data_addr = None;
        self.state = ConnectionState::Disconnected;

        let timeout = if timeout.is_zero() {
            self.options.connect_timeout
        } else {
            timeout
        };

        info!("Connecting to {} (timeout {:?})", self.control_addr, timeout);
        let mut stream = match open_nonblocking(self.control_addr) {
            Ok(stream) => stream,
            Err(OpenError::Create(e)) => return Err(self.record(ClientError::SocketCreate(e))),
            Err(OpenError::Connect(e)) => return Err(self.record(ClientError::Connect(e))),
        };
        let registered = self
            .poll
            .registry()
            .register(&mut stream, CONTROL, Interest::WRITABLE);
        if let Err(e) = registered {
            return Err(self.record(ClientError::SocketCreate(e)));
        }

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                let _ = self.poll.registry().deregister(&mut stream);
                warn!("Connection to {} timed out", self.control_addr);
                return Err(ClientError::ConnectTimeout);
            }

            if let Err(e) = self.poll.poll(&mut self.events, Some(remaining)) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                let _ = self.poll.registry().deregister(&mut stream);
                return Err(self.record(ClientError::Connect(e)));
            }
            if !self.events.iter().any(|event| event.token() == CONTROL) {
                continue;
            }

            match check_connected(&stream) {
                Ok(true) => break,
                Ok(false) => continue,
                Err(e) => {
                    let _ = self.poll.registry().deregister(&mut stream);
                    warn!("Connection to {} failed: {}", self.control_addr, e);
                    return Err(self.record(ClientError::Connect(e)));
                }
            }
        }

        let reregistered = self
            .poll
            .registry()
            .reregister(&mut stream, CONTROL, Interest::READABLE);
        if let Err(e) = reregistered {
            let _ = self.poll.registry().deregister(&mut stream);
            return Err(self.record(ClientError::Connect(e)));
        }

        self.control = Some(stream);
        self.state = ConnectionState::AwaitBanner;
        info!("Connected to {}, awaiting banner", self.control_addr);
        Ok(())
    }

    /// Closes the control connection. Queued uploads are left untouched.
    pub fn close(&mut self) {
        if let Some(mut stream) = self.control.take() {
            let _ = self.poll.registry().deregister(&mut stream);
            debug!("Control connection to {} closed", self.control_addr);
        }
        if !self.state.is_terminal() {
            self.state = ConnectionState::Disconnected;
        }
    }

    /// Closes every socket and drops every queued upload without invoking its callback.
    pub fn destroy(self) {
        drop(self);
    }

    /// Runs one poll step. Call repeatedly until it returns an error.
    pub fn poll(&mut self, timeout: Duration) -> Result<PollStatus, ClientError> {
        if self.control.is_none() {
            return Err(ClientError::Context(
                "control connection is not open".to_string(),
            ));
        }

        self.register_interest()?;

        // A complete line left over from an earlier read is processed without waiting.
        let line_buffered = self.recv_buffer.has_line();
        let wait = if line_buffered { Duration::ZERO } else { timeout };

        if let Err(e) = self.poll.poll(&mut self.events, Some(wait)) {
            if e.kind() == io::ErrorKind::Interrupted {
                return Ok(PollStatus::Timeout);
            }
            error!("Readiness wait failed: {}", e);
            return Err(self.record(ClientError::SelectFailed(e)));
        }

        let ready = self.collect_readiness();
        if ready.is_idle() && !line_buffered {
            return Ok(PollStatus::Timeout);
        }

        self.service_control_read(ready.control_read)?;

        if ready.control_write && !self.send_buffer.is_empty() {
            self.service_control_write()?;
        }

        for (slot, writable) in ready.data_write.iter().enumerate() {
            if *writable {
                self.service_slot(slot);
            }
        }

        Ok(PollStatus::Progress)
    }

    fn register_interest(&mut self) -> Result<(), ClientError> {
        let interest = if self.send_buffer.is_empty() {
            Interest::READABLE
        } else {
            Interest::READABLE | Interest::WRITABLE
        };

        let rearmed = match self.control.as_mut() {
            Some(control) => self.poll.registry().reregister(control, CONTROL, interest),
            None => Ok(()),
        };
        if let Err(e) = rearmed {
            return Err(self.fail_control(ClientError::SelectFailed(e)));
        }

        let streaming: Vec<usize> = self.queue.streaming_slots().collect();
        let mut broken = Vec::new();
        let registry = self.poll.registry();
        for slot in streaming {
            let Some(stream) = self.queue.get_mut(slot).and_then(|op| op.stream_mut()) else {
                continue;
            };
            if let Err(e) = registry.reregister(stream, data_token(slot), Interest::WRITABLE) {
                broken.push((slot, e));
            }
        }
        for (slot, e) in broken {
            self.fail_slot(slot, ClientError::DataSocketConnect(e));
        }

        Ok(())
    }

    fn collect_readiness(&self) -> Readiness {
        let mut ready = Readiness::default();
        for event in self.events.iter() {
            match event.token() {
                CONTROL => {
                    ready.control_read |=
                        event.is_readable() || event.is_read_closed() || event.is_error();
                    ready.control_write |= event.is_writable() || event.is_write_closed();
                }
                Token(token) if token >= DATA_TOKEN_BASE => {
                    if let Some(flag) = ready.data_write.get_mut(token - DATA_TOKEN_BASE) {
                        *flag = true;
                    }
                }
                _ => {}
            }
        }
        ready
    }

    fn service_control_read(&mut self, readable: bool) -> Result<(), ClientError> {
        if readable {
            if self.recv_buffer.is_full() && !self.recv_buffer.has_line() {
                return Err(self.fail_control(ProtocolError::ReplyTooLong(CONTROL_BUFFER_SIZE).into()));
            }
            if let Some(control) = self.control.as_mut() {
                if !self.recv_buffer.is_full() {
                    match self.recv_buffer.fill_from(control) {
                        Ok(0) => return Err(self.fail_control(ClientError::RemoteClosed)),
                        Ok(_) => {}
                        Err(e) if is_transient(&e) => {}
                        Err(e) => return Err(self.fail_control(ClientError::Read(e))),
                    }
                }
            }
        }
        self.dispatch_line()
    }

    fn service_control_write(&mut self) -> Result<(), ClientError> {
        let Some(control) = self.control.as_mut() else {
            return Ok(());
        };
        match self.send_buffer.drain_to(control) {
            Ok(0) => Err(self.fail_control(ClientError::RemoteClosed)),
            Ok(_) => Ok(()),
            Err(e) if is_transient(&e) => Ok(()),
            Err(e) => Err(self.fail_control(ClientError::Write(e))),
        }
    }

    /// Handles the first complete reply line, if any.
    fn dispatch_line(&mut self) -> Result<(), ClientError> {
        let Some(line_len) = self.recv_buffer.line_len() else {
            return Ok(());
        };

        let step = {
            let line = &self.recv_buffer.as_slice()[..line_len];
            debug!("<- {}", String::from_utf8_lossy(line));

            match Reply::from_line(line) {
                None => ReplyStep::Ignore,
                Some(reply) => match transition(self.state, reply, &self.credentials) {
                    Transition::Stage(command, next) => {
                        if let Err(overflow) = command.stage_into(&mut self.send_buffer) {
                            warn!("Cannot stage {}: {}", command.verb(), overflow);
                            return Err(overflow.into());
                        }
                        debug!("-> {}", command);
                        ReplyStep::Enter(next)
                    }
                    Transition::Enter(next) => ReplyStep::Enter(next),
                    Transition::RejectPassword => ReplyStep::RejectPassword,
                    Transition::EnterPassive => ReplyStep::Passive(parse_pasv_reply(line)),
                    Transition::OpenDataChannel => ReplyStep::OpenDataChannel,
                    // Transfer completions and the like arrive while fully connected.
                    Transition::Ignore if self.state.is_fully_connected() => {
                        trace!("Ignoring {:?}", reply);
                        ReplyStep::Ignore
                    }
                    Transition::Ignore => {
                        warn!("Unexpected {:?} in state {:?}", reply, self.state);
                        ReplyStep::Ignore
                    }
                },
            }
        };
        self.recv_buffer.consume_line();

        match step {
            ReplyStep::Enter(next) => self.enter(next),
            ReplyStep::RejectPassword => {
                warn!("Server requested a password but none is configured");
                self.state = ConnectionState::PasswordRejected;
                self.close();
                return Err(ClientError::PasswordRejected);
            }
            ReplyStep::Passive(Ok(announced)) => {
                let endpoint = resolve_data_endpoint(
                    announced,
                    self.control_addr,
                    self.options.force_pasv_ip_to_control_ip,
                );
                self.data_addr = Some(endpoint);
                if self.state.is_fully_connected() {
                    debug!("Data endpoint refreshed to {}", endpoint);
                } else {
                    info!("Passive data endpoint is {}", endpoint);
                    self.enter(ConnectionState::FullyConnected);
                }
            }
            ReplyStep::Passive(Err(e)) => return Err(self.fail_control(e.into())),
            ReplyStep::OpenDataChannel => self.open_data_channel(),
            ReplyStep::Ignore => {}
        }
        Ok(())
    }

    fn enter(&mut self, next: ConnectionState) {
        debug!("State {:?} -> {:?}", self.state, next);
        self.state = next;
        if next.is_fully_connected() {
            info!("Fully connected to {}", self.control_addr);
        }
    }

    /// Opens the data channel of the upload the server just acknowledged with `150`.
    fn open_data_channel(&mut self) {
        let Some(slot) = self.queue.next_awaiting_channel() else {
            warn!("Transfer starting reply received with no upload waiting for a channel");
            return;
        };

        let opened = match self.data_addr {
            None => Err(ClientError::DataSocketConnect(io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                "no passive data endpoint negotiated",
            ))),
            Some(addr) => open_nonblocking(addr).map_err(|e| match e {
                OpenError::Create(e) => ClientError::DataSocketCreate(e),
                OpenError::Connect(e) => ClientError::DataSocketConnect(e),
            }),
        };

        let mut stream = match opened {
            Ok(stream) => stream,
            Err(e) => return self.fail_slot(slot, e),
        };
        let registered = self
            .poll
            .registry()
            .register(&mut stream, data_token(slot), Interest::WRITABLE);
        if let Err(e) = registered {
            return self.fail_slot(slot, ClientError::DataSocketCreate(e));
        }

        if let Some(operation) = self.queue.get_mut(slot) {
            debug!(
                "Opening data channel for {} in slot {}",
                operation.remote_name(),
                slot
            );
            operation.attach_stream(stream);
        }
    }

    fn service_slot(&mut self, slot: usize) {
        let progress = match self.queue.get_mut(slot) {
            Some(operation) => operation.service(),
            None => return,
        };
        match progress {
            SlotProgress::Pending => {}
            SlotProgress::Completed => self.complete_slot(slot),
            SlotProgress::Failed(e) => self.fail_slot(slot, e),
        }
    }

    fn complete_slot(&mut self, slot: usize) {
        if let Some(operation) = self.queue.take(slot) {
            info!(
                "Upload of {} complete ({} bytes)",
                operation.remote_name(),
                operation.bytes_sent()
            );
            operation.finish(self.poll.registry(), true);
        }
    }

    fn fail_slot(&mut self, slot: usize, err: ClientError) {
        let err = self.record(err);
        if let Some(operation) = self.queue.take(slot) {
            warn!(
                "Upload of {} failed after {} bytes: {}",
                operation.remote_name(),
                operation.bytes_sent(),
                err
            );
            operation.finish(self.poll.registry(), false);
        }
    }

    fn fail_control(&mut self, err: ClientError) -> ClientError {
        error!("Control connection to {} failed: {}", self.control_addr, err);
        self.close();
        self.record(err)
    }

    fn record(&mut self, err: ClientError) -> ClientError {
        if let Some(code) = err.raw_os_error() {
            self.last_error = Some(code);
        }
        err
    }

    /// Queues an upload of a caller-owned buffer, which stays borrowed until the client is dropped.
    pub fn enqueue_send(
        &mut self,
        remote_name: &str,
        buffer: &'a [u8],
        on_complete: Option<CompletionCallback<'a>>,
    ) -> Result<usize, EnqueueError> {
        if buffer.is_empty() {
            return Err(EnqueueError::InvalidArgument("buffer is empty"));
        }
        self.enqueue(remote_name, || Ok(Source::Borrowed(buffer)), on_complete)
    }

    /// Queues an upload of a private copy of `buffer`.
    pub fn enqueue_copy(
        &mut self,
        remote_name: &str,
        buffer: &[u8],
        on_complete: Option<CompletionCallback<'a>>,
    ) -> Result<usize, EnqueueError> {
        if buffer.is_empty() {
            return Err(EnqueueError::InvalidArgument("buffer is empty"));
        }
        self.enqueue(
            remote_name,
            || {
                let mut copy = Vec::new();
                copy.try_reserve_exact(buffer.len())?;
                copy.extend_from_slice(buffer);
                Ok(Source::Owned(copy))
            },
            on_complete,
        )
    }

    /// Queues an upload of a local file. Without `remote_name` the local path is used as given.
    pub fn enqueue_send_file(
        &mut self,
        local_path: impl AsRef<Path>,
        remote_name: Option<&str>,
        on_complete: Option<CompletionCallback<'a>>,
    ) -> Result<usize, EnqueueError> {
        let local_path = local_path.as_ref();
        let remote_name = match remote_name {
            Some(name) => name,
            None => local_path
                .to_str()
                .ok_or(EnqueueError::InvalidArgument("local path is not valid UTF-8"))?,
        };
        self.enqueue(
            remote_name,
            || {
                let file = File::open(local_path).map_err(|source| EnqueueError::FileOpen {
                    path: local_path.to_path_buf(),
                    source,
                })?;
                Ok(Source::Reader(Box::new(file)))
            },
            on_complete,
        )
    }

    /// Queues an upload streamed from any reader.
    pub fn enqueue_send_reader<R: Read + 'a>(
        &mut self,
        remote_name: &str,
        reader: R,
        on_complete: Option<CompletionCallback<'a>>,
    ) -> Result<usize, EnqueueError> {
        self.enqueue(
            remote_name,
            move || Ok(Source::Reader(Box::new(reader))),
            on_complete,
        )
    }

    /// Shared validation and staging. Every check runs before anything is mutated.
    fn enqueue<F>(
        &mut self,
        remote_name: &str,
        source: F,
        on_complete: Option<CompletionCallback<'a>>,
    ) -> Result<usize, EnqueueError>
    where
        F: FnOnce() -> Result<Source<'a>, EnqueueError>,
    {
        if !self.is_fully_connected() {
            return Err(EnqueueError::NotConnected);
        }
        if !is_valid_argument(remote_name) {
            return Err(EnqueueError::InvalidArgument(
                "remote name must be non-empty and free of CR/LF",
            ));
        }
        let slot = self
            .queue
            .free_slot()
            .ok_or(EnqueueError::NoFreeSlot(self.queue.capacity()))?;

        let store = FtpCommand::Stor(remote_name);
        let mut needed = store.wire_len();
        if self.options.pasv_per_transfer {
            needed += FtpCommand::Pasv.wire_len();
        }
        if needed > self.send_buffer.available() {
            return Err(BufferOverflow {
                needed,
                available: self.send_buffer.available(),
            }
            .into());
        }

        let source = source()?;

        if self.options.pasv_per_transfer {
            FtpCommand::Pasv.stage_into(&mut self.send_buffer)?;
        }
        store.stage_into(&mut self.send_buffer)?;
        debug!("-> {} (slot {})", store, slot);

        self.queue
            .insert_at(slot, SendOperation::new(remote_name, source, on_complete));
        Ok(slot)
    }

    pub fn is_fully_connected(&self) -> bool {
        self.state.is_fully_connected()
    }

    /// Outgoing control bytes are buffered or an upload is still queued.
    pub fn has_pending_work(&self) -> bool {
        !self.send_buffer.is_empty() || !self.queue.is_empty()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Most recent platform error code captured from a failing system call.
    pub fn last_platform_error(&self) -> Option<i32> {
        self.last_error
    }

    pub fn free_slots(&self) -> usize {
        self.queue.free_count()
    }

    pub fn data_endpoint(&self) -> Option<SocketAddrV4> {
        self.data_addr
    }

    pub fn server_endpoint(&self) -> SocketAddrV4 {
        self.control_addr
    }

    /// Number of control bytes staged but not yet written.
    pub fn pending_control_bytes(&self) -> usize {
        self.send_buffer.len()
    }
}

impl Drop for FtpClient<'_> {
    fn drop(&mut self) {
        self.close();
        self.queue.clear();
    }
}
