mod support;

use rouilleftpc::constants::MAX_SEND_OPERATIONS;
use rouilleftpc::{ClientError, ClientOptions, ConnectionState, FtpClient, ProtocolError};
use std::cell::Cell;
use std::io::{self, Read};
use std::net::{Ipv4Addr, TcpListener};
use std::rc::Rc;
use std::time::Duration;
use support::{drive_until, drive_until_error, init_logging, logged_in_client, Behavior, MockServer};

/// Yields `remaining` bytes, then fails every read.
struct BrokenReader {
    remaining: usize,
}

impl Read for BrokenReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 {
            return Err(io::Error::new(io::ErrorKind::Other, "medium removed"));
        }
        let n = buf.len().min(self.remaining);
        buf[..n].fill(b'x');
        self.remaining -= n;
        Ok(n)
    }
}

fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Polls until the callback has reported; every poll in between must succeed.
fn wait_for_outcome(client: &mut FtpClient<'_>, outcome: &Rc<Cell<Option<bool>>>) {
    let reported = drive_until(client, Duration::from_secs(5), |_| outcome.get().is_some())
        .expect("slot failures must not fail the poll");
    assert!(reported, "completion callback never fired");
}

#[test]
fn test_refused_data_connection_fails_only_its_slot() {
    init_logging();
    let server = MockServer::start(Behavior {
        announce_port: Some(closed_port()),
        stor_without_channel: true,
        ..Behavior::default()
    });
    let outcome = Rc::new(Cell::new(None));
    let mut client = logged_in_client(&server, Some("user"), None, ClientOptions::default());

    let flag = Rc::clone(&outcome);
    client
        .enqueue_copy("refused.txt", b"data", Some(Box::new(move |ok| flag.set(Some(ok)))))
        .unwrap();
    wait_for_outcome(&mut client, &outcome);

    assert_eq!(outcome.get(), Some(false));
    assert_eq!(client.state(), ConnectionState::FullyConnected);
    assert_eq!(client.free_slots(), MAX_SEND_OPERATIONS);
    #[cfg(unix)]
    assert_eq!(client.last_platform_error(), Some(libc::ECONNREFUSED));
    assert!(client.poll(Duration::from_millis(10)).is_ok());
}

#[test]
fn test_transfer_start_before_pasv_fails_the_slot() {
    init_logging();
    let server = MockServer::start(Behavior {
        stor_without_channel: true,
        ..Behavior::default()
    });
    let outcome = Rc::new(Cell::new(None));
    let mut client = logged_in_client(&server, None, None, ClientOptions::default());
    assert!(client.data_endpoint().is_none());

    let flag = Rc::clone(&outcome);
    client
        .enqueue_copy("early.txt", b"data", Some(Box::new(move |ok| flag.set(Some(ok)))))
        .unwrap();
    wait_for_outcome(&mut client, &outcome);

    assert_eq!(outcome.get(), Some(false));
    assert!(client.is_fully_connected());
    assert!(!client.has_pending_work());
}

#[test]
fn test_reader_failure_mid_upload_fails_only_its_slot() {
    init_logging();
    let server = MockServer::start(Behavior::default());
    let outcome = Rc::new(Cell::new(None));
    let mut client = logged_in_client(&server, Some("user"), None, ClientOptions::default());

    let flag = Rc::clone(&outcome);
    client
        .enqueue_send_reader(
            "broken.bin",
            BrokenReader { remaining: 4096 },
            Some(Box::new(move |ok| flag.set(Some(ok)))),
        )
        .unwrap();
    wait_for_outcome(&mut client, &outcome);

    assert_eq!(outcome.get(), Some(false));
    assert!(client.is_fully_connected());
    assert_eq!(client.free_slots(), MAX_SEND_OPERATIONS);

    // The control channel still carries new uploads.
    client.enqueue_copy("after.txt", b"still fine", None).unwrap();
    assert!(drive_until(&mut client, Duration::from_secs(10), |c| !c.has_pending_work()).unwrap());
    let uploads = server.wait_for_uploads(2, Duration::from_secs(5));
    assert!(uploads.contains(&("after.txt".to_string(), b"still fine".to_vec())));
}

#[test]
fn test_malformed_pasv_reply_closes_control_connection() {
    init_logging();
    let server = MockServer::start(Behavior {
        malformed_pasv: true,
        ..Behavior::default()
    });
    let mut client = FtpClient::new(Ipv4Addr::LOCALHOST, server.port(), Some("user"), None).unwrap();
    client.connect(Duration::from_secs(2)).unwrap();

    let err = drive_until_error(&mut client, Duration::from_secs(5)).unwrap();
    assert!(
        matches!(err, ClientError::Protocol(ProtocolError::InvalidPasvReply(_))),
        "{:?}",
        err
    );
    assert_eq!(err.code(), 2001);
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert!(matches!(
        client.poll(Duration::from_millis(10)),
        Err(ClientError::Context(_))
    ));
}

#[test]
fn test_one_reply_line_per_poll() {
    init_logging();
    let server = MockServer::start(Behavior {
        greeting_tail: Some("230 User logged in"),
        ..Behavior::default()
    });
    let mut client = FtpClient::new(Ipv4Addr::LOCALHOST, server.port(), Some("user"), None).unwrap();
    client.connect(Duration::from_secs(2)).unwrap();
    assert_eq!(client.state(), ConnectionState::AwaitBanner);

    client.poll(Duration::from_secs(2)).unwrap();
    assert_eq!(client.state(), ConnectionState::AwaitUserAck);

    // The 230 is already buffered and is handled without waiting.
    client.poll(Duration::from_secs(2)).unwrap();
    assert_eq!(client.state(), ConnectionState::AwaitTypeAck);
}
