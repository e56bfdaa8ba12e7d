#![allow(dead_code)]

use rouilleftpc::{ClientError, ClientOptions, FtpClient};
use std::io;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Runtime;

pub const BUFFER: &[u8] = b"This is the content of the buffer\r\nWith two lines.\r\n";
pub const FILE_LINE: &str = "abcdefghijklmnopqrstuvwxyz1234567890\r\n";
pub const FILE_LINES: usize = 112;

/// How the mock server deviates from a plain, cooperative FTP server.
#[derive(Debug, Clone, Copy, Default)]
pub struct Behavior {
    /// Answer `USER` with 331 instead of logging in straight away.
    pub require_password: bool,
    /// Write replies one byte at a time.
    pub fragment_replies: bool,
    /// Close the control connection right after the banner.
    pub hang_up_after_banner: bool,
    /// Extra reply lines written in the same segment as the banner.
    pub greeting_tail: Option<&'static str>,
    /// Port announced in the 227 reply; no data listener is opened.
    pub announce_port: Option<u16>,
    /// Answer PASV with a 227 that has no address tuple.
    pub malformed_pasv: bool,
    /// Answer STOR with 150 without waiting for a data connection.
    pub stor_without_channel: bool,
}

#[derive(Debug, Default)]
pub struct Recorded {
    pub commands: Vec<String>,
    pub uploads: Vec<(String, Vec<u8>)>,
}

/// Minimal passive-mode FTP server running on its own tokio runtime.
pub struct MockServer {
    _runtime: Runtime,
    port: u16,
    recorded: Arc<Mutex<Recorded>>,
}

impl MockServer {
    pub fn start(behavior: Behavior) -> Self {
        let runtime = Runtime::new().expect("tokio runtime");
        let listener = runtime
            .block_on(TcpListener::bind("127.0.0.1:0"))
            .expect("bind control listener");
        let port = listener.local_addr().expect("control address").port();
        let recorded = Arc::new(Mutex::new(Recorded::default()));

        let shared = Arc::clone(&recorded);
        runtime.spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let shared = Arc::clone(&shared);
                tokio::spawn(async move {
                    let _ = handle_session(socket, behavior, shared).await;
                });
            }
        });

        Self {
            _runtime: runtime,
            port,
            recorded,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn commands(&self) -> Vec<String> {
        self.recorded.lock().unwrap().commands.clone()
    }

    pub fn count(&self, verb: &str) -> usize {
        self.commands()
            .iter()
            .filter(|command| command.split(' ').next() == Some(verb))
            .count()
    }

    pub fn uploads(&self) -> Vec<(String, Vec<u8>)> {
        self.recorded.lock().unwrap().uploads.clone()
    }

    /// Waits until at least `count` uploads have been fully received.
    pub fn wait_for_uploads(&self, count: usize, within: Duration) -> Vec<(String, Vec<u8>)> {
        let deadline = Instant::now() + within;
        loop {
            let uploads = self.uploads();
            if uploads.len() >= count || Instant::now() >= deadline {
                return uploads;
            }
            thread::sleep(Duration::from_millis(10));
        }
    }
}

async fn send_reply(writer: &mut OwnedWriteHalf, text: &str, behavior: Behavior) -> io::Result<()> {
    let line = format!("{}\r\n", text);
    if behavior.fragment_replies {
        for byte in line.as_bytes() {
            writer.write_all(&[*byte]).await?;
            writer.flush().await?;
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    } else {
        writer.write_all(line.as_bytes()).await?;
    }
    Ok(())
}

async fn handle_session(
    socket: TcpStream,
    behavior: Behavior,
    recorded: Arc<Mutex<Recorded>>,
) -> io::Result<()> {
    let (reader, mut writer) = socket.into_split();
    let mut reader = BufReader::new(reader);

    let banner = match behavior.greeting_tail {
        Some(tail) => format!("220 Mock FTP server ready\r\n{}", tail),
        None => "220 Mock FTP server ready".to_string(),
    };
    send_reply(&mut writer, &banner, behavior).await?;
    if behavior.hang_up_after_banner {
        return Ok(());
    }

    let mut data_listener: Option<TcpListener> = None;
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(());
        }
        let command = line.trim_end_matches(&['\r', '\n'][..]).to_string();
        recorded.lock().unwrap().commands.push(command.clone());

        let (verb, argument) = command.split_once(' ').unwrap_or((command.as_str(), ""));
        match verb {
            "USER" if behavior.require_password => {
                send_reply(&mut writer, "331 User name okay, need password", behavior).await?
            }
            "USER" | "PASS" => send_reply(&mut writer, "230 User logged in", behavior).await?,
            "TYPE" => send_reply(&mut writer, "200 Type set to I", behavior).await?,
            "PASV" if behavior.malformed_pasv => {
                send_reply(&mut writer, "227 Entering Passive Mode 127,0,0,1,4,1", behavior).await?
            }
            "PASV" => {
                let port = match behavior.announce_port {
                    Some(port) => port,
                    None => {
                        let listener = TcpListener::bind("127.0.0.1:0").await?;
                        let port = listener.local_addr()?.port();
                        data_listener = Some(listener);
                        port
                    }
                };
                let reply = format!(
                    "227 Entering Passive Mode (127,0,0,1,{},{})",
                    port >> 8,
                    port & 0xff
                );
                send_reply(&mut writer, &reply, behavior).await?;
            }
            "STOR" if behavior.stor_without_channel => {
                send_reply(&mut writer, "150 Opening BINARY mode data connection", behavior)
                    .await?
            }
            "STOR" => match &data_listener {
                None => send_reply(&mut writer, "425 Use PASV first", behavior).await?,
                Some(listener) => {
                    send_reply(&mut writer, "150 Opening BINARY mode data connection", behavior)
                        .await?;
                    let (mut data, _) = listener.accept().await?;
                    let mut content = Vec::new();
                    data.read_to_end(&mut content).await?;
                    recorded
                        .lock()
                        .unwrap()
                        .uploads
                        .push((argument.to_string(), content));
                    send_reply(&mut writer, "226 Transfer complete", behavior).await?;
                }
            },
            "QUIT" => {
                send_reply(&mut writer, "221 Goodbye", behavior).await?;
                return Ok(());
            }
            _ => send_reply(&mut writer, "502 Command not implemented", behavior).await?,
        }
    }
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Polls until `done` holds, returning false if `within` elapses first.
pub fn drive_until<'a>(
    client: &mut FtpClient<'a>,
    within: Duration,
    mut done: impl FnMut(&FtpClient<'a>) -> bool,
) -> Result<bool, ClientError> {
    let deadline = Instant::now() + within;
    while !done(client) {
        if Instant::now() >= deadline {
            return Ok(false);
        }
        client.poll(Duration::from_millis(10))?;
    }
    Ok(true)
}

/// Polls until the first error, or `None` if `within` elapses first.
pub fn drive_until_error(client: &mut FtpClient<'_>, within: Duration) -> Option<ClientError> {
    let deadline = Instant::now() + within;
    while Instant::now() < deadline {
        if let Err(e) = client.poll(Duration::from_millis(10)) {
            return Some(e);
        }
    }
    None
}

pub fn logged_in_client<'a>(
    server: &MockServer,
    username: Option<&str>,
    password: Option<&str>,
    options: ClientOptions,
) -> FtpClient<'a> {
    let mut client =
        FtpClient::with_options(Ipv4Addr::LOCALHOST, server.port(), username, password, options)
            .unwrap();
    client.connect(Duration::from_secs(2)).unwrap();
    assert!(drive_until(&mut client, Duration::from_secs(5), |c| c.is_fully_connected()).unwrap());
    client
}

pub fn finish_uploads(client: &mut FtpClient<'_>) {
    assert!(drive_until(client, Duration::from_secs(10), |c| !c.has_pending_work()).unwrap());
}

pub fn file_content() -> String {
    FILE_LINE.repeat(FILE_LINES)
}
