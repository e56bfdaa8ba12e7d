use crate::core_error::BufferOverflow;
use crate::core_network::buffer::ControlBuffer;
use std::fmt;

/// Commands the client sends on the control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FtpCommand<'a> {
    User(&'a str),
    Pass(&'a str),
    TypeImage,
    Pasv,
    Stor(&'a str),
}

impl<'a> FtpCommand<'a> {
    pub fn verb(&self) -> &'static str {
        match self {
            FtpCommand::User(_) => "USER",
            FtpCommand::Pass(_) => "PASS",
            FtpCommand::TypeImage => "TYPE",
            FtpCommand::Pasv => "PASV",
            FtpCommand::Stor(_) => "STOR",
        }
    }

    pub fn argument(&self) -> Option<&'a str> {
        match self {
            FtpCommand::User(arg) | FtpCommand::Pass(arg) | FtpCommand::Stor(arg) => Some(arg),
            FtpCommand::TypeImage => Some("I"),
            FtpCommand::Pasv => None,
        }
    }

    /// Number of bytes the command occupies on the wire, CRLF included.
    pub fn wire_len(&self) -> usize {
        self.verb().len() + self.argument().map_or(0, |arg| arg.len() + 1) + 2
    }

    /// Appends the full command line to `buffer`, or nothing at all if it does not fit.
    pub fn stage_into(&self, buffer: &mut ControlBuffer) -> Result<(), BufferOverflow> {
        match self.argument() {
            Some(arg) => buffer.append(&[
                self.verb().as_bytes(),
                b" ",
                arg.as_bytes(),
                b"\r\n",
            ]),
            None => buffer.append(&[self.verb().as_bytes(), b"\r\n"]),
        }
    }
}

/// Log-friendly rendering; the password is masked.
impl fmt::Display for FtpCommand<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FtpCommand::Pass(_) => write!(f, "PASS ****"),
            _ => match self.argument() {
                Some(arg) => write!(f, "{} {}", self.verb(), arg),
                None => write!(f, "{}", self.verb()),
            },
        }
    }
}

/// Control lines must not carry their own terminators.
pub fn is_valid_argument(arg: &str) -> bool {
    !arg.is_empty() && !arg.contains(['\r', '\n'])
}
