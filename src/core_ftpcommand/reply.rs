/// Replies the client reacts to, keyed on the three leading digits of the line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// 150
    TransferStarting,
    /// 200
    CommandOkay,
    /// 220
    ServiceReady,
    /// 227
    EnteringPassive,
    /// 230
    LoggedIn,
    /// 331
    NeedPassword,
    Other(u16),
}

impl Reply {
    /// Classifies a reply line. Lines that do not start with three digits yield `None`.
    pub fn from_line(line: &[u8]) -> Option<Reply> {
        let code = line.get(..3)?;
        if !code.iter().all(u8::is_ascii_digit) {
            return None;
        }
        let code = code
            .iter()
            .fold(0u16, |acc, digit| acc * 10 + u16::from(digit - b'0'));

        Some(match code {
            150 => Reply::TransferStarting,
            200 => Reply::CommandOkay,
            220 => Reply::ServiceReady,
            227 => Reply::EnteringPassive,
            230 => Reply::LoggedIn,
            331 => Reply::NeedPassword,
            other => Reply::Other(other),
        })
    }
}
