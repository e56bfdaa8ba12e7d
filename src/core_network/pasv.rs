use crate::core_error::ProtocolError;
use log::debug;
use std::net::{Ipv4Addr, SocketAddrV4};

/// Extracts the data endpoint announced by a `227 Entering Passive Mode (h1,h2,h3,h4,p1,p2)` reply.
///
/// Only the first parenthesized group is considered. Each of the six fields must be a decimal
/// byte; the port is `p1 * 256 + p2`.
pub fn parse_pasv_reply(line: &[u8]) -> Result<SocketAddrV4, ProtocolError> {
    let text = String::from_utf8_lossy(line);
    let invalid = || ProtocolError::InvalidPasvReply(text.trim().to_string());

    let open = text.find('(').ok_or_else(invalid)?;
    let close = text[open..].find(')').ok_or_else(invalid)? + open;

    let parts: Vec<&str> = text[open + 1..close].split(',').collect();
    if parts.len() != 6 {
        return Err(invalid());
    }

    let fields: Result<Vec<u8>, _> = parts.iter().map(|x| x.trim().parse::<u8>()).collect();
    let fields = fields.map_err(|_| invalid())?;

    let ip = Ipv4Addr::new(fields[0], fields[1], fields[2], fields[3]);
    let port = (fields[4] as u16) << 8 | fields[5] as u16;
    debug!("PASV reply announces data endpoint {}:{}", ip, port);

    Ok(SocketAddrV4::new(ip, port))
}

/// Picks the address the data channel connects to.
///
/// Servers behind NAT often announce a private address; with `force_control_ip` the announced
/// octets are replaced by the control connection's address and only the port is kept.
pub fn resolve_data_endpoint(
    announced: SocketAddrV4,
    control: SocketAddrV4,
    force_control_ip: bool,
) -> SocketAddrV4 {
    if force_control_ip {
        SocketAddrV4::new(*control.ip(), announced.port())
    } else {
        announced
    }
}
