//! SO_REUSEPORT-enabled UDP socket helper. Spec §4.2/§6: every outbound
//! REGISTER socket must share the SIP listener's port so the PBX always
//! sees requests from the same source port.

use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};

pub fn bind_reuseport(port: u16, read_timeout: Option<Duration>) -> std::io::Result<UdpSocket> {
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_reuse_port(true)?;
    socket.bind(&addr.into())?;
    if let Some(timeout) = read_timeout {
        socket.set_read_timeout(Some(timeout))?;
    }
    Ok(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_sockets_can_share_one_port() {
        let a = bind_reuseport(0, None).unwrap();
        let port = a.local_addr().unwrap().port();
        let b = bind_reuseport(port, None);
        assert!(b.is_ok());
    }
}
