//! UDP announcement listener.
//!
//! Stations announce themselves with a single fixed-layout datagram. The
//! listener binds the wildcard address of the configured family (reuse-addr
//! set before bind), joins the group when the configured address is
//! multicast, and forwards every decodable announcement to the supervisor.
//! Anything malformed is logged and dropped; a socket error is fatal and
//! reported as a fault event.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use log::{error, trace, warn};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use crate::errors::Error;
use crate::packet::{Packet, PACKET_SIZE};
use crate::supervisor::Event;

/// Default announcement port.
pub const GENESIS_PORT: u16 = 9255;

pub struct Listener {
    socket: UdpSocket,
}

impl Listener {
    /// Binds the announcement socket. `address` selects the family and,
    /// when multicast, the group to join; listening itself is always on the
    /// family's wildcard address.
    pub fn bind(address: IpAddr, port: u16) -> Result<Self, Error> {
        let domain = match address {
            IpAddr::V4(_) => Domain::IPV4,
            IpAddr::V6(_) => Domain::IPV6,
        };

        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;

        let wildcard: SocketAddr = match address {
            IpAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, port).into(),
            IpAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, port).into(),
        };
        socket.bind(&wildcard.into())?;
        socket.set_nonblocking(true)?;

        let socket = UdpSocket::from_std(socket.into())?;

        match address {
            IpAddr::V4(group) if group.is_multicast() => {
                socket.join_multicast_v4(group, Ipv4Addr::UNSPECIFIED)?;
            },
            IpAddr::V6(group) if group.is_multicast() => {
                socket.join_multicast_v6(&group, 0)?;
            },
            _ => {},
        }

        Ok(Self { socket })
    }

    /// Local socket address, useful when bound to port 0.
    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        Ok(self.socket.local_addr()?)
    }

    /// Receives announcements until the socket fails or the supervisor goes
    /// away. Consumes the listener; run it as a task.
    pub async fn run(self, events: mpsc::Sender<Event>) {
        // one datagram at a time; oversized announcements must not alias a
        // valid 21-byte prefix
        let mut data = [0u8; PACKET_SIZE + 1];

        loop {
            match self.socket.recv_from(&mut data).await {
                Ok((received, sender)) => {
                    if received != PACKET_SIZE {
                        warn!(
                            "dropping announcement of {} bytes from {}",
                            received, sender,
                        );
                        continue;
                    }

                    let station = match Packet::decode(&data[..received]) {
                        Ok(packet) => packet.into_station(sender.ip().to_string()),
                        Err(e) => {
                            warn!("undecodable announcement from {}: {}", sender, e);
                            continue;
                        },
                    };

                    trace!("received station packet from {}: {}", sender, station);
                    if events.send(Event::Announcement(station)).await.is_err() {
                        break;
                    }
                },
                Err(e) => {
                    error!("announcement socket failed: {}", e);
                    let _ = events.send(Event::Fault(e)).await;
                    break;
                },
            }
        }
    }
}
