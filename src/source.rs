// SPDX-License-Identifier: Apache-2.0

//! Datagram source abstraction for the bridge pipeline.
//!
//! This module provides a [`DatagramSource`] trait that abstracts where raw
//! bus datagrams come from, enabling:
//!
//! - **Live operation**: a UDP socket joined to the multicast group
//! - **Testing**: replaying encoded bus datagrams without a network
//!
//! The source owns the socket; nothing else in the bridge touches it.

use crate::{
    bus::{encode_datagram, MSG_POINT_CLOUD},
    scan::Scan,
};
use std::{
    collections::VecDeque,
    future::Future,
    io,
    net::{Ipv4Addr, SocketAddrV4},
    pin::Pin,
};

/// Trait for datagram sources.
///
/// Implementations provide raw datagrams from the multicast bus or from
/// pre-recorded test data.
pub trait DatagramSource: Send {
    /// Receive the next datagram into the provided buffer.
    ///
    /// # Returns
    /// - `Ok(len)` - Number of bytes received
    /// - `Err` - I/O or source error
    fn recv<'a>(
        &'a mut self,
        buf: &'a mut [u8],
    ) -> Pin<Box<dyn Future<Output = io::Result<usize>> + Send + 'a>>;

    /// Check if more datagrams are available.
    ///
    /// For infinite sources (live UDP), always returns `true`.  For finite
    /// sources (test data), returns `false` when exhausted.
    fn has_more(&self) -> bool;
}

/// Live UDP multicast source.
pub struct MulticastSource {
    socket: tokio::net::UdpSocket,
}

impl MulticastSource {
    /// Bind to the group's port and join the multicast group on the given
    /// interface (`0.0.0.0` lets the OS pick).
    pub async fn join(group: SocketAddrV4, interface: Ipv4Addr) -> io::Result<Self> {
        let socket =
            tokio::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, group.port())).await?;
        socket.join_multicast_v4(*group.ip(), interface)?;
        Ok(Self { socket })
    }

    /// Wrap an already-configured socket.
    pub fn from_socket(socket: tokio::net::UdpSocket) -> Self {
        Self { socket }
    }
}

impl DatagramSource for MulticastSource {
    fn recv<'a>(
        &'a mut self,
        buf: &'a mut [u8],
    ) -> Pin<Box<dyn Future<Output = io::Result<usize>> + Send + 'a>> {
        Box::pin(async move { self.socket.recv(buf).await })
    }

    fn has_more(&self) -> bool {
        true // Live sources are infinite
    }
}

/// Finite source replaying encoded bus datagrams in arrival order.
///
/// Backs the pipeline tests: build datagrams with
/// [`encode_datagram`](crate::bus::encode_datagram) (or
/// [`ReplaySource::from_scans`] for point-cloud traffic) and run the bridge
/// against them without a network.  A datagram larger than the caller's
/// buffer is an error; real bus traffic always fits the receive buffer, and
/// truncating here would just manufacture a bogus length-mismatch decode.
pub struct ReplaySource {
    datagrams: VecDeque<Vec<u8>>,
}

impl ReplaySource {
    pub fn new(datagrams: Vec<Vec<u8>>) -> Self {
        Self {
            datagrams: datagrams.into(),
        }
    }

    /// Encode one sender's scan segments as point-cloud datagrams with
    /// sequence numbers counting up from zero.
    pub fn from_scans(sender_id: u32, scans: &[Scan]) -> Self {
        Self::new(
            scans
                .iter()
                .enumerate()
                .map(|(seq, scan)| {
                    encode_datagram(MSG_POINT_CLOUD, sender_id, seq as u32, &scan.encode())
                })
                .collect(),
        )
    }
}

impl DatagramSource for ReplaySource {
    fn recv<'a>(
        &'a mut self,
        buf: &'a mut [u8],
    ) -> Pin<Box<dyn Future<Output = io::Result<usize>> + Send + 'a>> {
        Box::pin(async move {
            let datagram = self.datagrams.pop_front().ok_or_else(|| {
                io::Error::new(io::ErrorKind::UnexpectedEof, "replay exhausted")
            })?;
            if datagram.len() > buf.len() {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "datagram of {} bytes exceeds receive buffer of {}",
                        datagram.len(),
                        buf.len()
                    ),
                ));
            }

            buf[..datagram.len()].copy_from_slice(&datagram);
            Ok(datagram.len())
        })
    }

    fn has_more(&self) -> bool {
        !self.datagrams.is_empty()
    }
}
