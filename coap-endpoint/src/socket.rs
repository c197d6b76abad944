// Copyright 2019 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! A thin, [Tokio][]-based wrapper around a bound UDP socket, built directly on
//! [`tokio::net::UdpSocket`].
//!
//! [Tokio]: https://tokio.rs/

use std::io;
use std::net::SocketAddr;
use tokio::net::{ToSocketAddrs, UdpSocket};

/// The maximum size of a single datagram this endpoint will send or receive.
pub const MAX_PACKET_LENGTH: usize = 1152;

/// A bound UDP socket used as the transport for a [`crate::Endpoint`].
#[derive(Debug)]
pub struct CoapSocket {
    inner: UdpSocket,
}

impl CoapSocket {
    /// Binds a new socket to the given local address.
    pub async fn bind<A: ToSocketAddrs>(addr: A) -> io::Result<CoapSocket> {
        Ok(CoapSocket {
            inner: UdpSocket::bind(addr).await?,
        })
    }

    /// Wraps an already-bound [`tokio::net::UdpSocket`].
    pub fn from_tokio(inner: UdpSocket) -> CoapSocket {
        CoapSocket { inner }
    }

    /// Returns the local address this socket is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    /// Sends `bytes` to `remote`.
    pub async fn send_to(&self, bytes: &[u8], remote: SocketAddr) -> io::Result<()> {
        self.inner.send_to(bytes, remote).await?;
        Ok(())
    }

    /// Receives a single datagram, returning its source address and length.
    pub async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.inner.recv_from(buf).await
    }
}
