use std::io;
use std::net::UdpSocket;

use anyhow::Context;

use aislib::{Channel, RadioPort};

use crate::common::{self, NetworkArgs};

/// A UDP "antenna" for one channel.
///
/// The socket binds the boat-side broadcast port so it hears the
/// server's re-broadcasts, and is connected to the server's reception
/// port so every send lands on the right channel hub.
#[derive(Debug)]
pub struct Antenna {
    channel: Channel,
    sock: UdpSocket,
}

impl Antenna {
    /// Open the antenna for a carrier frequency in Hz.
    pub fn open(frequency: u32, net: &NetworkArgs) -> anyhow::Result<Antenna> {
        let channel = Channel::from_frequency(frequency)
            .with_context(|| format!("no channel at {} Hz", frequency))?;
        let sock = common::bind_reusable_udp(net.ip, net.broadcast_port(channel))
            .with_context(|| format!("binding the {} antenna", channel))?;
        sock.set_broadcast(true)?;
        sock.connect((net.server_ip, net.reception_port(channel)))
            .with_context(|| format!("connecting the {} antenna to the server", channel))?;
        Ok(Antenna { channel, sock })
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }
}

impl RadioPort for Antenna {
    fn send(&self, datagram: &[u8]) -> io::Result<()> {
        self.sock.send(datagram).map(|_| ())
    }

    fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.sock.recv(buf)
    }
}
