use std::net::UdpSocket;
use std::thread;

use log::{debug, info, warn};

use aislib::protocol::{self, MAX_DATAGRAM_SIZE};
use aislib::Channel;

use crate::common::{self, NetworkArgs};

/// Run the channel hub: one UDP socket per channel that re-broadcasts
/// every datagram it receives to the boats' broadcast ports.
#[derive(clap::Args, Debug)]
pub struct ServerOpts {
    #[command(flatten)]
    net: NetworkArgs,
}

impl crate::ToolRun for ServerOpts {
    fn run(&self) -> anyhow::Result<()> {
        let mut handles = Vec::new();
        for channel in [Channel::C87B, Channel::C88B] {
            let sock =
                common::bind_reusable_udp(self.net.server_ip, self.net.reception_port(channel))?;
            sock.set_broadcast(true)?;
            let target = (self.net.broadcast_ip(), self.net.broadcast_port(channel));
            handles.push(
                thread::Builder::new()
                    .name(format!("server-{}", channel))
                    .spawn(move || channel_hub(sock, channel, target))?,
            );
        }
        info!("server listening on {}", self.net.server_ip);

        for handle in handles {
            let _ = handle.join();
        }
        Ok(())
    }
}

/// Receive loop for one channel. Malformed datagrams are still
/// re-broadcast: the radio medium does not validate frames, stations do.
fn channel_hub(sock: UdpSocket, channel: Channel, target: (std::net::Ipv4Addr, u16)) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    loop {
        match sock.recv_from(&mut buf) {
            Ok((len, _)) => {
                match protocol::decode(&buf[..len]) {
                    Ok(bits) => debug!("relaying a {}-bit frame on {}", bits.len(), channel),
                    Err(_) => debug!("relaying an undecodable datagram on {}", channel),
                }
                if let Err(e) = sock.send_to(&buf[..len], target) {
                    warn!("re-broadcast failed on {}: {}", channel, e);
                }
            }
            Err(e) => warn!("receive failed on {}: {}", channel, e),
        }
    }
}
