use std::io::Write;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::path::Path;

use socket2::{Domain, Protocol, Socket, Type};

use aislib::timing;
use aislib::Channel;

/// Network configuration shared by the boat and server subcommands.
///
/// The broadcast address is derived from the server address and its
/// netmask; with the loopback defaults everything stays on one host.
#[derive(clap::Args, Debug, Clone)]
pub struct NetworkArgs {
    /// Local address the antennas bind to.
    #[arg(long, default_value = "127.0.0.1")]
    pub ip: Ipv4Addr,

    /// Address of the channel server.
    #[arg(long, default_value = "127.0.0.1")]
    pub server_ip: Ipv4Addr,

    /// Netmask of the server network, for the broadcast address.
    #[arg(long, default_value = "255.255.255.255")]
    pub server_ip_netmask: Ipv4Addr,

    /// Server reception port for channel 87B.
    #[arg(long, default_value_t = 30087)]
    pub reception_port_87b: u16,

    /// Server reception port for channel 88B.
    #[arg(long, default_value_t = 30088)]
    pub reception_port_88b: u16,

    /// Boat-side broadcast port for channel 87B.
    #[arg(long, default_value_t = 31087)]
    pub broadcast_port_87b: u16,

    /// Boat-side broadcast port for channel 88B.
    #[arg(long, default_value_t = 31088)]
    pub broadcast_port_88b: u16,
}

impl NetworkArgs {
    pub fn reception_port(&self, channel: Channel) -> u16 {
        match channel {
            Channel::C87B => self.reception_port_87b,
            Channel::C88B => self.reception_port_88b,
        }
    }

    pub fn broadcast_port(&self, channel: Channel) -> u16 {
        match channel {
            Channel::C87B => self.broadcast_port_87b,
            Channel::C88B => self.broadcast_port_88b,
        }
    }

    /// Broadcast address of the server network.
    pub fn broadcast_ip(&self) -> Ipv4Addr {
        let ip = u32::from(self.server_ip);
        let mask = u32::from(self.server_ip_netmask);
        Ipv4Addr::from(ip | !mask)
    }
}

/// Bind a UDP socket with address reuse enabled.
///
/// Several boats on one host share the per-channel loopback ports, and
/// the server must rebind its reception ports across restarts, so every
/// socket of the simulation carries `SO_REUSEADDR` (and `SO_REUSEPORT`
/// where it exists). std's `UdpSocket::bind` cannot set options before
/// binding, hence the socket2 detour.
pub fn bind_reusable_udp(ip: Ipv4Addr, port: u16) -> std::io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.bind(&SocketAddr::from((ip, port)).into())?;
    Ok(socket.into())
}

/// Set up logging: every record is tagged with the wall-clock time and
/// the current slot index pair, optionally appended to a log file.
pub fn init_logging(verbose: u8, log_file: Option<&Path>) -> anyhow::Result<()> {
    let level = match verbose {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
    builder.filter_level(level);
    builder.format(|buf, record| {
        let now = timing::current_datetime();
        let (i87, i88) = timing::datetime_to_slots_idx(&now);
        writeln!(
            buf,
            "[{} | slots ({}, {})] {} {}",
            now.format("%d/%m/%Y %H:%M:%S%.6f"),
            i87,
            i88,
            record.level(),
            record.args()
        )
    });

    if let Some(path) = log_file {
        let file = std::fs::File::options()
            .create(true)
            .append(true)
            .open(path)?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }

    builder.init();
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    fn args() -> NetworkArgs {
        NetworkArgs {
            ip: Ipv4Addr::new(192, 168, 1, 20),
            server_ip: Ipv4Addr::new(192, 168, 1, 10),
            server_ip_netmask: Ipv4Addr::new(255, 255, 255, 0),
            reception_port_87b: 30087,
            reception_port_88b: 30088,
            broadcast_port_87b: 31087,
            broadcast_port_88b: 31088,
        }
    }

    #[test]
    fn broadcast_ip_from_netmask() {
        assert_eq!(args().broadcast_ip(), Ipv4Addr::new(192, 168, 1, 255));
    }

    #[test]
    fn ports_follow_channels() {
        let args = args();
        assert_eq!(args.reception_port(Channel::C87B), 30087);
        assert_eq!(args.reception_port(Channel::C88B), 30088);
        assert_eq!(args.broadcast_port(Channel::C87B), 31087);
        assert_eq!(args.broadcast_port(Channel::C88B), 31088);
    }
}
