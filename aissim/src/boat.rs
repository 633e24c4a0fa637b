use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use log::info;
use rand::Rng;

use aislib::protocol::bits;
use aislib::{protocol, BoatData, BoatsRegistry, RadioPort, SlotsMap, Station};

use crate::antenna::Antenna;
use crate::common::NetworkArgs;

/// Run one simulated boat: antennas, SOTDMA station, kinematics and the
/// interactive menu.
#[derive(clap::Args, Debug)]
pub struct BoatOpts {
    #[command(flatten)]
    net: NetworkArgs,

    /// Station identifier; random when omitted.
    #[arg(long)]
    mmsi: Option<u32>,

    #[arg(long, default_value = "superbateau")]
    name: String,

    #[arg(long, default_value = "default")]
    call_sign: String,

    #[arg(long, default_value = "default")]
    destination: String,

    /// Latitude in 1/10000 minute of arc.
    #[arg(long, default_value_t = 0)]
    latitude: u32,

    /// Longitude in 1/10000 minute of arc.
    #[arg(long, default_value_t = 0)]
    longitude: u32,

    /// Speed over ground in 1/10 knot.
    #[arg(long, default_value_t = 0)]
    speed: u16,

    /// Course over ground in 1/10 degree.
    #[arg(long, default_value_t = 0)]
    course: u16,
}

impl crate::ToolRun for BoatOpts {
    fn run(&self) -> anyhow::Result<()> {
        let mut data = BoatData::default();
        data.mmsi = self
            .mmsi
            .unwrap_or_else(|| rand::thread_rng().gen_range(100_000_000..=999_999_999));
        data.name = self.name.clone();
        data.call_sign = self.call_sign.clone();
        data.destination = self.destination.clone();
        data.latitude = self.latitude;
        data.longitude = self.longitude;
        data.speed_over_ground = self.speed;
        data.course_over_ground = self.course;
        info!("starting boat {} (mmsi {})", data.name, data.mmsi);

        let boat = Arc::new(Mutex::new(data));
        let antenna_87b = Arc::new(Antenna::open(161_975_000, &self.net)?);
        let antenna_88b = Arc::new(Antenna::open(162_025_000, &self.net)?);

        let station = Station::new(
            Arc::clone(&boat),
            Arc::clone(&antenna_87b),
            Arc::clone(&antenna_88b),
        );
        let registry = Arc::clone(station.registry());
        let slots_map = Arc::clone(station.slots_map());
        spawn_kinematics(Arc::clone(&boat))?;
        let _handles = station.spawn()?;

        dev_menu(&antenna_87b, &antenna_88b, &registry, &slots_map)
    }
}

/// Integrate the boat's position on a short cadence for the life of the
/// process.
fn spawn_kinematics(boat: Arc<Mutex<BoatData>>) -> std::io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("boat-kinematics".into())
        .spawn(move || {
            let mut last_update = Instant::now();
            loop {
                let now = Instant::now();
                let elapsed = now.duration_since(last_update).as_secs_f64();
                last_update = now;
                boat.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .advance_position(elapsed);
                thread::sleep(Duration::from_millis(250));
            }
        })
}

/// Interactive developer menu, run on the main thread.
fn dev_menu(
    antenna_87b: &Antenna,
    antenna_88b: &Antenna,
    registry: &BoatsRegistry,
    slots_map: &SlotsMap,
) -> anyhow::Result<()> {
    loop {
        let action = dialoguer::Select::new()
            .with_prompt("aissim")
            .items(&[
                "Send a raw message",
                "Show known vessels",
                "Show slot reservations",
                "Quit",
            ])
            .default(0)
            .interact()?;
        match action {
            0 => {
                let channel = dialoguer::Select::new()
                    .with_prompt("Channel")
                    .items(&["87B", "88B"])
                    .default(0)
                    .interact()?;
                let antenna = if channel == 0 { antenna_87b } else { antenna_88b };
                let text: String = dialoguer::Input::new()
                    .with_prompt("Message")
                    .interact_text()?;
                let frame = bits::str_to_bits(&text, None)?;
                antenna.send(&protocol::encode(&frame))?;
                println!("sent {} bits on {}", frame.len(), antenna.channel());
            }
            1 => {
                if registry.is_empty() {
                    println!("no vessels heard yet");
                }
                for mmsi in registry.mmsis() {
                    if let Some(vessel) = registry.get(mmsi) {
                        println!(
                            "{:>9}  {:<20} pos ({}, {})  sog {}  cog {}",
                            mmsi,
                            vessel.name,
                            vessel.latitude,
                            vessel.longitude,
                            vessel.speed_over_ground,
                            vessel.course_over_ground,
                        );
                    }
                }
            }
            2 => {
                let owned = slots_map.get_owned_slots(&[]);
                if owned.is_empty() {
                    println!("no reservations");
                }
                for (mmsi, slots) in owned {
                    let numbers: Vec<String> =
                        slots.iter().map(|s| s.to_string()).collect();
                    println!("{:>9}: {}", mmsi, numbers.join(" "));
                }
            }
            _ => return Ok(()),
        }
    }
}
