/*
 * Genesis is a realtime multi-station GNSS receiver.
 *
 * genesis-ping sends a single hand-crafted station announcement, useful for
 * exercising a running supervisor without real antenna hardware.
 */

use std::net::IpAddr;

use clap::{Arg, ArgAction, ColorChoice, Command};
use tokio::net::UdpSocket;

use genesis::listener::GENESIS_PORT;
use genesis::packet::Packet;
use genesis::station::StationType;

fn command() -> Command {
    Command::new("genesis-ping")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Send one station announcement to a Genesis supervisor")
        .color(ColorChoice::Always)
        .arg(
            Arg::new("address")
                .value_name("ADDR")
                .required(true)
                .help("Destination address, multicast group or supervisor host"),
        )
        .arg(
            Arg::new("port")
                .long("port")
                .value_name("PORT")
                .help("Destination UDP port. Default is 9255."),
        )
        .arg(
            Arg::new("station-port")
                .long("station-port")
                .value_name("PORT")
                .default_value("1234")
                .help("TCP port the announced station claims to serve raw IQ on"),
        )
        .arg(
            Arg::new("base")
                .long("base")
                .action(ArgAction::SetTrue)
                .help("Announce a base station instead of a rover"),
        )
        .arg(
            Arg::new("name")
                .long("name")
                .value_name("NAME")
                .help("Optional station name, at most 15 bytes"),
        )
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = command().get_matches();

    let address: IpAddr = matches.get_one::<String>("address").unwrap().parse()?;
    let port: u16 = match matches.get_one::<String>("port") {
        Some(port) => port.parse()?,
        None => GENESIS_PORT,
    };
    let station_port: u16 = matches.get_one::<String>("station-port").unwrap().parse()?;

    let kind = if matches.get_flag("base") {
        StationType::Base
    } else {
        StationType::Rover
    };

    let packet = Packet {
        kind,
        port: station_port,
        name: matches.get_one::<String>("name").cloned(),
    };

    let bind_addr = if address.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
    let socket = UdpSocket::bind(bind_addr).await?;
    socket.send_to(&packet.encode(), (address, port)).await?;

    println!("sent {} ping to genesis at {}:{}", kind, address, port);
    Ok(())
}
