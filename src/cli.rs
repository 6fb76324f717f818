use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Arg, ArgAction, ArgMatches, ColorChoice, Command};

use crate::listener::GENESIS_PORT;
use crate::supervisor::Settings;

pub struct Cli {
    /// Arguments passed by user
    matches: ArgMatches,
}

impl Cli {
    /// Build new command line interface
    pub fn new() -> Self {
        Self {
            matches: {
                Command::new("genesis")
                    .version(env!("CARGO_PKG_VERSION"))
                    .about("Realtime multi-station GNSS receiver supervisor")
                    .color(ColorChoice::Always)
                    .next_help_heading("Receiver binaries")
                    .arg(
                        Arg::new("config_file")
                            .long("config_file")
                            .value_name("PATH")
                            .default_value("gnss-sdr.conf")
                            .help("GNSS-SDR configuration template, copied per station"),
                    )
                    .arg(
                        Arg::new("cal_config_file")
                            .long("cal_config_file")
                            .value_name("PATH")
                            .default_value("front-end-cal.conf")
                            .help("front-end-cal configuration template, copied per station"),
                    )
                    .arg(
                        Arg::new("gnss_sdr")
                            .long("gnss_sdr")
                            .value_name("PATH")
                            .default_value("gnss-sdr")
                            .help("GNSS-SDR executable launched per station"),
                    )
                    .arg(
                        Arg::new("front_end_cal")
                            .long("front_end_cal")
                            .value_name("PATH")
                            .default_value("front-end-cal")
                            .help("front-end-cal executable launched per station"),
                    )
                    .next_help_heading("Supervisor")
                    .arg(
                        Arg::new("socket_file")
                            .long("socket_file")
                            .value_name("PATH")
                            .default_value("genesis.socket")
                            .help("Domain socket the workers connect back on"),
                    )
                    .arg(
                        Arg::new("listen_address")
                            .long("listen_address")
                            .value_name("ADDR")
                            .default_value("239.255.255.1")
                            .help("Announcement address. A multicast address is joined;
a unicast address only selects the listening family."),
                    )
                    .arg(
                        Arg::new("port")
                            .long("port")
                            .value_name("PORT")
                            .help("Announcement UDP port. Default is 9255."),
                    )
                    .arg(
                        Arg::new("work_dir")
                            .long("work_dir")
                            .value_name("DIR")
                            .default_value(".")
                            .help("Directory holding the per-station working trees"),
                    )
                    .next_help_heading("Logging")
                    .arg(
                        Arg::new("verbose")
                            .long("verbose")
                            .action(ArgAction::SetTrue)
                            .help("Log at debug level"),
                    )
                    .arg(
                        Arg::new("very_verbose")
                            .long("very_verbose")
                            .action(ArgAction::SetTrue)
                            .help("Log at trace level"),
                    )
                    .get_matches()
            },
        }
    }

    pub fn sdr_config(&self) -> PathBuf {
        PathBuf::from(self.matches.get_one::<String>("config_file").unwrap())
    }

    pub fn cal_config(&self) -> PathBuf {
        PathBuf::from(self.matches.get_one::<String>("cal_config_file").unwrap())
    }

    pub fn sdr_executable(&self) -> PathBuf {
        PathBuf::from(self.matches.get_one::<String>("gnss_sdr").unwrap())
    }

    pub fn cal_executable(&self) -> PathBuf {
        PathBuf::from(self.matches.get_one::<String>("front_end_cal").unwrap())
    }

    pub fn socket_file(&self) -> PathBuf {
        PathBuf::from(self.matches.get_one::<String>("socket_file").unwrap())
    }

    pub fn listen_address(&self) -> IpAddr {
        let addr = self.matches.get_one::<String>("listen_address").unwrap();
        addr.parse()
            .unwrap_or_else(|e| panic!("Invalid listen address \"{}\": {}", addr, e))
    }

    pub fn port(&self) -> u16 {
        match self.matches.get_one::<String>("port") {
            Some(port) => port
                .parse()
                .unwrap_or_else(|e| panic!("Invalid port value: {}", e)),
            None => GENESIS_PORT,
        }
    }

    pub fn work_dir(&self) -> PathBuf {
        PathBuf::from(self.matches.get_one::<String>("work_dir").unwrap())
    }

    pub fn verbose(&self) -> bool {
        self.matches.get_flag("verbose")
    }

    pub fn very_verbose(&self) -> bool {
        self.matches.get_flag("very_verbose")
    }

    /// Supervisor settings, with the four configured paths already
    /// canonicalized by the caller.
    pub fn settings(
        &self,
        sdr_config: PathBuf,
        cal_config: PathBuf,
        sdr_executable: PathBuf,
        cal_executable: PathBuf,
    ) -> Settings {
        Settings {
            sdr_config,
            cal_config,
            sdr_executable,
            cal_executable,
            socket_file: self.socket_file(),
            listen_address: self.listen_address(),
            port: self.port(),
            work_dir: self.work_dir(),
            cal_deadline: Duration::from_secs(120),
            cal_scan_budget: 1024 * 1024,
        }
    }
}

impl Default for Cli {
    fn default() -> Self {
        Self::new()
    }
}
