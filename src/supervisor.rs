//! The supervisor process: admission, per-station tasks, shutdown.
//!
//! One event loop consumes announcements from the listener and commands
//! from stdin. Every admitted station gets its own task that calibrates the
//! front-end, launches the SDR worker, accepts its connect-back on the
//! shared domain-socket acceptor and supervises the session. Failures stay
//! confined to their station; transport faults tear everything down.

use std::collections::HashSet;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, error, info, warn};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::UnixListener;
use tokio::process::Child;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;

use crate::calibrator::{calibrate, CalibratorSettings};
use crate::errors::Error;
use crate::gps::GpsData;
use crate::listener::Listener;
use crate::position::Fuser;
use crate::registry::Registry;
use crate::rtk::RtkEngine;
use crate::sdr::{self, SdrSettings, SDR_LOG_NAME};
use crate::session::Session;
use crate::station::{Station, StationType};

const WORKER_EXIT_GRACE: Duration = Duration::from_secs(5);

/// What the supervisor's event loop reacts to.
#[derive(Debug)]
pub enum Event {
    Announcement(Station),
    Quit,
    Fault(std::io::Error),
}

/// Pids of live subprocesses, shared between station tasks and shutdown.
#[derive(Debug, Default)]
pub struct ChildSet {
    pids: Mutex<HashSet<u32>>,
}

impl ChildSet {
    pub fn insert(&self, pid: u32) {
        self.pids.lock().unwrap().insert(pid);
    }

    pub fn remove(&self, pid: u32) {
        self.pids.lock().unwrap().remove(&pid);
    }

    pub fn len(&self) -> usize {
        self.pids.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Asks every tracked child to exit. Reaping stays with the owning
    /// station task.
    pub fn terminate_all(&self) {
        let pids: Vec<u32> = self.pids.lock().unwrap().iter().copied().collect();
        for pid in pids {
            debug!("sending SIGTERM to child {}", pid);
            if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                warn!("SIGTERM to {} failed: {}", pid, e);
            }
        }
    }
}

/// Completes once shutdown is requested, including when the shutdown
/// channel's sender is gone.
pub async fn wait_shutdown(rx: &mut watch::Receiver<bool>) {
    if *rx.borrow() {
        return;
    }
    while rx.changed().await.is_ok() {
        if *rx.borrow() {
            return;
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    /// SDR config template (`--config_file`).
    pub sdr_config: PathBuf,
    /// FE-CAL config template (`--cal_config_file`).
    pub cal_config: PathBuf,
    /// SDR executable (`--gnss_sdr`).
    pub sdr_executable: PathBuf,
    /// FE-CAL executable (`--front_end_cal`).
    pub cal_executable: PathBuf,
    /// Domain socket workers connect back on.
    pub socket_file: PathBuf,
    /// Announcement address: multicast group or unicast family selector.
    pub listen_address: IpAddr,
    pub port: u16,
    /// Root of the per-station working directories.
    pub work_dir: PathBuf,
    pub cal_deadline: Duration,
    pub cal_scan_budget: u64,
}

impl Settings {
    fn calibrator(&self) -> CalibratorSettings {
        CalibratorSettings {
            executable: self.cal_executable.clone(),
            template: self.cal_config.clone(),
            deadline: self.cal_deadline,
            max_scan_bytes: self.cal_scan_budget,
        }
    }

    fn sdr(&self) -> SdrSettings {
        SdrSettings {
            executable: self.sdr_executable.clone(),
            template: self.sdr_config.clone(),
            socket_file: self.socket_file.clone(),
        }
    }
}

pub struct Supervisor {
    settings: Arc<Settings>,
    registry: Arc<Registry>,
    children: Arc<ChildSet>,
    engine: Arc<dyn RtkEngine>,
    running: bool,
}

impl Supervisor {
    pub fn new(settings: Settings, engine: Arc<dyn RtkEngine>) -> Self {
        Self {
            engine,
            settings: Arc::new(settings),
            registry: Arc::new(Registry::new()),
            children: Arc::new(ChildSet::default()),
            running: false,
        }
    }

    /// Runs until `q` on stdin, Ctrl-C, or a transport fault. Blocks the
    /// caller for the supervisor's whole life.
    pub async fn run(&mut self) -> Result<(), Error> {
        if self.running {
            return Err(Error::AlreadyRunning);
        }
        self.running = true;

        // replace any socket file a previous run left behind
        let socket_file = self.settings.socket_file.clone();
        let _ = std::fs::remove_file(&socket_file);
        let acceptor = Arc::new(UnixListener::bind(&socket_file)?);
        info!("accepting workers on {}", socket_file.display());

        let listener = Listener::bind(self.settings.listen_address, self.settings.port)?;
        info!(
            "listening for announcements on {} port {}",
            self.settings.listen_address, self.settings.port,
        );

        let (events_tx, mut events) = mpsc::channel(64);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(listener.run(events_tx.clone()));
        tokio::spawn(watch_stdin(events_tx));

        let mut outcome = Ok(());
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(Event::Announcement(station)) => {
                        self.admit(station, &acceptor, &shutdown_rx);
                    },
                    Some(Event::Quit) => {
                        info!("shutdown requested");
                        break;
                    },
                    Some(Event::Fault(e)) => {
                        error!("transport fault, shutting down: {}", e);
                        outcome = Err(e.into());
                        break;
                    },
                    None => break,
                },
                signal = tokio::signal::ctrl_c() => {
                    if let Err(e) = signal {
                        warn!("signal handler failed: {}", e);
                    }
                    info!("interrupted");
                    break;
                },
            }
        }

        let _ = shutdown_tx.send(true);
        self.children.terminate_all();
        let _ = std::fs::remove_file(&socket_file);
        self.running = false;
        outcome
    }

    fn admit(
        &self,
        station: Station,
        acceptor: &Arc<UnixListener>,
        shutdown: &watch::Receiver<bool>,
    ) {
        match self.registry.add(&station) {
            Ok(()) => {
                info!("added station {}", station);
                tokio::spawn(run_station(
                    self.settings.clone(),
                    self.registry.clone(),
                    self.children.clone(),
                    self.engine.clone(),
                    acceptor.clone(),
                    shutdown.clone(),
                    station,
                ));
            },
            Err(e) => {
                warn!("error adding station {}: {}", station, e);
            },
        }
    }
}

/// Watches stdin for the quit command; anything else is ignored.
async fn watch_stdin(events: mpsc::Sender<Event>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let token = line.trim();
                if token == "q" || token == "Q" {
                    let _ = events.send(Event::Quit).await;
                    break;
                }
            },
            Ok(None) => break,
            Err(e) => {
                warn!("stdin read failed: {}", e);
                break;
            },
        }
    }
}

/// One station's whole life: calibrate, launch, supervise, clean up.
async fn run_station(
    settings: Arc<Settings>,
    registry: Arc<Registry>,
    children: Arc<ChildSet>,
    engine: Arc<dyn RtkEngine>,
    acceptor: Arc<UnixListener>,
    mut shutdown: watch::Receiver<bool>,
    station: Station,
) {
    if let Err(e) = drive_station(
        &settings,
        &registry,
        &children,
        engine,
        &acceptor,
        &mut shutdown,
        &station,
    )
    .await
    {
        warn!("station {} failed: {}", station, e);
    }

    match registry.remove(&station) {
        Ok(()) => debug!("removed station {}", station.address),
        Err(Error::StationNotFound) => {}, // the session already removed it
        Err(e) => warn!("{}: removal failed: {}", station.address, e),
    }
}

async fn drive_station(
    settings: &Settings,
    registry: &Arc<Registry>,
    children: &ChildSet,
    engine: Arc<dyn RtkEngine>,
    acceptor: &UnixListener,
    shutdown: &mut watch::Receiver<bool>,
    station: &Station,
) -> Result<(), Error> {
    let bias = calibrate(&settings.calibrator(), station, &settings.work_dir, children).await?;

    let mut child = sdr::launch(&settings.sdr(), station, &settings.work_dir, bias, children).await?;
    let pid = child.id();

    let log_path = station.directory(&settings.work_dir).join(SDR_LOG_NAME);
    if let Err(e) = sdr::drain_output(&mut child, log_path).await {
        warn!("{}: worker log unavailable: {}", station.address, e);
    }

    // the worker opens the supervisor socket once its flowgraph is up
    let accepted = tokio::select! {
        accepted = acceptor.accept() => Some(accepted),
        _ = wait_shutdown(shutdown) => None,
    };

    let mut accept_error = None;
    match accepted {
        Some(Ok((stream, _))) => {
            let fuser = match station.kind {
                StationType::Rover => Some(Fuser::new(
                    registry.clone(),
                    GpsData::for_station(station),
                    engine,
                )),
                _ => None,
            };
            let mut session = Session::new(stream, station.clone(), registry.clone(), fuser);
            session.run(shutdown).await;
        },
        Some(Err(e)) => accept_error = Some(e),
        None => {},
    }

    terminate_worker(&mut child, pid, children).await;

    match accept_error {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

/// SIGTERM first; SIGKILL when the grace period runs out. Always reaps.
async fn terminate_worker(child: &mut Child, pid: Option<u32>, children: &ChildSet) {
    match pid {
        Some(pid) => {
            let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
            if timeout(WORKER_EXIT_GRACE, child.wait()).await.is_err() {
                warn!("worker {} ignored SIGTERM, killing", pid);
                let _ = child.kill().await;
            }
            children.remove(pid);
        },
        None => {
            // already exited; collect the status
            let _ = child.wait().await;
        },
    }
}
