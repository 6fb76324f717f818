//! GNSS-SDR worker launcher.
//!
//! Writes the per-station receiver config (signal source, compensated IF,
//! connect-back socket) and starts the worker in the station directory. The
//! worker's combined output is drained into `gnss-sdr.log` next to it, so
//! the pipe can never fill up and stall the child.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use log::trace;
use tokio::process::{Child, Command};

use crate::errors::Error;
use crate::station::Station;
use crate::supervisor::ChildSet;

pub const SDR_CONFIG_NAME: &str = "gnss-sdr.conf";
pub const SDR_LOG_NAME: &str = "gnss-sdr.log";

#[derive(Debug, Clone)]
pub struct SdrSettings {
    pub executable: PathBuf,
    pub template: PathBuf,
    /// Domain socket the worker connects back to.
    pub socket_file: PathBuf,
}

/// Launches the worker for `station`. The returned child has its stdout and
/// stderr piped; hand it to [drain_output] before supervising it.
pub async fn launch(
    settings: &SdrSettings,
    station: &Station,
    work_dir: &Path,
    bias: f64,
    children: &ChildSet,
) -> Result<Child, Error> {
    let dir = station.directory(work_dir);
    tokio::fs::create_dir_all(&dir).await?;

    write_config(settings, station, &dir.join(SDR_CONFIG_NAME), bias)?;

    trace!("{}: starting gnss-sdr", station.address);
    let child = Command::new(&settings.executable)
        .arg("--config_file")
        .arg(SDR_CONFIG_NAME)
        .arg("-log_dir=./")
        .current_dir(&dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    if let Some(pid) = child.id() {
        children.insert(pid);
    }
    trace!("{}: gnss-sdr started", station.address);

    Ok(child)
}

/// Detaches the child's output streams into append tasks on the station's
/// worker log.
pub async fn drain_output(child: &mut Child, log_path: PathBuf) -> Result<(), Error> {
    if let Some(mut stdout) = child.stdout.take() {
        let mut log = open_log(&log_path).await?;
        tokio::spawn(async move {
            let _ = tokio::io::copy(&mut stdout, &mut log).await;
        });
    }

    if let Some(mut stderr) = child.stderr.take() {
        let mut log = open_log(&log_path).await?;
        tokio::spawn(async move {
            let _ = tokio::io::copy(&mut stderr, &mut log).await;
        });
    }

    Ok(())
}

async fn open_log(path: &Path) -> Result<tokio::fs::File, Error> {
    Ok(tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?)
}

/// Copies the template and appends the overrides: antenna endpoint, the
/// calibrated IF, and where to stream observables. The worker runs after a
/// chdir into the station directory, so a relative socket path gains a
/// leading `../` to keep resolving against the supervisor's directory.
fn write_config(
    settings: &SdrSettings,
    station: &Station,
    out: &Path,
    bias: f64,
) -> Result<(), Error> {
    let mut text = std::fs::read_to_string(&settings.template)
        .map_err(|_| Error::FileNotFound(settings.template.clone()))?;

    if !text.ends_with('\n') {
        text.push('\n');
    }
    text.push_str(&format!("SignalSource.address={}\n", station.address));
    text.push_str(&format!("SignalSource.port={}\n", station.port));
    text.push_str(&format!("InputFilter.IF={}\n", bias));

    let socket = &settings.socket_file;
    if socket.is_absolute() {
        text.push_str(&format!("OutputFilter.filename={}\n", socket.display()));
    } else {
        text.push_str(&format!("OutputFilter.filename=../{}\n", socket.display()));
    }

    std::fs::write(out, text).map_err(|_| Error::FileNotFound(out.to_path_buf()))?;
    Ok(())
}
