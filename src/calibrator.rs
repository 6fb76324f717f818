//! Front-end calibration driver.
//!
//! One run per admitted station: derive a config from the template, launch
//! FE-CAL in the station directory, scrape its output for the IF-bias line
//! and persist the result. The scrape is the contract with the external
//! binary, bounded by a deadline and a byte budget so a misbehaving child
//! cannot stall the station task or grow the scan without limit.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;

use log::{debug, warn};
use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::errors::Error;
use crate::station::Station;
use crate::station_config::{StationConfig, STATION_CONFIG_FILE};
use crate::supervisor::ChildSet;

pub const CAL_CONFIG_NAME: &str = "front-end-cal.conf";
const CAL_LOG_NAME: &str = "front-end-cal.log";

fn if_bias_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"IF bias present in baseband=(-?[0-9]+\.[0-9]*) \[Hz\]")
            .expect("IF bias pattern is valid")
    })
}

#[derive(Debug, Clone)]
pub struct CalibratorSettings {
    pub executable: PathBuf,
    pub template: PathBuf,
    /// How long FE-CAL gets to report a bias before the run is abandoned.
    pub deadline: Duration,
    /// Upper bound on scraped output.
    pub max_scan_bytes: u64,
}

impl CalibratorSettings {
    pub fn new(executable: PathBuf, template: PathBuf) -> Self {
        Self {
            executable,
            template,
            deadline: Duration::from_secs(120),
            max_scan_bytes: 1024 * 1024,
        }
    }
}

/// Resolves the IF bias for `station`, reusing a previously saved value
/// when one exists and running FE-CAL otherwise.
pub async fn calibrate(
    settings: &CalibratorSettings,
    station: &Station,
    work_dir: &Path,
    children: &ChildSet,
) -> Result<f64, Error> {
    let dir = station.directory(work_dir);
    tokio::fs::create_dir_all(&dir).await?;

    let config_path = dir.join(STATION_CONFIG_FILE);
    if let Some(saved) = StationConfig::load(&config_path) {
        debug!(
            "{}: IF bias {} Hz loaded from {}",
            station.address,
            saved.if_bias,
            config_path.display(),
        );
        return Ok(saved.if_bias);
    }

    write_config(&settings.template, &dir.join(CAL_CONFIG_NAME), station)?;

    let mut child = Command::new(&settings.executable)
        .arg("--config_file")
        .arg(CAL_CONFIG_NAME)
        .arg("-log_dir=./")
        .current_dir(&dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let pid = child.id();
    if let Some(pid) = pid {
        children.insert(pid);
    }

    let stdout = child.stdout.take().expect("stdout is piped");
    let stderr = child.stderr.take().expect("stderr is piped");
    let lines = merge_lines(stdout, stderr);

    let mut log = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(CAL_LOG_NAME))
        .await?;

    let scan = scan_for_bias(lines, &mut log, settings.max_scan_bytes);
    let result = match timeout(settings.deadline, scan).await {
        Ok(result) => result,
        Err(_) => {
            warn!(
                "{}: no IF bias from front-end-cal within {:?}",
                station.address, settings.deadline,
            );
            Err(Error::IfBiasNotFound)
        },
    };

    let _ = child.kill().await;
    if let Some(pid) = pid {
        children.remove(pid);
    }

    let bias = result?;
    debug!("{}: found IF bias of {} Hz", station.address, bias);

    if let Err(e) = StationConfig::new(bias).save(&config_path) {
        warn!("{}: saving IF bias failed: {}", station.address, e);
    }
    Ok(bias)
}

/// Copies the template and appends the station overrides; writing them last
/// overrides any earlier definition of the same keys.
fn write_config(template: &Path, out: &Path, station: &Station) -> Result<(), Error> {
    let mut text = std::fs::read_to_string(template)
        .map_err(|_| Error::FileNotFound(template.to_path_buf()))?;

    if !text.ends_with('\n') {
        text.push('\n');
    }
    text.push_str(&format!("SignalSource.address={}\n", station.address));
    text.push_str(&format!("SignalSource.port={}\n", station.port));

    std::fs::write(out, text).map_err(|_| Error::FileNotFound(out.to_path_buf()))?;
    Ok(())
}

/// Interleaves the child's stdout and stderr line streams; FE-CAL reports
/// on either depending on its logging setup.
fn merge_lines(
    stdout: impl AsyncRead + Unpin + Send + 'static,
    stderr: impl AsyncRead + Unpin + Send + 'static,
) -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(forward_lines(stdout, tx.clone()));
    tokio::spawn(forward_lines(stderr, tx));
    rx
}

async fn forward_lines(reader: impl AsyncRead + Unpin, tx: mpsc::Sender<String>) {
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if tx.send(line).await.is_err() {
            break;
        }
    }
}

/// Reads lines until the bias pattern matches, the streams end, or the byte
/// budget runs out. Every line also goes to the station's calibration log.
async fn scan_for_bias(
    mut lines: mpsc::Receiver<String>,
    log: &mut (impl AsyncWrite + Unpin),
    max_scan_bytes: u64,
) -> Result<f64, Error> {
    let mut scanned: u64 = 0;

    while let Some(line) = lines.recv().await {
        let _ = log.write_all(line.as_bytes()).await;
        let _ = log.write_all(b"\n").await;

        if let Some(caps) = if_bias_regex().captures(&line) {
            return caps[1].parse().map_err(|_| Error::IfBiasNotFound);
        }

        scanned += line.len() as u64 + 1;
        if scanned > max_scan_bytes {
            warn!("front-end-cal output exceeded the {} byte scan budget", max_scan_bytes);
            return Err(Error::IfBiasNotFound);
        }
    }

    Err(Error::IfBiasNotFound)
}

#[cfg(test)]
mod test {
    use super::{calibrate, scan_for_bias, CalibratorSettings};
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    use tokio::sync::mpsc;
    use tokio::time::timeout;

    use crate::errors::Error;
    use crate::station::{Station, StationType};
    use crate::station_config::{StationConfig, STATION_CONFIG_FILE};
    use crate::supervisor::ChildSet;

    fn feed(lines: &[&str]) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(64);
        for line in lines {
            tx.try_send(line.to_string()).unwrap();
        }
        rx
    }

    #[tokio::test]
    async fn scan_finds_first_capture() {
        let mut log = Vec::new();
        let lines = feed(&[
            "initializing flowgraph",
            "IF bias present in baseband=1525.3 [Hz]",
            "IF bias present in baseband=9999.0 [Hz]",
        ]);

        let bias = scan_for_bias(lines, &mut log, u64::MAX).await.unwrap();
        assert_eq!(bias, 1525.3);
        assert!(String::from_utf8(log).unwrap().contains("initializing"));
    }

    #[tokio::test]
    async fn scan_accepts_negative_bias() {
        let mut log = Vec::new();
        let lines = feed(&["IF bias present in baseband=-302.25 [Hz]"]);
        assert_eq!(scan_for_bias(lines, &mut log, u64::MAX).await.unwrap(), -302.25);
    }

    #[tokio::test]
    async fn scan_without_match_is_not_found() {
        let mut log = Vec::new();
        let lines = feed(&["nothing", "of", "interest"]);
        assert!(matches!(
            scan_for_bias(lines, &mut log, u64::MAX).await,
            Err(Error::IfBiasNotFound)
        ));
    }

    #[tokio::test]
    async fn scan_respects_byte_budget() {
        let (tx, rx) = mpsc::channel(4);
        tokio::spawn(async move {
            loop {
                if tx.send("x".repeat(64)).await.is_err() {
                    break;
                }
            }
        });

        let mut log = Vec::new();
        assert!(matches!(
            scan_for_bias(rx, &mut log, 1024).await,
            Err(Error::IfBiasNotFound)
        ));
    }

    #[tokio::test]
    async fn open_stream_hits_the_deadline() {
        let (_tx, rx) = mpsc::channel::<String>(4);
        let mut log = Vec::new();

        // the channel stays open and silent, like a child printing nothing
        let result = timeout(
            Duration::from_millis(50),
            scan_for_bias(rx, &mut log, u64::MAX),
        )
        .await;
        assert!(result.is_err());
    }

    fn rover(address: &str) -> Station {
        Station::new(StationType::Rover, address, 1234)
    }

    fn write_stub(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("front-end-cal-stub");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn write_template(dir: &Path) -> PathBuf {
        let path = dir.join("front-end-cal.conf.template");
        std::fs::write(&path, "GNSS-SDR.internal_fs_hz=2048000\n").unwrap();
        path
    }

    #[tokio::test]
    async fn saved_bias_skips_the_subprocess() {
        let work = tempfile::tempdir().unwrap();
        let station = rover("10.0.0.3");

        let dir = station.directory(work.path());
        std::fs::create_dir_all(&dir).unwrap();
        StationConfig::new(12_345.0)
            .save(&dir.join(STATION_CONFIG_FILE))
            .unwrap();

        // executable does not exist: reaching the spawn would error out
        let settings = CalibratorSettings::new(
            work.path().join("no-such-binary"),
            write_template(work.path()),
        );

        let children = ChildSet::default();
        let bias = calibrate(&settings, &station, work.path(), &children)
            .await
            .unwrap();
        assert_eq!(bias, 12_345.0);
    }

    #[tokio::test]
    async fn scrapes_bias_from_subprocess() {
        let work = tempfile::tempdir().unwrap();
        let station = rover("10.0.0.4");

        let stub = write_stub(
            work.path(),
            "echo 'Processing...'\necho 'IF bias present in baseband=123.45 [Hz]'",
        );
        let settings = CalibratorSettings::new(stub, write_template(work.path()));

        let children = ChildSet::default();
        let bias = calibrate(&settings, &station, work.path(), &children)
            .await
            .unwrap();
        assert_eq!(bias, 123.45);

        // config derived from the template carries the overrides last
        let conf = std::fs::read_to_string(
            station.directory(work.path()).join(super::CAL_CONFIG_NAME),
        )
        .unwrap();
        assert!(conf.starts_with("GNSS-SDR.internal_fs_hz=2048000\n"));
        assert!(conf.contains("SignalSource.address=10.0.0.4\n"));
        assert!(conf.ends_with("SignalSource.port=1234\n"));

        // and the bias was persisted for the next admission
        let saved =
            StationConfig::load(&station.directory(work.path()).join(STATION_CONFIG_FILE));
        assert_eq!(saved, Some(StationConfig::new(123.45)));
        assert!(children.is_empty());
    }

    #[tokio::test]
    async fn unrelated_chatter_times_out_without_saving() {
        let work = tempfile::tempdir().unwrap();
        let station = rover("10.0.0.5");

        let stub = write_stub(work.path(), "while :; do echo unrelated; done");
        let mut settings = CalibratorSettings::new(stub, write_template(work.path()));
        settings.deadline = Duration::from_millis(200);
        settings.max_scan_bytes = u64::MAX;

        let children = ChildSet::default();
        let result = calibrate(&settings, &station, work.path(), &children).await;
        assert!(matches!(result, Err(Error::IfBiasNotFound)));

        let saved =
            StationConfig::load(&station.directory(work.path()).join(STATION_CONFIG_FILE));
        assert_eq!(saved, None);
        assert!(children.is_empty());
    }

    #[tokio::test]
    async fn missing_template_is_file_not_found() {
        let work = tempfile::tempdir().unwrap();
        let station = rover("10.0.0.6");

        let settings = CalibratorSettings::new(
            work.path().join("unused"),
            work.path().join("missing-template"),
        );

        let children = ChildSet::default();
        assert!(matches!(
            calibrate(&settings, &station, work.path(), &children).await,
            Err(Error::FileNotFound(_))
        ));
    }
}
