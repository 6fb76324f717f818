/*
 * Genesis is a realtime multi-station GNSS receiver.
 *
 * The supervisor binary: discovers remote antenna stations, calibrates
 * their front-ends, launches one GNSS-SDR worker per station and fuses the
 * observable streams into RTK position solutions.
 */

use std::path::{Path, PathBuf};
use std::sync::Arc;

use env_logger::{Builder, Target};
use log::{error, info, warn, LevelFilter};

use genesis::cli::Cli;
use genesis::rtk::DisabledEngine;
use genesis::supervisor::Supervisor;

/// The configured paths are resolved before anything is started; a path
/// that does not resolve is a configuration error, not a runtime one.
fn canonicalize_or_exit(what: &str, path: &Path) -> PathBuf {
    match path.canonicalize() {
        Ok(path) => path,
        Err(e) => {
            error!("{} \"{}\" is unusable: {}", what, path.display(), e);
            std::process::exit(1);
        },
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::new();

    let mut builder = Builder::from_default_env();
    builder
        .target(Target::Stdout)
        .format_timestamp_secs()
        .format_module_path(false);
    if cli.very_verbose() {
        builder.filter_level(LevelFilter::Trace);
    } else if cli.verbose() {
        builder.filter_level(LevelFilter::Debug);
    }
    builder.init();

    let sdr_config = canonicalize_or_exit("SDR config template", &cli.sdr_config());
    let cal_config = canonicalize_or_exit("FE-CAL config template", &cli.cal_config());
    let sdr_executable = canonicalize_or_exit("SDR executable", &cli.sdr_executable());
    let cal_executable = canonicalize_or_exit("FE-CAL executable", &cli.cal_executable());

    let settings = cli.settings(sdr_config, cal_config, sdr_executable, cal_executable);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        info!("genesis v{} starting", env!("CARGO_PKG_VERSION"));
        warn!("no RTK backend wired in; batches are projected but not solved");

        let mut supervisor = Supervisor::new(settings, Arc::new(DisabledEngine));
        supervisor.run().await
    })?;

    info!("genesis exiting");
    Ok(())
}
