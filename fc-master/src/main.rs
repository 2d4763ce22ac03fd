//! Fan Club master: headless fan-array controller.
//!
//! Environment:
//! - `FC_PROFILE_PATH`: profile archive to load at startup (optional).
//! - `FC_LOG_DIR`: directory for data logs (optional; defaults to the
//!   platform data dir, then `.`).
//!
//! Exit codes: 0 clean shutdown, 2 unrecoverable archive load failure,
//! 3 socket bind failure, 1 any other fatal.

mod orchestrator;

use std::fs::File;
use std::io::BufRead;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{error, info, warn, LevelFilter};
use simplelog::{
    ColorChoice, CombinedLogger, Config, SharedLogger, TermLogger, TerminalMode, WriteLogger,
};

use fc_core::{Archive, ArchiveActor};
use fc_types::error::ErrorKind;

use orchestrator::{ExitReason, Orchestrator};

const FC_VERSION: &str = concat!("IV-", env!("CARGO_PKG_VERSION"));

fn log_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("FC_LOG_DIR") {
        return PathBuf::from(dir);
    }
    dirs::data_dir()
        .map(|d| d.join("fanclub"))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn init_logging() {
    let dir = log_dir();
    let _ = std::fs::create_dir_all(&dir);
    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        LevelFilter::Info,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )];
    if let Ok(file) = File::create(dir.join("master.log")) {
        loggers.push(WriteLogger::new(LevelFilter::Debug, Config::default(), file));
    }
    let _ = CombinedLogger::init(loggers);
}

fn load_archive() -> Result<(Archive, Option<PathBuf>), ExitCode> {
    let mut archive = Archive::new(FC_VERSION);
    let Ok(path) = std::env::var("FC_PROFILE_PATH") else {
        return Ok((archive, None));
    };
    let path = PathBuf::from(path);
    let bytes = match std::fs::read(&path) {
        Ok(bytes) => bytes,
        Err(e) => {
            error!("cannot read profile {}: {}", path.display(), e);
            return Err(ExitCode::from(2));
        }
    };
    match archive.load(&bytes) {
        Ok(outcome) => {
            if !outcome.rescued.is_empty() {
                warn!(
                    "profile loaded with {} rescued field(s)",
                    outcome.rescued.len()
                );
            }
            info!("profile loaded from {}", path.display());
            Ok((archive, Some(path)))
        }
        Err(e) if matches!(e.kind, ErrorKind::Corrupted | ErrorKind::EncodingIssue) => {
            error!("profile {} unusable: {}", path.display(), e);
            Err(ExitCode::from(2))
        }
        Err(e) => {
            error!("profile load failed: {}", e);
            Err(ExitCode::from(1))
        }
    }
}

/// Watch stdin for `q`/`quit`; EOF also requests shutdown.
fn spawn_quit_watcher(stop: Arc<AtomicBool>) {
    std::thread::Builder::new()
        .name("fc-stdin".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                match line {
                    Ok(line) if matches!(line.trim(), "q" | "quit" | "exit") => break,
                    Ok(_) => {}
                    Err(_) => break,
                }
            }
            stop.store(true, Ordering::SeqCst);
        })
        .ok();
}

fn main() -> ExitCode {
    init_logging();
    info!("Fan Club master {}", FC_VERSION);

    let (archive, profile_path) = match load_archive() {
        Ok(loaded) => loaded,
        Err(code) => return code,
    };

    let report = fc_core::archive::validate_profile(archive.profile());
    for issue in report.issues() {
        warn!("profile: {}", issue);
    }
    if !report.is_ok() {
        error!("profile failed validation with {} errors", report.error_count());
        return ExitCode::from(2);
    }

    // The archive becomes an actor: one thread owns it, everyone else
    // talks through handles and reads snapshots.
    let actor = ArchiveActor::spawn(archive);

    let mut orchestrator = match Orchestrator::start(actor.handle(), profile_path) {
        Ok(orchestrator) => orchestrator,
        Err(e) if e.kind == ErrorKind::Transport => {
            error!("socket bring-up failed: {}", e);
            return ExitCode::from(3);
        }
        Err(e) => {
            error!("startup failed: {}", e);
            return ExitCode::from(1);
        }
    };

    let stop = Arc::new(AtomicBool::new(false));
    spawn_quit_watcher(Arc::clone(&stop));

    let reason = orchestrator.run(&stop);
    let code = match reason {
        ExitReason::Requested => ExitCode::SUCCESS,
        ExitReason::FatalNetwork(ref why) => {
            error!("network failure: {}", why);
            ExitCode::from(1)
        }
    };

    if let Err(e) = orchestrator.shutdown() {
        error!("shutdown incomplete: {}", e);
        actor.stop();
        return ExitCode::from(1);
    }
    actor.stop();
    code
}
