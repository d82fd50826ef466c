use clap::Parser;
use std::env;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use std::process::{Command, ExitCode, ExitStatus};
use thiserror::Error;
use tracing::debug;
use tracing_subscriber::EnvFilter;

const DISPLAY_PROGRAM: &str = "bat";
const LOG_ENV: &str = "HELO_LOG";
const DEFAULT_LOG_FILTER: &str = "warn";

#[derive(Parser, Debug)]
#[command(
    name = "helo",
    version,
    about = "Announce this program's own source file and show it with bat"
)]
struct Cli {}

#[derive(Debug, Error)]
enum HeloError {
    #[error("cannot {action} {}: {source}", .path.display())]
    Filesystem {
        action: &'static str,
        path: PathBuf,
        source: io::Error,
    },
    #[error("{program} not found on PATH: {source}")]
    NotFound {
        program: &'static str,
        source: which::Error,
    },
    #[error("failed to launch {program}: {source}")]
    Launch {
        program: &'static str,
        source: io::Error,
    },
    #[error("{program} exited with status {code}")]
    Status { program: &'static str, code: i32 },
    #[error("{program} terminated by signal {signal}")]
    Signal { program: &'static str, signal: i32 },
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl HeloError {
    /// Process exit status reported for this error.
    ///
    /// A failing child hands its own status through; launch problems use the
    /// shell's 126/127 and signals use 128 + N.
    fn exit_status(&self) -> u8 {
        match self {
            HeloError::Filesystem { .. } | HeloError::Io(_) => 1,
            HeloError::NotFound { .. } => 127,
            HeloError::Launch { .. } => 126,
            HeloError::Status { code, .. } => u8::try_from(*code)
                .ok()
                .filter(|code| *code != 0)
                .unwrap_or(1),
            HeloError::Signal { signal, .. } => u8::try_from(128 + *signal).unwrap_or(1),
        }
    }
}

fn main() -> ExitCode {
    let _cli = Cli::parse();
    init_logging();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(err.exit_status())
        }
    }
}

fn init_logging() {
    let filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run() -> Result<(), HeloError> {
    let source = resolve_source()?;
    debug!(path = %source.display(), "resolved source file");

    let cwd = enter_parent(&source)?;
    let relative = relative_to(&source, &cwd);
    announce(&mut io::stdout().lock(), &relative)?;

    display(&source)
}

fn resolve_source() -> Result<PathBuf, HeloError> {
    let file = Path::new(file!());
    let located = locate_source(file, Path::new(env!("CARGO_MANIFEST_DIR"))).ok_or_else(|| {
        HeloError::Filesystem {
            action: "locate source file",
            path: file.to_path_buf(),
            source: io::Error::new(io::ErrorKind::NotFound, "not found near the crate manifest"),
        }
    })?;
    located
        .canonicalize()
        .map_err(|source| HeloError::Filesystem {
            action: "resolve",
            path: located.clone(),
            source,
        })
}

/// Find the compile-time source path on disk.
///
/// Cargo hands rustc workspace-relative paths for workspace members, so a
/// relative `file` is tried against the manifest directory and each of its
/// ancestors.
fn locate_source(file: &Path, manifest_dir: &Path) -> Option<PathBuf> {
    if file.is_absolute() {
        return Some(file.to_path_buf());
    }
    manifest_dir
        .ancestors()
        .map(|dir| dir.join(file))
        .find(|candidate| candidate.is_file())
}

/// Move into the directory holding `path` and return the working directory
/// as the OS now reports it.
fn enter_parent(path: &Path) -> Result<PathBuf, HeloError> {
    let parent = path.parent().ok_or_else(|| HeloError::Filesystem {
        action: "find parent of",
        path: path.to_path_buf(),
        source: io::Error::new(io::ErrorKind::NotFound, "path has no parent directory"),
    })?;
    env::set_current_dir(parent).map_err(|source| HeloError::Filesystem {
        action: "enter",
        path: parent.to_path_buf(),
        source,
    })?;
    debug!(dir = %parent.display(), "changed working directory");

    env::current_dir().map_err(|source| HeloError::Filesystem {
        action: "read working directory after entering",
        path: parent.to_path_buf(),
        source,
    })
}

fn relative_to(path: &Path, base: &Path) -> PathBuf {
    let path_parts: Vec<Component> = path.components().collect();
    let base_parts: Vec<Component> = base.components().collect();
    let shared = path_parts
        .iter()
        .zip(&base_parts)
        .take_while(|(a, b)| a == b)
        .count();

    let mut relative = PathBuf::new();
    for _ in shared..base_parts.len() {
        relative.push("..");
    }
    relative.extend(&path_parts[shared..]);
    if relative.as_os_str().is_empty() {
        relative.push(".");
    }
    relative
}

fn banner(relative: &Path) -> String {
    format!("HELO :: VIA -- {}", relative.display())
}

// Flushed so the banner lands before anything the child writes.
fn announce<W: Write>(out: &mut W, relative: &Path) -> io::Result<()> {
    writeln!(out, "{}", banner(relative))?;
    out.flush()
}

fn display(path: &Path) -> Result<(), HeloError> {
    let program = which::which(DISPLAY_PROGRAM).map_err(|source| HeloError::NotFound {
        program: DISPLAY_PROGRAM,
        source,
    })?;
    debug!(
        program = %program.display(),
        file = %path.display(),
        "launching display program"
    );
    let status = Command::new(&program)
        .arg("--")
        .arg(path)
        .status()
        .map_err(|source| HeloError::Launch {
            program: DISPLAY_PROGRAM,
            source,
        })?;
    check_status(status)
}

fn check_status(status: ExitStatus) -> Result<(), HeloError> {
    if status.success() {
        return Ok(());
    }
    if let Some(code) = status.code() {
        return Err(HeloError::Status {
            program: DISPLAY_PROGRAM,
            code,
        });
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return Err(HeloError::Signal {
                program: DISPLAY_PROGRAM,
                signal,
            });
        }
    }
    Err(HeloError::Status {
        program: DISPLAY_PROGRAM,
        code: -1,
    })
}
