//! Atomic self-replacement.
//!
//! Two strategies cover every supported host. On Unix the live executable
//! (or macOS `.app` bundle) is overwritten and the process image replaced in
//! place, preserving `argv[0]`. On Windows the running `.exe` cannot be
//! overwritten, so a small host script is dropped next to it that waits for
//! the parent to exit, moves the staged executable over the live one,
//! relaunches it and deletes itself.

use crate::error::{ClientError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// How the live executable gets replaced on this host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapStrategy {
    /// Overwrite and `exec` the new image (Unix, including macOS bundles).
    InProcessReplace,
    /// Delegate to the delayed-replace host script (Windows).
    DelayedHostScript,
}

impl SwapStrategy {
    pub fn for_host() -> Self {
        if cfg!(windows) {
            SwapStrategy::DelayedHostScript
        } else {
            SwapStrategy::InProcessReplace
        }
    }
}

/// Filename of the Windows delayed-replace script.
pub const HOST_SCRIPT_NAME: &str = "update.bat";

/// Resolve where the running application lives. On macOS GUI builds the
/// executable sits in `<bundle>.app/Contents/MacOS/`, and replacement
/// targets the bundle directory three levels up.
pub fn resolve_app_dir(exe_dir: &Path) -> PathBuf {
    if exe_dir.ends_with("Contents/MacOS") {
        if let Some(bundle_parent) = exe_dir
            .parent()
            .and_then(Path::parent)
            .and_then(Path::parent)
        {
            debug!(dir = %bundle_parent.display(), "resolved .app bundle parent");
            return bundle_parent.to_path_buf();
        }
    }
    exe_dir.to_path_buf()
}

/// Pick the staged artifact and the live target for `name`, preferring the
/// bare executable and falling back to a `.app` bundle.
pub fn resolve_swap_paths(update_dir: &Path, app_dir: &Path, name: &str) -> (PathBuf, PathBuf) {
    let mut staged = update_dir.join(name);
    if !staged.exists() {
        staged = update_dir.join(format!("{name}.app"));
    }
    let mut live = app_dir.join(name);
    if !live.exists() && app_dir.join(format!("{name}.app")).exists() {
        live = app_dir.join(format!("{name}.app"));
    }
    (staged, live)
}

/// Move the staged executable (or bundle) over the live one.
pub fn overwrite_app(staged: &Path, live: &Path) -> Result<()> {
    if !staged.exists() {
        return Err(ClientError::SwapFailed(format!(
            "staged executable missing: {}",
            staged.display()
        )));
    }
    if live.exists() {
        if live.is_dir() {
            fs::remove_dir_all(live)?;
        } else {
            fs::remove_file(live)?;
        }
    }
    info!(from = %staged.display(), to = %live.display(), "moving app to new location");
    fs::rename(staged, live).map_err(|err| {
        ClientError::SwapFailed(format!(
            "cannot move {} over {}: {err}",
            staged.display(),
            live.display()
        ))
    })
}

/// Replace the current process image with the updated executable,
/// preserving the application name as `argv[0]`. Only returns on failure.
#[cfg(unix)]
pub fn exec_replacement(live: &Path, name: &str) -> Result<()> {
    use std::os::unix::process::CommandExt;

    let executable = bundle_executable(live, name);
    info!(exe = %executable.display(), "restarting");
    let err = std::process::Command::new(&executable).arg0(name).exec();
    Err(ClientError::SwapFailed(format!(
        "exec of {} failed: {err}",
        executable.display()
    )))
}

#[cfg(not(unix))]
pub fn exec_replacement(_live: &Path, _name: &str) -> Result<()> {
    Err(ClientError::Unsupported("in-process replacement"))
}

/// Inside a macOS bundle the real binary lives at `Contents/MacOS/<name>`.
fn bundle_executable(live: &Path, name: &str) -> PathBuf {
    if live.extension().is_some_and(|ext| ext == "app") {
        return live.join("Contents").join("MacOS").join(name);
    }
    live.to_path_buf()
}

/// Write the delayed-replace host script into the application directory and
/// return its path. The script waits ~5 seconds for the parent process to
/// exit, moves the staged executable over the live one, relaunches the
/// application and removes itself.
pub fn write_host_script(app_dir: &Path, staged_exe: &Path, live_exe: &Path) -> Result<PathBuf> {
    let script_path = app_dir.join(HOST_SCRIPT_NAME);
    let script = format!(
        "@echo off\r\n\
         echo Updating to latest version...\r\n\
         ping 127.0.0.1 -n 5 -w 1000 > NUL\r\n\
         move /Y \"{staged}\" \"{live}\" > NUL\r\n\
         echo restarting...\r\n\
         start \"\" \"{live}\"\r\n\
         DEL \"%~f0\"\r\n",
        staged = staged_exe.display(),
        live = live_exe.display(),
    );
    fs::write(&script_path, script)?;
    info!(path = %script_path.display(), "wrote delayed-replace script");
    Ok(script_path)
}

/// Launch the host script detached. The caller is expected to exit
/// immediately afterwards so the script can move the executable.
#[cfg(windows)]
pub fn spawn_host_script(script: &Path) -> Result<()> {
    info!(script = %script.display(), "starting update batch file");
    std::process::Command::new("cmd")
        .arg("/C")
        .arg("start")
        .arg("")
        .arg(script)
        .spawn()
        .map_err(|err| ClientError::SwapFailed(format!("cannot launch host script: {err}")))?;
    Ok(())
}

#[cfg(not(windows))]
pub fn spawn_host_script(_script: &Path) -> Result<()> {
    Err(ClientError::Unsupported("delayed-replace host script"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_matches_host_family() {
        let strategy = SwapStrategy::for_host();
        if cfg!(windows) {
            assert_eq!(strategy, SwapStrategy::DelayedHostScript);
        } else {
            assert_eq!(strategy, SwapStrategy::InProcessReplace);
        }
    }

    #[test]
    fn app_dir_resolution_unwraps_mac_bundles() {
        let exe_dir = Path::new("/Applications/App.app/Contents/MacOS");
        assert_eq!(resolve_app_dir(exe_dir), Path::new("/Applications"));
        assert_eq!(
            resolve_app_dir(Path::new("/usr/local/bin")),
            Path::new("/usr/local/bin")
        );
    }

    #[test]
    fn overwrite_replaces_files_and_directories() {
        let dir = tempfile::tempdir().unwrap();
        let staged = dir.path().join("staged");
        let live = dir.path().join("live");
        fs::write(&staged, b"new binary").unwrap();
        fs::write(&live, b"old binary").unwrap();

        overwrite_app(&staged, &live).unwrap();
        assert_eq!(fs::read(&live).unwrap(), b"new binary");
        assert!(!staged.exists());
    }

    #[test]
    fn overwrite_requires_staged_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let err = overwrite_app(&dir.path().join("ghost"), &dir.path().join("live")).unwrap_err();
        assert!(matches!(err, ClientError::SwapFailed(_)));
    }

    #[test]
    fn host_script_contains_the_delayed_replace_dance() {
        let dir = tempfile::tempdir().unwrap();
        let staged = dir.path().join("update").join("app.exe");
        let live = dir.path().join("app.exe");

        let script_path = write_host_script(dir.path(), &staged, &live).unwrap();
        let script = fs::read_to_string(&script_path).unwrap();

        assert!(script.contains("ping 127.0.0.1 -n 5"));
        assert!(script.contains(&format!("move /Y \"{}\" \"{}\"", staged.display(), live.display())));
        assert!(script.contains(&format!("start \"\" \"{}\"", live.display())));
        assert!(script.contains("DEL \"%~f0\""));
        assert_eq!(script_path.file_name().unwrap(), HOST_SCRIPT_NAME);
    }

    #[test]
    fn bundle_executable_points_into_contents_macos() {
        let path = bundle_executable(Path::new("/Applications/App.app"), "App");
        assert_eq!(path, Path::new("/Applications/App.app/Contents/MacOS/App"));
        let plain = bundle_executable(Path::new("/usr/local/bin/app"), "app");
        assert_eq!(plain, Path::new("/usr/local/bin/app"));
    }
}
