//! Shared helpers for spawning shell commands.

use std::path::Path;
use std::process::ExitStatus;
use tokio::process::Command;

/// Build a `sh -c <command>` (or `cmd /C` on Windows) rooted at `working_dir`.
///
/// On Unix the child leads its own process group, so a Ctrl-C at the terminal
/// reaches only the loop, which then pauses at the next iteration boundary.
pub fn shell_command(command: &str, working_dir: &Path) -> Command {
    let mut cmd = if cfg!(target_os = "windows") {
        let mut cmd = Command::new("cmd");
        cmd.args(["/C", command]);
        cmd
    } else {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", command]);
        cmd
    };
    cmd.current_dir(working_dir);
    #[cfg(unix)]
    cmd.process_group(0);
    cmd
}

/// Exit code of a finished process; `-1` when killed by a signal.
pub fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}
