//! Windows side of process spawning.  Command lines are passed through to
//! CreateProcess unchanged rather than re-quoted.

use crate::process::{Pipe, Spawn};
use std::os::windows::process::CommandExt;
use std::process::Command;

/// Dependency discovery has no Windows implementation, so nothing extra
/// needs to outlive the Command.
pub struct Extra;

pub const DEPENDENCIES_FD: i32 = -1;

pub fn command(spawn: &Spawn) -> anyhow::Result<(Command, Extra)> {
    let command = match &spawn.executable {
        None => {
            let mut command = Command::new("cmd.exe");
            command.raw_arg("/c").raw_arg(&spawn.command);
            command
        }
        Some(executable) => {
            let mut command = Command::new(executable);
            // CreateProcess takes the whole line, program name included; std
            // prepends the quoted program, so pass only what follows it.
            let line = spawn.command.trim_start();
            let rest = match line.strip_prefix('"') {
                Some(quoted) => quoted.split_once('"').map_or("", |(_, rest)| rest),
                None => line.split_once(' ').map_or("", |(_, rest)| rest),
            };
            command.raw_arg(rest.trim_start());
            command
        }
    };
    Ok((command, Extra))
}

pub fn spawned(_extra: Extra) -> anyhow::Result<Option<Pipe>> {
    Ok(None)
}

pub fn exit_code(status: std::process::ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}
