//! Posix side of process spawning: shell invocation, argument splitting,
//! and the extra descriptor carrying discovered dependencies.

use crate::process::{Channel, Pipe, Spawn};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::process::Command;

/// Descriptor number the dependencies pipe is mapped to in the child.
pub const DEPENDENCIES_FD: i32 = 3;

fn check_posix(func: &str, ret: libc::c_int) -> anyhow::Result<()> {
    if ret < 0 {
        anyhow::bail!("{}: {}", func, std::io::Error::last_os_error());
    }
    Ok(())
}

/// State that must outlive the Command until the child has started.
pub struct Extra {
    dependencies: Option<(OwnedFd, OwnedFd)>,
}

/// A pipe whose ends are both close-on-exec, as (read, write).
fn pipe() -> anyhow::Result<(OwnedFd, OwnedFd)> {
    let mut fds: [libc::c_int; 2] = [0; 2];
    unsafe {
        check_posix("pipe", libc::pipe(fds.as_mut_ptr()))?;
        let (read, write) = (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1]));
        for fd in &fds {
            check_posix("fcntl", libc::fcntl(*fd, libc::F_SETFD, libc::FD_CLOEXEC))?;
        }
        Ok((read, write))
    }
}

/// Split a command line into arguments the way a posix shell would for
/// plain words: whitespace separates, quotes group, backslash escapes.
pub fn split_command_line(line: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut arg = String::new();
    let mut in_arg = false;
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        match c {
            ' ' | '\t' | '\n' => {
                if in_arg {
                    args.push(std::mem::take(&mut arg));
                    in_arg = false;
                }
            }
            '\'' => {
                in_arg = true;
                for c in chars.by_ref() {
                    if c == '\'' {
                        break;
                    }
                    arg.push(c);
                }
            }
            '"' => {
                in_arg = true;
                while let Some(c) = chars.next() {
                    match c {
                        '"' => break,
                        '\\' => match chars.next() {
                            Some(e @ ('"' | '\\' | '$' | '`')) => arg.push(e),
                            Some(e) => {
                                arg.push('\\');
                                arg.push(e);
                            }
                            None => arg.push('\\'),
                        },
                        c => arg.push(c),
                    }
                }
            }
            '\\' => {
                in_arg = true;
                if let Some(c) = chars.next() {
                    arg.push(c);
                }
            }
            c => {
                in_arg = true;
                arg.push(c);
            }
        }
    }
    if in_arg {
        args.push(arg);
    }
    args
}

pub fn command(spawn: &Spawn) -> anyhow::Result<(Command, Extra)> {
    let mut command = match &spawn.executable {
        None => {
            let mut command = Command::new("/bin/sh");
            command.arg("-c").arg(&spawn.command);
            command
        }
        Some(executable) => {
            let mut command = Command::new(executable);
            let args = split_command_line(&spawn.command);
            // The first word names the program, which `executable` overrides.
            command.args(args.iter().skip(1));
            command
        }
    };

    let mut extra = Extra { dependencies: None };
    if spawn.wants(Channel::Dependencies) {
        let (read, write) = pipe()?;
        let fd = write.as_raw_fd();
        unsafe {
            command.pre_exec(move || {
                if fd == DEPENDENCIES_FD {
                    let flags = libc::fcntl(fd, libc::F_GETFD);
                    if flags < 0 || libc::fcntl(fd, libc::F_SETFD, flags & !libc::FD_CLOEXEC) < 0 {
                        return Err(std::io::Error::last_os_error());
                    }
                } else if libc::dup2(fd, DEPENDENCIES_FD) < 0 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }
        extra.dependencies = Some((read, write));
    }
    Ok((command, extra))
}

/// Called once the child is running: the parent's copy of the write end
/// must be closed so the reader sees end of file when the child exits.
pub fn spawned(extra: Extra) -> anyhow::Result<Option<Pipe>> {
    Ok(extra.dependencies.map(|(read, write)| {
        drop(write);
        Box::new(std::fs::File::from(read)) as Pipe
    }))
}

/// Exit code of a finished child; death by signal reads as 128 + signal,
/// as shells report it.
pub fn exit_code(status: std::process::ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => -1,
    }
}
