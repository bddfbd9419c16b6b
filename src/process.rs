//! Spawning external commands with a chosen set of pipes attached.

use std::io::Read;
use std::path::Path;

#[cfg(unix)]
use crate::process_posix as sys;
#[cfg(windows)]
use crate::process_win as sys;

/// A pipe requested between the build and a child process.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Channel {
    Stdin,
    Stdout,
    Stderr,
    /// Carries the paths of files the child opens, one per line.
    Dependencies,
}

/// Everything needed to start a child process.
#[derive(Debug, Default, Clone)]
pub struct Spawn {
    /// Program to run.  Without one the command line is handed to the
    /// platform shell.
    pub executable: Option<String>,
    /// The full command line, program name included.
    pub command: String,
    /// Replaces the inherited environment when set.
    pub environment: Option<Vec<(String, String)>>,
    /// Variables added on top of whichever environment the child gets.
    pub extra_environment: Vec<(String, String)>,
    pub directory: Option<String>,
    /// Create the process but hold it until `resume()`.
    pub start_suspended: bool,
    pub channels: Vec<Channel>,
}

impl Spawn {
    /// A command line to be run through the shell.
    pub fn shell(command: impl Into<String>) -> Self {
        Spawn {
            command: command.into(),
            channels: vec![Channel::Stdout, Channel::Stderr],
            ..Default::default()
        }
    }

    pub fn wants(&self, channel: Channel) -> bool {
        self.channels.contains(&channel)
    }
}

pub type Pipe = Box<dyn Read + Send>;

enum State {
    Suspended(std::process::Command, sys::Extra),
    Running(std::process::Child),
    Exited(i32),
}

pub struct Process {
    state: State,
    pipes: Vec<(Channel, Pipe)>,
}

impl Process {
    pub fn spawn(spawn: Spawn) -> anyhow::Result<Process> {
        let (mut command, extra) = sys::command(&spawn)?;
        if let Some(directory) = &spawn.directory {
            command.current_dir(directory);
        }
        if let Some(environment) = &spawn.environment {
            command.env_clear();
            command.envs(environment.iter().map(|(k, v)| (k, v)));
        }
        command.envs(spawn.extra_environment.iter().map(|(k, v)| (k, v)));
        let piped = |channel| {
            if spawn.wants(channel) {
                std::process::Stdio::piped()
            } else {
                std::process::Stdio::null()
            }
        };
        command.stdin(piped(Channel::Stdin));
        command.stdout(piped(Channel::Stdout));
        command.stderr(piped(Channel::Stderr));

        let mut process = Process {
            state: State::Suspended(command, extra),
            pipes: Vec::new(),
        };
        if !spawn.start_suspended {
            process.resume()?;
        }
        Ok(process)
    }

    /// Start a process created suspended.  Does nothing if already running.
    pub fn resume(&mut self) -> anyhow::Result<()> {
        let state = std::mem::replace(&mut self.state, State::Exited(-1));
        let (mut command, extra) = match state {
            State::Suspended(command, extra) => (command, extra),
            other => {
                self.state = other;
                return Ok(());
            }
        };
        let mut child = command
            .spawn()
            .map_err(|err| anyhow::anyhow!("spawn {:?}: {}", command.get_program(), err))?;
        if let Some(stdout) = child.stdout.take() {
            self.pipes.push((Channel::Stdout, Box::new(stdout)));
        }
        if let Some(stderr) = child.stderr.take() {
            self.pipes.push((Channel::Stderr, Box::new(stderr)));
        }
        if let Some(dependencies) = sys::spawned(extra)? {
            self.pipes.push((Channel::Dependencies, dependencies));
        }
        // Nothing is ever written to the child's stdin; closing it signals
        // end of input.
        drop(child.stdin.take());
        self.state = State::Running(child);
        Ok(())
    }

    /// Take ownership of the read end of a pipe, if it was requested.
    pub fn take_pipe(&mut self, channel: Channel) -> Option<Pipe> {
        let index = self.pipes.iter().position(|(c, _)| *c == channel)?;
        Some(self.pipes.swap_remove(index).1)
    }

    /// Wait for the process to exit, returning its exit code.
    pub fn wait(&mut self) -> anyhow::Result<i32> {
        self.resume()?;
        if let State::Running(child) = &mut self.state {
            let status = child.wait()?;
            self.state = State::Exited(sys::exit_code(status));
        }
        Ok(self.exit_code().unwrap_or(-1))
    }

    /// The exit code, once the process has been waited for.
    pub fn exit_code(&self) -> Option<i32> {
        match self.state {
            State::Exited(code) => Some(code),
            _ => None,
        }
    }
}

/// Whether a discovery mechanism could be attached to a spawn.
#[derive(Debug, PartialEq, Eq)]
pub enum Discovery {
    Enabled,
    Unsupported,
}

/// Arranges for a child process to report the files it opens over the
/// dependencies channel, by way of an interception library.
pub trait DependencyDiscovery: Send + Sync {
    fn enable(&self, spawn: &mut Spawn, library: &Path) -> Discovery;
}

/// Loads the interception library with the dynamic linker's preload
/// mechanism.
pub struct Preload;

pub const DEPENDENCIES_FD_VARIABLE: &str = "SWEET_DEPENDENCIES_FD";

impl DependencyDiscovery for Preload {
    #[cfg(unix)]
    fn enable(&self, spawn: &mut Spawn, library: &Path) -> Discovery {
        let variable = if cfg!(target_os = "macos") {
            "DYLD_INSERT_LIBRARIES"
        } else {
            "LD_PRELOAD"
        };
        spawn.extra_environment.push((
            variable.to_string(),
            library.to_string_lossy().into_owned(),
        ));
        spawn.extra_environment.push((
            DEPENDENCIES_FD_VARIABLE.to_string(),
            sys::DEPENDENCIES_FD.to_string(),
        ));
        if !spawn.wants(Channel::Dependencies) {
            spawn.channels.push(Channel::Dependencies);
        }
        Discovery::Enabled
    }

    #[cfg(not(unix))]
    fn enable(&self, _spawn: &mut Spawn, _library: &Path) -> Discovery {
        Discovery::Unsupported
    }
}
