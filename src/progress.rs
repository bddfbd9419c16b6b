//! Build progress reporting, for the purpose of display to the user.

use std::cell::Cell;
use std::io::Write;

/// Trait for build progress notifications.  Everything that reaches the
/// user goes through here, so the scheduler stays testable.
pub trait Progress {
    /// A command is about to run on behalf of `target`.
    fn task_started(&self, target: &str, description: &str, command: &str);

    /// A line of output from a running command that no filter consumed.
    fn output(&self, line: &str);

    /// A command finished with `exit_code`.
    fn task_finished(&self, target: &str, description: &str, exit_code: i32);

    /// An error, with the chain of script contexts it was raised in
    /// (innermost first) when there is one.
    fn error(&self, msg: &str, context: &[String]);

    /// Log a line of output.
    fn log(&self, msg: &str);
}

/// Progress implementation for a plain console, without any overprinting.
#[derive(Default)]
pub struct ConsoleProgress {
    /// Whether to print command lines of started programs.
    verbose: bool,
    errors: Cell<usize>,
}

impl ConsoleProgress {
    pub fn new(verbose: bool) -> Self {
        ConsoleProgress {
            verbose,
            errors: Cell::new(0),
        }
    }

    pub fn errors(&self) -> usize {
        self.errors.get()
    }
}

impl Progress for ConsoleProgress {
    fn task_started(&self, _target: &str, description: &str, command: &str) {
        if self.verbose || description.is_empty() {
            self.log(command);
        } else if description == "-" {
            // A description of "-" asks for silence.
        } else {
            self.log(description);
        }
    }

    fn output(&self, line: &str) {
        let mut stdout = std::io::stdout().lock();
        // Output is best effort; a closed stdout shouldn't fail the build.
        let _ = writeln!(stdout, "{}", line);
    }

    fn task_finished(&self, target: &str, _description: &str, exit_code: i32) {
        if exit_code != 0 {
            self.log(&format!("failed: {} (exit code {})", target, exit_code));
        }
    }

    fn error(&self, msg: &str, context: &[String]) {
        self.errors.set(self.errors.get() + 1);
        eprintln!("sweet: error: {}", msg);
        for frame in context {
            eprintln!("  in {}", frame);
        }
    }

    fn log(&self, msg: &str) {
        println!("{}", msg);
    }
}
