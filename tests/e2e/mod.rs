//! Support code for e2e tests, which run sweet as a binary.

mod basic;
mod clean;
mod discovered;
mod include;
mod missing;
mod rebuild;

pub fn sweet_binary() -> std::path::PathBuf {
    std::env::current_exe()
        .expect("test binary path")
        .parent()
        .expect("test binary directory")
        .parent()
        .expect("binary directory")
        .join(format!("sweet{}", std::env::consts::EXE_SUFFIX))
}

pub fn sweet_command(args: Vec<&str>) -> std::process::Command {
    let mut cmd = std::process::Command::new(sweet_binary());
    cmd.args(args);
    cmd
}

fn print_output(out: &std::process::Output) {
    // Use print! instead of writing to stdout so the test framework can
    // capture it.
    print!("{}", String::from_utf8_lossy(&out.stdout));
    print!("{}", String::from_utf8_lossy(&out.stderr));
}

pub fn assert_output_contains(out: &std::process::Output, text: &str) {
    let out = String::from_utf8_lossy(&out.stdout);
    if !out.contains(text) {
        panic!(
            "assertion failed; expected output to contain {:?} but got:\n{}",
            text, out
        );
    }
}

pub fn assert_output_not_contains(out: &std::process::Output, text: &str) {
    let out = String::from_utf8_lossy(&out.stdout);
    if out.contains(text) {
        panic!(
            "assertion failed; expected output to not contain {:?} but got:\n{}",
            text, out
        );
    }
}

pub fn assert_stderr_contains(out: &std::process::Output, text: &str) {
    let err = String::from_utf8_lossy(&out.stderr);
    if !err.contains(text) {
        panic!(
            "assertion failed; expected stderr to contain {:?} but got:\n{}",
            text, err
        );
    }
}

/// Manages a temporary directory for invoking sweet.
pub struct TestSpace {
    dir: tempfile::TempDir,
}

impl TestSpace {
    pub fn new() -> anyhow::Result<Self> {
        let dir = tempfile::tempdir()?;
        Ok(TestSpace { dir })
    }

    /// Write a file into the working space, creating parent directories.
    pub fn write(&self, path: &str, content: &str) -> std::io::Result<()> {
        let path = self.dir.path().join(path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)
    }

    /// Read a file from the working space.
    pub fn read(&self, path: &str) -> std::io::Result<Vec<u8>> {
        std::fs::read(self.dir.path().join(path))
    }

    pub fn remove(&self, path: &str) -> std::io::Result<()> {
        std::fs::remove_file(self.dir.path().join(path))
    }

    pub fn exists(&self, path: &str) -> bool {
        self.dir.path().join(path).exists()
    }

    /// Move a file's modification time into the past, so that a later
    /// write is seen as newer even within the same second.
    pub fn age(&self, path: &str, seconds: i64) -> std::io::Result<()> {
        let path = self.dir.path().join(path);
        let mtime = filetime::FileTime::from_last_modification_time(&std::fs::metadata(&path)?);
        let aged = filetime::FileTime::from_unix_time(mtime.unix_seconds() - seconds, 0);
        filetime::set_file_mtime(path, aged)
    }

    /// Age every file in the space, as if the last run was long ago.
    pub fn age_all(&self, seconds: i64) -> std::io::Result<()> {
        let mut dirs = vec![self.dir.path().to_path_buf()];
        while let Some(dir) = dirs.pop() {
            for entry in std::fs::read_dir(dir)? {
                let path = entry?.path();
                if path.is_dir() {
                    dirs.push(path);
                    continue;
                }
                let mtime =
                    filetime::FileTime::from_last_modification_time(&std::fs::metadata(&path)?);
                let aged = filetime::FileTime::from_unix_time(mtime.unix_seconds() - seconds, 0);
                filetime::set_file_mtime(&path, aged)?;
            }
        }
        Ok(())
    }

    /// Invoke sweet, returning process output.
    pub fn run(&self, cmd: &mut std::process::Command) -> std::io::Result<std::process::Output> {
        cmd.current_dir(self.dir.path()).output()
    }

    /// Like run, but also print output if the build failed.
    pub fn run_expect(
        &self,
        cmd: &mut std::process::Command,
    ) -> anyhow::Result<std::process::Output> {
        let out = self.run(cmd)?;
        if !out.status.success() {
            print_output(&out);
            anyhow::bail!("build failed, status {}", out.status);
        }
        Ok(out)
    }

    /// Persist the temp dir locally and abort the test.  Debugging helper.
    #[allow(dead_code)]
    pub fn eject(self) -> ! {
        panic!("ejected at {:?}", self.dir.into_path());
    }
}

// Keep TOUCH_RULE's description the same on every platform so that tests
// can match on it.

#[cfg(unix)]
pub const TOUCH_RULE: &str = "
rule touch
  command = touch $out
  description = touch $out
";

#[cfg(windows)]
pub const TOUCH_RULE: &str = "
rule touch
  command = cmd /c type nul > $out
  description = touch $out
";

#[cfg(unix)]
pub const CAT_RULE: &str = "
rule cat
  command = cat $in > $out
  description = cat $out
";

#[cfg(windows)]
pub const CAT_RULE: &str = "
rule cat
  command = cmd /c type $in > $out
  description = cat $out
";
