//! Subprocess execution utilities.

use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use anyhow::{bail, Context, Result};

/// Builder for subprocess execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessBuilder {
    program: PathBuf,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    cwd: Option<PathBuf>,
}

impl ProcessBuilder {
    /// Create a new process builder for the given program.
    pub fn new(program: impl AsRef<Path>) -> Self {
        ProcessBuilder {
            program: program.as_ref().to_path_buf(),
            args: Vec::new(),
            env: BTreeMap::new(),
            cwd: None,
        }
    }

    /// Create a process builder from an argv vector (`argv[0]` is the program).
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(ProcessBuilder::new(program).args(args))
    }

    /// Add a single argument.
    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_string_lossy().into_owned());
        self
    }

    /// Add multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args.extend(
            args.into_iter()
                .map(|s| s.as_ref().to_string_lossy().into_owned()),
        );
        self
    }

    /// Set an environment variable.
    pub fn env(mut self, key: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        self.env
            .insert(key.as_ref().to_string(), value.as_ref().to_string());
        self
    }

    /// Set several environment variables.
    pub fn envs<'a>(mut self, vars: impl IntoIterator<Item = (&'a String, &'a String)>) -> Self {
        for (key, value) in vars {
            self.env.insert(key.clone(), value.clone());
        }
        self
    }

    /// Set the working directory.
    pub fn cwd(mut self, cwd: impl AsRef<Path>) -> Self {
        self.cwd = Some(cwd.as_ref().to_path_buf());
        self
    }

    /// Get the program path.
    pub fn get_program(&self) -> &Path {
        &self.program
    }

    /// Get the arguments.
    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    /// Get an environment variable set on this builder.
    pub fn get_env(&self, key: &str) -> Option<&str> {
        self.env.get(key).map(String::as_str)
    }

    /// Get the working directory.
    pub fn get_cwd(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    fn build_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);

        for (key, value) in &self.env {
            cmd.env(key, value);
        }

        if let Some(ref cwd) = self.cwd {
            cmd.current_dir(cwd);
        }

        cmd
    }

    /// Execute the command and wait for completion.
    pub fn exec(&self) -> Result<Output> {
        let mut cmd = self.build_command();
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        tracing::debug!("running `{}`", self.display_command());

        let output = cmd
            .output()
            .with_context(|| format!("failed to spawn `{}`", self.program.display()))?;

        Ok(output)
    }

    /// Execute and require success.
    pub fn exec_and_check(&self) -> Result<Output> {
        let output = self.exec()?;
        if !output.status.success() {
            bail!(
                "`{}` failed with exit code {:?}\n{}",
                self.display_command(),
                output.status.code(),
                output_text(&output)
            );
        }
        Ok(output)
    }

    /// Display the command for error messages.
    pub fn display_command(&self) -> String {
        let mut parts = vec![self.program.display().to_string()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

/// Combined stderr and stdout of a finished process, stderr first.
///
/// Long outputs are cut down to their last lines; tool diagnostics are
/// almost always at the tail.
pub fn output_text(output: &Output) -> String {
    const MAX_LINES: usize = 60;

    let mut text = String::from_utf8_lossy(&output.stderr).into_owned();
    let stdout = String::from_utf8_lossy(&output.stdout);
    if !stdout.trim().is_empty() {
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(&stdout);
    }

    let lines: Vec<&str> = text.lines().collect();
    if lines.len() > MAX_LINES {
        let mut tail = format!("... ({} lines omitted)\n", lines.len() - MAX_LINES);
        tail.push_str(&lines[lines.len() - MAX_LINES..].join("\n"));
        tail
    } else {
        text.trim_end().to_string()
    }
}

/// Find an executable in PATH.
pub fn find_executable(name: &str) -> Option<PathBuf> {
    which::which(name).ok()
}

/// Find a tool, honoring an environment override first (e.g. `MAKE`).
pub fn find_tool(env_var: &str, candidates: &[&str]) -> Option<PathBuf> {
    if let Ok(tool) = std::env::var(env_var) {
        if let Some(path) = find_executable(&tool) {
            return Some(path);
        }
    }

    candidates.iter().find_map(|c| find_executable(c))
}

/// Resolve a program name for a sub-step, falling back to the bare name so
/// that spawn failures carry the name the user wrote.
pub fn resolve_program(name: &str) -> PathBuf {
    if Path::new(name).components().count() > 1 {
        return PathBuf::from(name);
    }
    find_executable(name).unwrap_or_else(|| PathBuf::from(name))
}

/// Find CMake.
pub fn find_cmake() -> Option<PathBuf> {
    find_tool("CMAKE", &["cmake"])
}

/// Find make.
pub fn find_make() -> Option<PathBuf> {
    find_tool("MAKE", &["make", "gmake"])
}

/// Find git.
pub fn find_git() -> Option<PathBuf> {
    find_tool("GIT", &["git"])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_builder() {
        let output = ProcessBuilder::new("echo").arg("hello").exec().unwrap();

        assert!(output.status.success());
        let stdout = String::from_utf8_lossy(&output.stdout);
        assert!(stdout.contains("hello"));
    }

    #[test]
    fn test_display_command() {
        let pb = ProcessBuilder::new("cmake").args(["--build", "build", "--parallel", "4"]);

        assert_eq!(pb.display_command(), "cmake --build build --parallel 4");
    }

    #[test]
    fn test_from_argv() {
        let argv = vec!["make".to_string(), "-j4".to_string(), "install".to_string()];
        let pb = ProcessBuilder::from_argv(&argv).unwrap();
        assert_eq!(pb.get_program(), Path::new("make"));
        assert_eq!(pb.get_args(), &["-j4".to_string(), "install".to_string()]);

        assert!(ProcessBuilder::from_argv(&[]).is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_exec_and_check_reports_stderr() {
        let err = ProcessBuilder::new("sh")
            .args(["-c", "echo broken header >&2; exit 3"])
            .exec_and_check()
            .unwrap_err();

        let msg = format!("{:#}", err);
        assert!(msg.contains("Some(3)"));
        assert!(msg.contains("broken header"));
    }

    #[cfg(unix)]
    #[test]
    fn test_env_and_cwd_are_applied() {
        let tmp = tempfile::TempDir::new().unwrap();
        let output = ProcessBuilder::new("sh")
            .args(["-c", "echo $LIME_PATH; pwd"])
            .env("LIME_PATH", "/opt/lime")
            .cwd(tmp.path())
            .exec_and_check()
            .unwrap();

        let stdout = String::from_utf8_lossy(&output.stdout);
        assert!(stdout.contains("/opt/lime"));
        let dir_name = tmp.path().file_name().unwrap().to_string_lossy().into_owned();
        assert!(stdout.contains(&dir_name));
    }
}
