use std::process::{Command, Stdio};

use anyhow::{Context, Result, bail};

#[derive(Clone, Debug)]
pub enum EnvValue {
    Plain(String),
    Secret(String),
}

#[derive(Clone, Debug)]
pub struct CmdSpec {
    program: String,
    args: Vec<String>,
    envs: Vec<(String, EnvValue)>,
}

impl CmdSpec {
    #[must_use]
    pub fn new<S: Into<String>>(program: S) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
        }
    }

    #[must_use]
    pub fn arg(mut self, a: impl Into<String>) -> Self {
        self.args.push(a.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, it: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(it.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn env(mut self, k: impl Into<String>, v: EnvValue) -> Self {
        self.envs.push((k.into(), v));
        self
    }

    pub fn render(&self) -> String {
        let prog = sh_quote(&self.program);
        let args: Vec<String> = self.args.iter().map(|a| sh_quote(a)).collect();
        let mut env_prefix = String::new();
        for (k, v) in &self.envs {
            match v {
                EnvValue::Plain(val) => env_prefix.push_str(&format!("{k}={} ", sh_quote(val))),
                EnvValue::Secret(_) => env_prefix.push_str(&format!("{k}=<redacted> ")),
            }
        }
        format!("{}{} {}", env_prefix, prog, args.join(" "))
    }

    fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        for (k, v) in &self.envs {
            match v {
                EnvValue::Plain(val) => cmd.env(k, val),
                EnvValue::Secret(val) => cmd.env(k, val),
            };
        }
        cmd.stdin(Stdio::null());
        cmd.stderr(Stdio::piped());
        cmd
    }
}

pub trait Runner: Send + Sync {
    /// Runs the command and returns its stdout; non-zero exit is an error.
    fn run_capture(&self, cmd: &CmdSpec) -> Result<String>;
}

#[derive(Default, Clone)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

impl Runner for ProcessRunner {
    fn run_capture(&self, spec: &CmdSpec) -> Result<String> {
        tracing::debug!("exec: {}", spec.render());

        let mut cmd = spec.to_command();
        cmd.stdout(Stdio::piped());

        let out = cmd
            .output()
            .with_context(|| format!("run {}", spec.render()))?;
        if out.status.success() {
            return Ok(String::from_utf8_lossy(&out.stdout).to_string());
        }

        let stderr = String::from_utf8_lossy(&out.stderr);
        let stderr = stderr.trim();
        if stderr.is_empty() {
            bail!("command failed: {} (status {})", spec.render(), out.status);
        }
        bail!(
            "command failed: {} (status {}): {stderr}",
            spec.render(),
            out.status
        );
    }
}

/// Quotes `s` for a POSIX shell when it carries anything the shell would
/// interpret.
pub fn sh_quote(s: &str) -> String {
    if s.is_empty() {
        return "''".into();
    }
    const SPECIAL: &[u8] = b" \t\n'\"\\$`*?[]{}()<>|&;#!~";
    if !s.bytes().any(|b| SPECIAL.contains(&b)) {
        return s.to_string();
    }
    let mut out = String::from("'");
    for c in s.chars() {
        if c == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(c);
        }
    }
    out.push('\'');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sh_quote_empty() {
        assert_eq!(sh_quote(""), "''");
    }

    #[test]
    fn sh_quote_simple() {
        assert_eq!(sh_quote("/var/lib/cinder/abc"), "/var/lib/cinder/abc");
    }

    #[test]
    fn sh_quote_glob_is_protected() {
        assert_eq!(sh_quote("/var/lib/cinder/*"), "'/var/lib/cinder/*'");
    }

    #[test]
    fn sh_quote_with_single_quote() {
        assert_eq!(sh_quote("don't"), "'don'\\''t'");
    }

    #[test]
    fn cmd_spec_render() {
        let cmd = CmdSpec::new("ssh").arg("root@host").arg("ls -l");
        assert_eq!(cmd.render(), "ssh root@host 'ls -l'");
    }

    #[test]
    fn cmd_spec_with_env() {
        let cmd = CmdSpec::new("openstack")
            .env("OS_USERNAME", EnvValue::Plain("admin".into()))
            .env("OS_PASSWORD", EnvValue::Secret("hidden".into()));
        assert_eq!(
            cmd.render(),
            "OS_USERNAME=admin OS_PASSWORD=<redacted> openstack "
        );
    }

    #[test]
    fn failing_command_reports_status() {
        let runner = ProcessRunner::new();
        let err = runner
            .run_capture(&CmdSpec::new("sh").args(["-c", "echo boom >&2; exit 3"]))
            .unwrap_err()
            .to_string();
        assert!(err.contains("boom"), "err was: {err}");
    }

    #[test]
    fn capture_returns_stdout() {
        let runner = ProcessRunner::new();
        let out = runner
            .run_capture(&CmdSpec::new("sh").args(["-c", "printf 'a\\nb\\n'"]))
            .unwrap();
        assert_eq!(out, "a\nb\n");
    }
}
