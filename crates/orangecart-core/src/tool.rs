use std::{
    fmt,
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use log::{debug, info};

use crate::OrangeCartError;

/// One external program run, kept as data until it is executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

impl ToolInvocation {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            args: Vec::new(),
            cwd: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_owned());
        self
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }
        command
    }

    /// Runs the program to completion with inherited stdio.
    pub fn run(&self) -> Result<(), OrangeCartError> {
        info!("{}", self);

        let status = self
            .command()
            .status()
            .map_err(|source| OrangeCartError::FailedToSpawn {
                program: self.program.clone(),
                source,
            })?;

        debug!("{} exited with {}", self.program, status);

        if !status.success() {
            return Err(OrangeCartError::ToolFailed {
                program: self.program.clone(),
                status,
            });
        }

        Ok(())
    }

    /// Runs the program and returns its stdout.
    pub fn output(&self) -> Result<String, OrangeCartError> {
        debug!("{}", self);

        let output = self
            .command()
            .stdin(Stdio::null())
            .output()
            .map_err(|source| OrangeCartError::FailedToSpawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(OrangeCartError::ToolFailed {
                program: self.program.clone(),
                status: output.status,
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl fmt::Display for ToolInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " \"{}\"", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}
