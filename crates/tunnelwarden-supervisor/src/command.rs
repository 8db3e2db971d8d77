//! The external command the supervisor keeps alive

use std::fmt;

/// Program and arguments of the tunneling process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl TunnelCommand {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// `ssh -N -D <local_bind> <ssh_host>`: no remote command, dynamic SOCKS
    /// forwarding on `local_bind`. `ssh_host` is resolved by ssh itself, so
    /// aliases from `~/.ssh/config` work.
    pub fn ssh(local_bind: &str, ssh_host: &str) -> Self {
        Self::new("ssh", ["-N", "-D", local_bind, ssh_host])
    }
}

impl fmt::Display for TunnelCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}
