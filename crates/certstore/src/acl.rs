//! File ACLs on key containers, applied through an external utility.

use std::path::PathBuf;
use std::process::Command;

use tracing::info;

use crate::error::{Error, Result};

/// Exit code the utility reports when the principal does not exist on this
/// host. Some principals only exist on newer OS releases, so this is benign.
pub const PRINCIPAL_NOT_FOUND: i32 = 1798;

pub trait AclUtility {
    /// Runs the utility and returns its exit code.
    fn run(
        &self,
        path: &str,
        access: &str,
        principal: &str,
        permission: &str,
    ) -> std::io::Result<i32>;
}

/// Invokes `icacls.exe <path> /<access> <principal>:<permission>`.
#[derive(Debug, Clone)]
pub struct Icacls {
    program: PathBuf,
}

impl Icacls {
    pub fn new() -> Self {
        Self::with_program("icacls.exe")
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for Icacls {
    fn default() -> Self {
        Self::new()
    }
}

impl AclUtility for Icacls {
    fn run(
        &self,
        path: &str,
        access: &str,
        principal: &str,
        permission: &str,
    ) -> std::io::Result<i32> {
        let status = Command::new(&self.program)
            .arg(path)
            .arg(format!("/{access}"))
            .arg(format!("{principal}:{permission}"))
            .status()?;
        // Killed by a signal: no code, report as a generic failure.
        Ok(status.code().unwrap_or(-1))
    }
}

/// Applies `access` (e.g. "grant") of `permission` on `path` to `principal`.
pub fn set_acl(
    acl: &dyn AclUtility,
    path: &str,
    access: &str,
    principal: &str,
    permission: &str,
) -> Result<()> {
    info!(%path, %access, %principal, %permission, "setting key container acl");

    match acl.run(path, access, principal, permission)? {
        0 => Ok(()),
        PRINCIPAL_NOT_FOUND => {
            info!(
                %path,
                %principal,
                "ignoring unknown principal while {access}ing '{permission}' access"
            );
            Ok(())
        }
        code => Err(Error::AclFailed {
            path: path.to_string(),
            access: access.to_string(),
            principal: principal.to_string(),
            permission: permission.to_string(),
            code,
        }),
    }
}
