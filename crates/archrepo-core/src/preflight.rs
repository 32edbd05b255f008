//! Preflight checks run before any build work.
//!
//! The package builder refuses to run as root, and a missing builder or
//! indexer would otherwise only surface after every recipe has been
//! attempted.

use crate::command::ToolCommand;

/// Environment variable allowing the pipeline to run as root.
pub const ALLOW_ROOT_ENV: &str = "ARCHREPO_ALLOW_ROOT";

/// A failed preflight check.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PreflightError {
    /// The effective user is root.
    #[error("refusing to run as root: makepkg does not build packages as root")]
    RunningAsRoot,

    /// Required external tools are not on `PATH`.
    #[error("missing required tools:\n{}", format_missing(.0))]
    MissingTools(Vec<MissingTool>),
}

/// A required tool that was not found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingTool {
    /// What the tool is used for (`build`, `index`).
    pub role: String,
    /// The program that was looked up.
    pub program: String,
}

fn format_missing(missing: &[MissingTool]) -> String {
    missing
        .iter()
        .map(|m| format!("  {} ({} command)", m.program, m.role))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Whether the process runs with effective uid 0.
#[cfg(unix)]
pub fn is_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() == 0 }
}

/// Whether the process runs with effective uid 0.
#[cfg(not(unix))]
pub fn is_root() -> bool {
    false
}

/// Fail when running as root, unless explicitly allowed.
///
/// # Errors
///
/// Returns [`PreflightError::RunningAsRoot`].
pub fn check_not_root(allow_root: bool) -> Result<(), PreflightError> {
    if is_root() {
        if allow_root {
            tracing::warn!("running as root ({ALLOW_ROOT_ENV} is set)");
        } else {
            return Err(PreflightError::RunningAsRoot);
        }
    }
    Ok(())
}

/// Check that every `(role, command)` program can be found.
///
/// # Errors
///
/// Returns [`PreflightError::MissingTools`] listing all missing programs.
pub fn check_tools(tools: &[(&str, &ToolCommand)]) -> Result<(), PreflightError> {
    let missing: Vec<MissingTool> = tools
        .iter()
        .filter(|(_, cmd)| !cmd.is_available())
        .map(|(role, cmd)| MissingTool {
            role: (*role).to_string(),
            program: cmd.program().to_string(),
        })
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(PreflightError::MissingTools(missing))
    }
}

/// All checks required before `build`.
///
/// # Errors
///
/// Returns the first failing check.
pub fn check_build(
    allow_root: bool,
    build: &ToolCommand,
    index: &ToolCommand,
) -> Result<(), PreflightError> {
    check_not_root(allow_root)?;
    check_tools(&[("build", build), ("index", index)])?;
    tracing::debug!(build = %build, index = %index, "preflight passed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_check_follows_euid() {
        assert_eq!(check_not_root(false).is_ok(), !is_root());
        assert!(check_not_root(true).is_ok());
    }

    #[test]
    fn test_check_tools_reports_every_missing_program() {
        let sh = ToolCommand::new("sh");
        let nope = ToolCommand::new("definitely-not-a-real-tool-12345");
        let other = ToolCommand::parse("also-missing-67890 --flag").unwrap();

        assert!(check_tools(&[("build", &sh)]).is_ok());

        let err = check_tools(&[("build", &nope), ("shell", &sh), ("index", &other)]).unwrap_err();
        let PreflightError::MissingTools(missing) = &err else {
            panic!("unexpected error: {err:?}");
        };
        assert_eq!(missing.len(), 2);
        assert_eq!(missing[0].program, "definitely-not-a-real-tool-12345");
        assert_eq!(missing[1].role, "index");
        assert!(err.to_string().contains("also-missing-67890 (index command)"));
    }

    #[test]
    fn test_check_build() {
        let sh = ToolCommand::new("sh");
        let nope = ToolCommand::new("definitely-not-a-real-tool-12345");

        assert!(check_build(true, &sh, &sh).is_ok());
        assert!(matches!(
            check_build(true, &sh, &nope),
            Err(PreflightError::MissingTools(_))
        ));
    }
}
