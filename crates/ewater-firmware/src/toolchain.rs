//! Locating Python and esptool on the host
//!
//! Candidates are tried in rank order and the first that works wins:
//!
//! 1. PlatformIO's bundled interpreter (`~/.platformio/penv`)
//! 2. `$PYTHON`
//! 3. `python3` then `python` (`python` first on Windows)
//!
//! A candidate must answer `--version` and import `serial`. Every check goes
//! through a [`Probe`] so resolution can be tested without a real Python.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;

use crate::error::ToolchainError;

/// Runs candidate programs and checks files
#[async_trait]
pub trait Probe: Send + Sync {
    /// Whether `program args...` starts and exits 0.
    async fn succeeds(&self, program: &Path, args: &[&str]) -> bool;

    fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }
}

/// Probe that actually runs the programs
pub struct SystemProbe;

#[async_trait]
impl Probe for SystemProbe {
    async fn succeeds(&self, program: &Path, args: &[&str]) -> bool {
        let status = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        match status {
            Ok(status) => status.success(),
            Err(e) => {
                tracing::trace!(program = %program.display(), error = %e, "Probe failed to start");
                false
            }
        }
    }
}

/// Probe answering from fixed lists, for tests and dry runs
#[derive(Debug, Default, Clone)]
pub struct StaticProbe {
    /// Programs that answer `--version`
    pub runnable: Vec<PathBuf>,
    /// Programs that can import pyserial
    pub with_pyserial: Vec<PathBuf>,
    /// Programs that can run `-m esptool`
    pub with_esptool_module: Vec<PathBuf>,
}

impl StaticProbe {
    /// A single interpreter that passes every check.
    pub fn complete(program: impl Into<PathBuf>) -> Self {
        let program = program.into();
        Self {
            runnable: vec![program.clone()],
            with_pyserial: vec![program.clone()],
            with_esptool_module: vec![program],
        }
    }
}

#[async_trait]
impl Probe for StaticProbe {
    async fn succeeds(&self, program: &Path, args: &[&str]) -> bool {
        let program = program.to_path_buf();
        match args.first().copied() {
            Some("--version") => self.runnable.contains(&program),
            Some("-c") => self.with_pyserial.contains(&program),
            Some("-m") => self.with_esptool_module.contains(&program),
            _ => false,
        }
    }
}

/// Host facts that decide the candidate list
#[derive(Debug, Clone, Default)]
pub struct ToolchainEnv {
    pub home: Option<PathBuf>,
    /// `$PYTHON`
    pub python: Option<PathBuf>,
    /// `$ESPTOOL_PATH`
    pub esptool_path: Option<PathBuf>,
    pub windows: bool,
}

impl ToolchainEnv {
    pub fn from_env() -> Self {
        let non_empty = |name: &str| {
            std::env::var_os(name)
                .filter(|value| !value.is_empty())
                .map(PathBuf::from)
        };
        Self {
            home: dirs::home_dir(),
            python: non_empty("PYTHON"),
            esptool_path: non_empty("ESPTOOL_PATH"),
            windows: cfg!(windows),
        }
    }

    fn platformio_python(&self) -> Option<PathBuf> {
        let penv = self.home.as_ref()?.join(".platformio").join("penv");
        Some(if self.windows {
            penv.join("Scripts").join("python.exe")
        } else {
            penv.join("bin").join("python")
        })
    }

    fn platformio_esptool(&self) -> Option<PathBuf> {
        Some(
            self.home
                .as_ref()?
                .join(".platformio")
                .join("packages")
                .join("tool-esptoolpy")
                .join("esptool.py"),
        )
    }
}

/// How esptool is invoked through the interpreter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlashUtility {
    /// `python <path/to/esptool.py> ...`
    Script(PathBuf),
    /// `python -m esptool ...`
    Module,
}

impl FlashUtility {
    /// Interpreter arguments that come before esptool's own.
    pub fn prefix_args(&self) -> Vec<OsString> {
        match self {
            FlashUtility::Script(path) => vec![path.clone().into_os_string()],
            FlashUtility::Module => vec!["-m".into(), "esptool".into()],
        }
    }
}

/// A resolved interpreter and flashing utility
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    pub python: PathBuf,
    pub utility: FlashUtility,
}

/// Interpreter candidates in rank order, without duplicates.
///
/// PlatformIO's interpreter is only listed when the file exists.
pub fn python_candidates(env: &ToolchainEnv, probe: &dyn Probe) -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(pio) = env.platformio_python().filter(|p| probe.is_file(p)) {
        candidates.push(pio);
    }
    if let Some(python) = &env.python {
        candidates.push(python.clone());
    }
    let defaults: [&str; 2] = if env.windows {
        ["python", "python3"]
    } else {
        ["python3", "python"]
    };
    candidates.extend(defaults.iter().map(PathBuf::from));

    let mut unique: Vec<PathBuf> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        if !unique.contains(&candidate) {
            unique.push(candidate);
        }
    }
    unique
}

/// First candidate that runs and has pyserial.
pub async fn resolve_python(
    env: &ToolchainEnv,
    probe: &dyn Probe,
) -> Result<PathBuf, ToolchainError> {
    let candidates = python_candidates(env, probe);
    for candidate in &candidates {
        if !probe.succeeds(candidate, &["--version"]).await {
            tracing::debug!(candidate = %candidate.display(), "Python candidate does not run");
            continue;
        }
        if !probe
            .succeeds(candidate, &["-c", "import serial; print(serial.__version__)"])
            .await
        {
            tracing::debug!(candidate = %candidate.display(), "Python candidate lacks pyserial");
            continue;
        }
        tracing::debug!(python = %candidate.display(), "Resolved Python");
        return Ok(candidate.clone());
    }

    Err(ToolchainError::ToolchainNotFound {
        tried: candidates
            .iter()
            .map(|c| c.display().to_string())
            .collect::<Vec<_>>()
            .join(", "),
    })
}

/// `$ESPTOOL_PATH`, then PlatformIO's script, then the `esptool` module.
pub async fn resolve_utility(
    env: &ToolchainEnv,
    python: &Path,
    probe: &dyn Probe,
) -> Result<FlashUtility, ToolchainError> {
    if let Some(path) = env.esptool_path.as_ref().filter(|p| probe.is_file(p)) {
        return Ok(FlashUtility::Script(path.clone()));
    }
    if let Some(path) = env.platformio_esptool().filter(|p| probe.is_file(p)) {
        return Ok(FlashUtility::Script(path));
    }
    if probe.succeeds(python, &["-m", "esptool", "--version"]).await {
        return Ok(FlashUtility::Module);
    }
    Err(ToolchainError::UtilityNotFound)
}

pub async fn resolve(env: &ToolchainEnv, probe: &dyn Probe) -> Result<Toolchain, ToolchainError> {
    let python = resolve_python(env, probe).await?;
    let utility = resolve_utility(env, &python, probe).await?;
    Ok(Toolchain { python, utility })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn env() -> ToolchainEnv {
        ToolchainEnv {
            home: None,
            python: None,
            esptool_path: None,
            windows: false,
        }
    }

    #[test]
    fn test_candidate_order_unix() {
        let env = ToolchainEnv {
            python: Some(PathBuf::from("/opt/py/bin/python3.11")),
            ..env()
        };
        assert_eq!(
            python_candidates(&env, &StaticProbe::default()),
            vec![
                PathBuf::from("/opt/py/bin/python3.11"),
                PathBuf::from("python3"),
                PathBuf::from("python"),
            ]
        );
    }

    #[test]
    fn test_candidate_order_windows_dedupes() {
        let env = ToolchainEnv {
            python: Some(PathBuf::from("python")),
            windows: true,
            ..env()
        };
        assert_eq!(
            python_candidates(&env, &StaticProbe::default()),
            vec![PathBuf::from("python"), PathBuf::from("python3")]
        );
    }

    #[test]
    fn test_platformio_python_ranks_first_when_present() {
        let home = tempfile::tempdir().unwrap();
        let penv = home.path().join(".platformio/penv/bin");
        std::fs::create_dir_all(&penv).unwrap();
        std::fs::write(penv.join("python"), b"").unwrap();

        let env = ToolchainEnv {
            home: Some(home.path().to_path_buf()),
            ..env()
        };
        let candidates = python_candidates(&env, &StaticProbe::default());
        assert_eq!(candidates[0], penv.join("python"));
    }

    #[tokio::test]
    async fn test_skips_python_without_pyserial() {
        let probe = StaticProbe {
            runnable: vec![PathBuf::from("python3"), PathBuf::from("python")],
            with_pyserial: vec![PathBuf::from("python")],
            with_esptool_module: vec![],
        };
        let python = resolve_python(&env(), &probe).await.unwrap();
        assert_eq!(python, PathBuf::from("python"));
    }

    #[tokio::test]
    async fn test_no_python_is_toolchain_not_found() {
        let err = resolve_python(&env(), &StaticProbe::default())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ToolchainError::ToolchainNotFound {
                tried: "python3, python".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_esptool_path_wins() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("esptool.py");
        std::fs::write(&script, b"").unwrap();
        let env = ToolchainEnv {
            esptool_path: Some(script.clone()),
            ..env()
        };

        let utility = resolve_utility(&env, Path::new("python3"), &StaticProbe::complete("python3"))
            .await
            .unwrap();
        assert_eq!(utility, FlashUtility::Script(script));
    }

    #[tokio::test]
    async fn test_missing_esptool_path_falls_back_to_module() {
        let env = ToolchainEnv {
            esptool_path: Some(PathBuf::from("/nonexistent/esptool.py")),
            ..env()
        };
        let utility = resolve_utility(&env, Path::new("python3"), &StaticProbe::complete("python3"))
            .await
            .unwrap();
        assert_eq!(utility, FlashUtility::Module);
        assert_eq!(utility.prefix_args(), vec![OsString::from("-m"), "esptool".into()]);
    }

    #[tokio::test]
    async fn test_no_utility() {
        let probe = StaticProbe {
            runnable: vec![PathBuf::from("python3")],
            with_pyserial: vec![PathBuf::from("python3")],
            with_esptool_module: vec![],
        };
        let err = resolve(&env(), &probe).await.unwrap_err();
        assert_eq!(err, ToolchainError::UtilityNotFound);
    }
}
