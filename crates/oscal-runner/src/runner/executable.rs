use oscal_runner_core::{RunnerConfig, RunnerError};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Two-stage lookup for installed tools: PATH first, then the local install dir
#[derive(Debug, Clone)]
pub struct ExecutableResolver {
    markers: Vec<String>,
    install_dir: PathBuf,
}

impl ExecutableResolver {
    pub fn new(markers: Vec<String>, install_dir: impl Into<PathBuf>) -> Self {
        Self {
            markers,
            install_dir: install_dir.into(),
        }
    }

    pub fn from_config(config: &RunnerConfig) -> Self {
        Self::new(
            config.package_manager_markers.clone(),
            config.local_install_dir(),
        )
    }

    pub fn install_dir(&self) -> &Path {
        &self.install_dir
    }

    /// Locate `binary`. An `explicit` location bypasses the search but must exist.
    pub fn resolve(&self, binary: &str, explicit: Option<&Path>) -> Result<PathBuf, RunnerError> {
        if let Some(path) = explicit {
            if path.is_file() {
                return Ok(path.to_path_buf());
            }
            return Err(RunnerError::InstallMissing {
                binary: binary.to_string(),
                searched: path.to_path_buf(),
            });
        }

        let on_path: Vec<PathBuf> = which::which_all(binary)
            .map(|found| found.collect())
            .unwrap_or_default();
        debug!(binary = %binary, candidates = ?on_path, "PATH candidates");

        if let Some(chosen) = select_candidate(&on_path, &self.markers) {
            info!(binary = %binary, path = %chosen.display(), "Resolved from PATH");
            return Ok(chosen);
        }

        for file_name in install_file_names(binary) {
            let local = self.install_dir.join(file_name);
            if local.is_file() {
                info!(binary = %binary, path = %local.display(), "Resolved from local install");
                return Ok(local);
            }
        }

        Err(RunnerError::InstallMissing {
            binary: binary.to_string(),
            searched: self.install_dir.clone(),
        })
    }
}

/// Prefer the first PATH match installed by a package manager, else the first match
pub fn select_candidate(candidates: &[PathBuf], markers: &[String]) -> Option<PathBuf> {
    candidates
        .iter()
        .find(|path| {
            let text = path.to_string_lossy();
            markers.iter().any(|marker| text.contains(marker.as_str()))
        })
        .or_else(|| candidates.first())
        .cloned()
}

fn install_file_names(binary: &str) -> Vec<String> {
    if cfg!(windows) {
        vec![
            format!("{binary}.exe"),
            format!("{binary}.cmd"),
            format!("{binary}.bat"),
            binary.to_string(),
        ]
    } else {
        vec![binary.to_string()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn markers() -> Vec<String> {
        ["node_modules", ".npm", "homebrew", "Cellar", ".cargo"]
            .iter()
            .map(|m| m.to_string())
            .collect()
    }

    #[test]
    fn test_package_manager_install_wins() {
        let candidates = vec![
            PathBuf::from("/usr/local/bin/oscal-cli"),
            PathBuf::from("/home/ci/.npm/bin/oscal-cli"),
            PathBuf::from("/opt/homebrew/bin/oscal-cli"),
        ];
        assert_eq!(
            select_candidate(&candidates, &markers()),
            Some(PathBuf::from("/home/ci/.npm/bin/oscal-cli"))
        );
    }

    #[test]
    fn test_first_match_without_marker() {
        let candidates = vec![
            PathBuf::from("/usr/local/bin/oscal-cli"),
            PathBuf::from("/usr/bin/oscal-cli"),
        ];
        assert_eq!(
            select_candidate(&candidates, &markers()),
            Some(PathBuf::from("/usr/local/bin/oscal-cli"))
        );
        assert_eq!(select_candidate(&[], &markers()), None);
    }

    #[test]
    fn test_falls_back_to_install_dir() {
        let dir = tempfile::tempdir().unwrap();
        let binary = format!("oscal-resolver-test-{}", std::process::id());
        let installed = dir.path().join(&install_file_names(&binary)[0]);
        std::fs::write(&installed, "").unwrap();

        let resolver = ExecutableResolver::new(markers(), dir.path());
        assert_eq!(resolver.resolve(&binary, None).unwrap(), installed);
    }

    #[test]
    fn test_missing_everywhere() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = ExecutableResolver::new(markers(), dir.path());
        let err = resolver
            .resolve("oscal-definitely-not-installed", None)
            .unwrap_err();
        match err {
            RunnerError::InstallMissing { binary, searched } => {
                assert_eq!(binary, "oscal-definitely-not-installed");
                assert_eq!(searched, dir.path());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_explicit_path_must_exist() {
        let resolver = ExecutableResolver::new(markers(), "/nonexistent");
        let err = resolver
            .resolve("oscal-cli", Some(Path::new("/nonexistent/oscal-cli")))
            .unwrap_err();
        assert!(matches!(err, RunnerError::InstallMissing { .. }));
    }
}
