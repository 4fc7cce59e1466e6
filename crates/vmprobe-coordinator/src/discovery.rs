//! One-time enumeration of targets under the VM root

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::ProbeConfig;
use crate::error::DiscoveryError;

/// One VM-under-test, immutable for the duration of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Target {
    /// Unique name (the directory name)
    pub name: String,
    /// Working directory for the provisioning tool and the probe
    pub dir: PathBuf,
    /// Probe location inside `dir`
    pub probe: PathBuf,
}

/// Scan `root` for subdirectories that contain the probe file.
///
/// Targets are returned sorted by name.
pub fn discover_targets(root: &Path, probe: &ProbeConfig) -> Result<Vec<Target>, DiscoveryError> {
    if !root.exists() {
        return Err(DiscoveryError::RootMissing(root.to_path_buf()));
    }
    if !root.is_dir() {
        return Err(DiscoveryError::NotADirectory(root.to_path_buf()));
    }

    let entries = fs::read_dir(root).map_err(|e| DiscoveryError::io(root, e))?;
    let mut targets = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| DiscoveryError::io(root, e))?;
        let dir = entry.path();
        if !dir.is_dir() {
            continue;
        }
        let probe_path = probe.path_in(&dir);
        if !probe_path.is_file() {
            debug!(dir = %dir.display(), "Skipping directory without probe");
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            warn!(dir = %dir.display(), "Skipping target with non UTF-8 name");
            continue;
        };
        targets.push(Target {
            name,
            dir,
            probe: probe_path,
        });
    }

    targets.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(targets)
}

/// Restrict `targets` to the names in `only` (all targets when `only` is empty).
///
/// Keeps discovery order; an unknown name is an error listing what exists.
pub fn select_targets(
    targets: Vec<Target>,
    only: &[String],
) -> Result<Vec<Target>, DiscoveryError> {
    if only.is_empty() {
        return Ok(targets);
    }
    if let Some(unknown) = only.iter().find(|name| !targets.iter().any(|t| &t.name == *name)) {
        return Err(DiscoveryError::UnknownTarget {
            name: unknown.clone(),
            available: target_names(&targets).join(", "),
        });
    }
    Ok(targets
        .into_iter()
        .filter(|t| only.contains(&t.name))
        .collect())
}

/// Names of `targets`, in order
pub fn target_names(targets: &[Target]) -> Vec<String> {
    targets.iter().map(|t| t.name.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_root(dirs: &[(&str, bool)]) -> TempDir {
        let root = TempDir::new().unwrap();
        for (name, with_probe) in dirs {
            let dir = root.path().join(name);
            fs::create_dir_all(&dir).unwrap();
            if *with_probe {
                fs::write(dir.join("test.py"), "print('ok')").unwrap();
            }
        }
        root
    }

    #[test]
    fn test_discovers_only_dirs_with_probe_sorted() {
        let root = make_root(&[("rocky9-pxe", true), ("rocky9-cli", true), ("empty", false)]);
        fs::write(root.path().join("stray.txt"), "").unwrap();

        let targets = discover_targets(root.path(), &ProbeConfig::default()).unwrap();

        assert_eq!(target_names(&targets), vec!["rocky9-cli", "rocky9-pxe"]);
        assert_eq!(targets[0].dir, root.path().join("rocky9-cli"));
        assert_eq!(targets[0].probe, root.path().join("rocky9-cli/test.py"));
    }

    #[test]
    fn test_probe_directory_is_not_a_probe() {
        let root = make_root(&[("odd", false)]);
        fs::create_dir_all(root.path().join("odd/test.py")).unwrap();
        let targets = discover_targets(root.path(), &ProbeConfig::default()).unwrap();
        assert!(targets.is_empty());
    }

    #[test]
    fn test_missing_root_fails_fast() {
        let root = TempDir::new().unwrap();
        let missing = root.path().join("VM");
        let err = discover_targets(&missing, &ProbeConfig::default()).unwrap_err();
        assert!(matches!(err, DiscoveryError::RootMissing(_)));
    }

    #[test]
    fn test_root_must_be_directory() {
        let root = TempDir::new().unwrap();
        let file = root.path().join("VM");
        fs::write(&file, "").unwrap();
        let err = discover_targets(&file, &ProbeConfig::default()).unwrap_err();
        assert!(matches!(err, DiscoveryError::NotADirectory(_)));
    }

    #[test]
    fn test_select_targets() {
        let root = make_root(&[("alpha", true), ("beta", true), ("gamma", true)]);
        let targets = discover_targets(root.path(), &ProbeConfig::default()).unwrap();

        let all = select_targets(targets.clone(), &[]).unwrap();
        assert_eq!(all.len(), 3);

        let only = ["gamma".to_string(), "alpha".to_string()];
        let some = select_targets(targets.clone(), &only).unwrap();
        assert_eq!(target_names(&some), vec!["alpha", "gamma"]);

        let err = select_targets(targets, &["delta".to_string()]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Unknown variation: delta (available: alpha, beta, gamma)"
        );
    }
}
