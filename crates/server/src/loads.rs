//! Loading the monitors directory.
//!
//! ```text
//! monitors_dir/
//!   groups/groups.jq          ← the group program (missing = fatal)
//!   configs/<any>.yaml        ← one file per namespace
//!   <namespace>/filter.jq     ← leaf filter program
//!   <namespace>/monitor.jq    ← monitor program
//!   <namespace>/lambda.jq     ← state-transition program
//! ```
//!
//! A namespace whose config or programs fail to load is skipped with an
//! error log; only the group program is load-bearing for the process.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use streamwatch_core::{ConfigError, NamespaceConfig};
use streamwatch_flow::{FilterTree, Namespace};
use streamwatch_program::{load_program, ProgramKind};
use streamwatch_store::SharedLog;
use tracing::error;
use walkdir::WalkDir;

pub struct Loaded {
    pub namespaces: HashMap<String, Arc<Namespace>>,
    pub filters: FilterTree,
}

pub fn load(monitors_dir: &Path, shared_log: &SharedLog) -> Result<Loaded, ConfigError> {
    let group_path = monitors_dir.join("groups").join("groups.jq");
    let group_program = load_program(&group_path, ProgramKind::GroupFilter)
        .map_err(|e| ConfigError::MissingGroupProgram(e.to_string()))?;
    let mut filters = FilterTree::new(group_program);

    let mut namespaces = HashMap::new();
    for config in load_configs(monitors_dir)? {
        let namespace_dir = monitors_dir.join(&config.namespace);

        let lambda = match load_program(&namespace_dir.join("lambda.jq"), ProgramKind::Lambda) {
            Ok(program) => program,
            Err(e) => {
                error!(namespace = %config.namespace, "skipping namespace: {e}");
                continue;
            }
        };
        let monitor = match load_program(&namespace_dir.join("monitor.jq"), ProgramKind::Monitor)
        {
            Ok(program) => program,
            Err(e) => {
                error!(namespace = %config.namespace, "skipping namespace: {e}");
                continue;
            }
        };
        let filter = match load_program(
            &namespace_dir.join("filter.jq"),
            ProgramKind::NamespaceFilter,
        ) {
            Ok(program) => program,
            Err(e) => {
                error!(namespace = %config.namespace, "skipping namespace: {e}");
                continue;
            }
        };

        let group = config.group.clone();
        let name = config.namespace.clone();
        match Namespace::new(config, lambda, monitor, shared_log) {
            Ok(namespace) => {
                filters.add_leaf(&group, filter);
                namespaces.insert(name, Arc::new(namespace));
            }
            Err(e) => error!(namespace = %name, "unable to create namespace: {e}"),
        }
    }

    Ok(Loaded {
        namespaces,
        filters,
    })
}

/// Parse every YAML file directly under `monitors_dir/configs/`. A file
/// that fails to parse or validate is skipped; an unreadable directory is
/// fatal.
fn load_configs(monitors_dir: &Path) -> Result<Vec<NamespaceConfig>, ConfigError> {
    let configs_dir = monitors_dir.join("configs");
    let mut configs = Vec::new();
    for entry in WalkDir::new(&configs_dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| {
            ConfigError::Invalid(format!("configs dir {}: {e}", configs_dir.display()))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let buf = std::fs::read_to_string(entry.path())?;
        match NamespaceConfig::from_yaml(&buf) {
            Ok(config) => configs.push(config),
            Err(e) => error!(
                "unable to load namespace config {}: {e}",
                entry.path().display()
            ),
        }
    }
    Ok(configs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(path: &Path, contents: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn write_namespace(dir: &Path, group: &str, namespace: &str) {
        write(
            &dir.join("configs").join(format!(
                "{}.yaml",
                namespace.replace('/', "_")
            )),
            &format!(
                "group: {group}\nnamespace: {namespace}\ngranularity: 10\n\
                 cardinality: 3\nsnapshot: 6\ncurrent: false\nstore_type: memory_store\n"
            ),
        );
        let namespace_dir = dir.join(namespace);
        write(&namespace_dir.join("lambda.jq"), "($state // 0) + $metric\n");
        write(&namespace_dir.join("monitor.jq"), ".\n");
        write(
            &namespace_dir.join("filter.jq"),
            &format!(
                "select(.value != null) | log(\"{namespace}\"; .host; .time; .value)\n"
            ),
        );
    }

    fn monitors_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        write(
            &dir.path().join("groups").join("groups.jq"),
            ".group // filter_error(\"unrouted\")\n",
        );
        dir
    }

    #[test]
    fn loads_namespaces_and_filters() {
        let dir = monitors_dir();
        write_namespace(dir.path(), "edge", "edge/errors");
        write_namespace(dir.path(), "edge", "edge/latency");

        let shared = SharedLog::new(dir.path().join("persistent_data"));
        let loaded = load(dir.path(), &shared).unwrap();
        assert_eq!(loaded.namespaces.len(), 2);
        assert!(loaded.namespaces.contains_key("edge/errors"));
        assert!(loaded.filters.has_group("edge"));
    }

    #[test]
    fn missing_group_program_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write_namespace(dir.path(), "edge", "edge/errors");
        let shared = SharedLog::new(dir.path().join("persistent_data"));
        assert!(matches!(
            load(dir.path(), &shared),
            Err(ConfigError::MissingGroupProgram(_))
        ));
    }

    #[test]
    fn broken_namespace_program_skips_only_that_namespace() {
        let dir = monitors_dir();
        write_namespace(dir.path(), "edge", "edge/good");
        write_namespace(dir.path(), "edge", "edge/bad");
        write(&dir.path().join("edge/bad").join("lambda.jq"), ".x |\n");

        let shared = SharedLog::new(dir.path().join("persistent_data"));
        let loaded = load(dir.path(), &shared).unwrap();
        assert_eq!(loaded.namespaces.len(), 1);
        assert!(loaded.namespaces.contains_key("edge/good"));
    }

    #[test]
    fn invalid_yaml_skips_only_that_config() {
        let dir = monitors_dir();
        write_namespace(dir.path(), "edge", "edge/good");
        write(&dir.path().join("configs").join("broken.yaml"), ": not yaml");

        let shared = SharedLog::new(dir.path().join("persistent_data"));
        let loaded = load(dir.path(), &shared).unwrap();
        assert_eq!(loaded.namespaces.len(), 1);
    }

    #[test]
    fn missing_configs_dir_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write(
            &dir.path().join("groups").join("groups.jq"),
            ".group\n",
        );
        let shared = SharedLog::new(dir.path().join("persistent_data"));
        assert!(load(dir.path(), &shared).is_err());
    }
}
