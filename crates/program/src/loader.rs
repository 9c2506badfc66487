//! Loading `.jq` program files from disk.

use std::path::Path;

use thiserror::Error;

use crate::program::{Program, ProgramError, ProgramKind};

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("{path}: {source}")]
    Program {
        path: String,
        source: ProgramError,
    },
}

/// Read and compile one program file.
pub fn load_program(path: &Path, kind: ProgramKind) -> Result<Program, LoadError> {
    let source = std::fs::read_to_string(path).map_err(|e| LoadError::Read {
        path: path.display().to_string(),
        source: e,
    })?;
    Program::compile(&source, kind).map_err(|e| LoadError::Program {
        path: path.display().to_string(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_program_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("filter.jq");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, ".group").unwrap();

        let program = load_program(&path, ProgramKind::GroupFilter).unwrap();
        let out = program.first(serde_json::json!({"group": "edge"}), Vec::new());
        assert_eq!(
            out,
            Some(crate::program::Output::Value(serde_json::json!("edge")))
        );
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = load_program(Path::new("/nonexistent/x.jq"), ProgramKind::Monitor)
            .unwrap_err();
        assert!(matches!(err, LoadError::Read { .. }));
    }

    #[test]
    fn bad_program_is_a_program_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.jq");
        std::fs::write(&path, ".foo |").unwrap();
        let err = load_program(&path, ProgramKind::Monitor).unwrap_err();
        assert!(matches!(err, LoadError::Program { .. }));
    }
}
