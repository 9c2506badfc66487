use thiserror::Error;

/// Fatal startup misconfigurations. Everything else in the pipeline is
/// logged and survived; these abort the process.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid namespace config: {0}")]
    Invalid(String),

    #[error("missing group program: {0}")]
    MissingGroupProgram(String),
}
