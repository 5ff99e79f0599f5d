use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use tracing::warn;

use crate::{
    config::{Environment, ServerConfig},
    error::ServerError,
};

/// Everything the supervisor needs to launch one process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchConfig {
    pub command: String,
    pub working_dir: PathBuf,
    pub environment: Environment,
    /// Detach from the supervisor so the process outlives it.
    pub persist: bool,
}

impl LaunchConfig {
    pub fn from_server(config: &ServerConfig, root: &Path) -> Self {
        Self {
            command: config.command.clone(),
            working_dir: config.working_dir(root),
            environment: config.env.clone(),
            persist: config.persist,
        }
    }
}

/// Splits a shell-style command line into program and arguments.
pub fn parse_command_line(command_line: &str) -> Result<(String, Vec<String>), ServerError> {
    let mut tokens = shell_words::split(command_line)
        .map_err(|err| ServerError::InvalidCommand(err.to_string()))?
        .into_iter();

    let program = tokens.next().ok_or(ServerError::EmptyCommand)?;
    Ok((program, tokens.collect()))
}

/// Resolves the configured environment into explicit variables.
///
/// An env file is read relative to `working_dir`. A missing file yields no
/// variables; a malformed one is an error.
pub fn resolve_environment(
    environment: &Environment,
    working_dir: &Path,
) -> Result<HashMap<String, String>, ServerError> {
    let path = match environment {
        Environment::Inline(vars) => {
            return Ok(vars
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect());
        }
        Environment::FileRef(path) => working_dir.join(path),
    };

    if !path.is_file() {
        warn!(path = %path.display(), "env file not found, starting without it");
        return Ok(HashMap::new());
    }

    let env_file_err = |source| ServerError::EnvFile {
        path: path.clone(),
        source,
    };

    let mut vars = HashMap::new();
    for item in dotenvy::from_path_iter(&path).map_err(env_file_err)? {
        let (key, value) = item.map_err(env_file_err)?;
        vars.insert(key, value);
    }
    Ok(vars)
}
