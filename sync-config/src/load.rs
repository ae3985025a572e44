use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use config::builder::{ConfigBuilder, DefaultState};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::environment::Environment;

/// Directory containing configuration files, relative to the working directory.
const CONFIGURATION_DIR: &str = "configuration";

/// Extensions tried, in order, for every configuration file.
const CONFIG_FILE_EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

/// Prefix of environment variables overriding configuration keys.
const ENV_PREFIX: &str = "APP";

const ENV_PREFIX_SEPARATOR: &str = "_";

/// Separator of nested keys in environment variables, as in `APP_TABLE__PROJECT_ID`.
const ENV_SEPARATOR: &str = "__";

/// Which configuration file is being loaded.
#[derive(Debug, Clone, Copy)]
enum ConfigFile {
    Base,
    Environment(Environment),
}

impl ConfigFile {
    fn stem(&self) -> &'static str {
        match self {
            ConfigFile::Base => "base",
            ConfigFile::Environment(environment) => environment.as_str(),
        }
    }
}

impl fmt::Display for ConfigFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigFile::Base => f.write_str("base configuration"),
            ConfigFile::Environment(environment) => {
                write!(f, "{environment} environment configuration")
            }
        }
    }
}

/// Errors raised while loading configuration files and overrides.
#[derive(Debug, Error)]
pub enum LoadConfigError {
    #[error("failed to determine the current directory: {0}")]
    CurrentDir(#[source] io::Error),

    #[error("configuration directory `{0}` does not exist")]
    MissingConfigurationDirectory(PathBuf),

    #[error("could not locate {description} in `{directory}`; attempted: {attempted}")]
    ConfigurationFileMissing {
        description: String,
        directory: PathBuf,
        attempted: String,
    },

    #[error("failed to load {description} from `{path}`: {source}")]
    ConfigurationFileLoad {
        description: String,
        path: PathBuf,
        source: config::ConfigError,
    },

    #[error("failed to determine runtime environment: {0}")]
    Environment(#[from] io::Error),

    #[error("failed to build configuration: {0}")]
    Builder(#[source] config::ConfigError),

    #[error("failed to deserialize configuration: {0}")]
    Deserialization(#[source] config::ConfigError),
}

/// Loads `T` from the `configuration` directory of the working directory.
///
/// Reads `configuration/base.(yaml|yml|json)`, then `configuration/{environment}.(yaml|yml|json)`
/// for the environment selected by `APP_ENVIRONMENT`, then applies `APP_`-prefixed environment
/// variables. Nested keys use double underscores (`APP_TABLE__TABLE_ID`).
pub fn load_config<T>() -> Result<T, LoadConfigError>
where
    T: DeserializeOwned,
{
    let base_path = std::env::current_dir().map_err(LoadConfigError::CurrentDir)?;
    let environment = Environment::load()?;

    load_config_from(&base_path.join(CONFIGURATION_DIR), environment)
}

/// Loads `T` from `directory` for the given `environment`.
///
/// Same layering as [`load_config`], with the directory and environment given explicitly.
pub fn load_config_from<T>(directory: &Path, environment: Environment) -> Result<T, LoadConfigError>
where
    T: DeserializeOwned,
{
    if !directory.is_dir() {
        return Err(LoadConfigError::MissingConfigurationDirectory(
            directory.to_path_buf(),
        ));
    }

    let base_file = find_configuration_file(directory, ConfigFile::Base)?;
    let environment_file =
        find_configuration_file(directory, ConfigFile::Environment(environment))?;

    let environment_source = config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator(ENV_PREFIX_SEPARATOR)
        .separator(ENV_SEPARATOR);

    let builder =
        config::Config::builder().add_source(config::File::from(base_file.clone()));
    check_source(&builder, ConfigFile::Base, &base_file)?;

    let builder = builder.add_source(config::File::from(environment_file.clone()));
    check_source(
        &builder,
        ConfigFile::Environment(environment),
        &environment_file,
    )?;

    let settings = builder
        .add_source(environment_source)
        .build()
        .map_err(LoadConfigError::Builder)?;

    settings
        .try_deserialize::<T>()
        .map_err(LoadConfigError::Deserialization)
}

/// Returns the first existing file of `kind` among the supported extensions.
fn find_configuration_file(directory: &Path, kind: ConfigFile) -> Result<PathBuf, LoadConfigError> {
    let candidates: Vec<PathBuf> = CONFIG_FILE_EXTENSIONS
        .iter()
        .map(|extension| directory.join(format!("{}.{extension}", kind.stem())))
        .collect();

    if let Some(path) = candidates.iter().find(|path| path.is_file()) {
        return Ok(path.clone());
    }

    let attempted = candidates
        .iter()
        .map(|path| format!("`{}`", path.display()))
        .collect::<Vec<_>>()
        .join(", ");

    Err(LoadConfigError::ConfigurationFileMissing {
        description: kind.to_string(),
        directory: directory.to_path_buf(),
        attempted,
    })
}

/// Builds the sources added so far to attribute parse errors to the file that caused them.
fn check_source(
    builder: &ConfigBuilder<DefaultState>,
    kind: ConfigFile,
    path: &Path,
) -> Result<(), LoadConfigError> {
    builder
        .clone()
        .build()
        .map(|_| ())
        .map_err(|source| LoadConfigError::ConfigurationFileLoad {
            description: kind.to_string(),
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use std::fs;

    use super::*;

    #[derive(Debug, Deserialize)]
    struct ScratchConfig {
        name: String,
        batch: Option<u32>,
        nested: Option<NestedConfig>,
    }

    #[derive(Debug, Deserialize)]
    struct NestedConfig {
        label: String,
    }

    fn scratch_dir(test: &str) -> PathBuf {
        let directory =
            std::env::temp_dir().join(format!("sync-config-{test}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&directory);
        fs::create_dir_all(&directory).unwrap();
        directory
    }

    #[test]
    fn environment_file_overrides_base() {
        let directory = scratch_dir("override");
        fs::write(directory.join("base.yaml"), "name: base\nbatch: 10\n").unwrap();
        fs::write(directory.join("prod.json"), r#"{"name": "prod"}"#).unwrap();

        let config: ScratchConfig = load_config_from(&directory, Environment::Prod).unwrap();
        assert_eq!(config.name, "prod");
        assert_eq!(config.batch, Some(10));

        fs::remove_dir_all(&directory).unwrap();
    }

    #[test]
    fn prefixed_environment_variables_override_nested_keys() {
        let directory = scratch_dir("env");
        fs::write(directory.join("base.yaml"), "name: base\nnested:\n  label: file\n").unwrap();
        fs::write(directory.join("dev.yaml"), "batch: 3\n").unwrap();

        // SAFETY: only this test sets the variable, other loads merely see an extra key.
        unsafe { std::env::set_var("APP_NESTED__LABEL", "from-env") };
        let config: ScratchConfig = load_config_from(&directory, Environment::Dev).unwrap();
        unsafe { std::env::remove_var("APP_NESTED__LABEL") };

        assert_eq!(config.name, "base");
        assert_eq!(config.batch, Some(3));
        assert_eq!(config.nested.unwrap().label, "from-env");

        fs::remove_dir_all(&directory).unwrap();
    }

    #[test]
    fn missing_environment_file_lists_attempted_paths() {
        let directory = scratch_dir("missing");
        fs::write(directory.join("base.yml"), "name: base\n").unwrap();

        let err = load_config_from::<ScratchConfig>(&directory, Environment::Dev).unwrap_err();
        match err {
            LoadConfigError::ConfigurationFileMissing { attempted, .. } => {
                assert!(attempted.contains("dev.yaml"));
                assert!(attempted.contains("dev.json"));
            }
            other => panic!("unexpected error: {other}"),
        }

        fs::remove_dir_all(&directory).unwrap();
    }

    #[test]
    fn missing_directory_is_reported() {
        let directory = std::env::temp_dir().join("sync-config-does-not-exist");
        let err = load_config_from::<ScratchConfig>(&directory, Environment::Dev).unwrap_err();
        assert!(matches!(err, LoadConfigError::MissingConfigurationDirectory(_)));
    }
}
