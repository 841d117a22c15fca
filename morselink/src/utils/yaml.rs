use crate::errors::ConfigError;
use serde::{de::DeserializeOwned, Serialize};
use std::{ffi::OsStr, fs::OpenOptions, path::Path};

/// Read a yaml file into a configuration struct. Every config struct in
/// the system goes through here so the file format stays consistent.
///
/// Keys are read back lowercased and as strings, so maps in config structs
/// must be keyed by lowercase strings to survive a write and read.
///
/// * `filepath`: path to the yaml file.
pub fn read_config<T, F>(filepath: F) -> Result<T, ConfigError>
where
    T: DeserializeOwned,
    F: AsRef<OsStr>,
{
    let file = Path::new(&filepath);
    if !file.is_file() {
        return Err(ConfigError::NotFound(file.to_path_buf()));
    }
    let config_file = config::Config::builder()
        .add_source(config::File::new(
            &file.to_string_lossy(),
            config::FileFormat::Yaml,
        ))
        .build()?;
    Ok(config_file.try_deserialize::<T>()?)
}

/// Write a configuration struct out to a yaml file, truncating what was there.
///
/// * `config`: struct to serialise.
/// * `filepath`: destination path.
pub fn write_config<T, F>(config: &T, filepath: F) -> Result<(), ConfigError>
where
    T: Serialize,
    F: AsRef<OsStr>,
{
    let path = Path::new(&filepath);
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })?;
    serde_yaml::to_writer(file, config)?;
    Ok(())
}
