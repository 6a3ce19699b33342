use std::{
  env::current_dir,
  fs::{File, create_dir_all, read_to_string},
  io::Write,
  path::{Path, PathBuf},
};

use serde::de::DeserializeOwned;

use crate::AppError;

pub fn deserialize_yaml<T: DeserializeOwned>(path: &Path) -> Result<T, AppError> {
  let file = read_file(path)?;

  serde_yaml_ng::from_reader(file).map_err(|e| AppError::DeserializationError {
    file: path.to_path_buf(),
    error: e.to_string(),
  })
}

pub fn read_file(path: &Path) -> Result<File, AppError> {
  File::open(path).map_err(|e| AppError::ReadError {
    path: path.to_path_buf(),
    source: e,
  })
}

pub fn read_file_to_string(path: &Path) -> Result<String, AppError> {
  read_to_string(path).map_err(|e| AppError::ReadError {
    path: path.to_path_buf(),
    source: e,
  })
}

pub fn write_file(path: &Path, content: &str) -> Result<(), AppError> {
  create_parent_dirs(path)?;

  let mut file = File::create(path).map_err(|e| AppError::WriteError {
    path: path.to_path_buf(),
    source: e,
  })?;

  file
    .write_all(content.as_bytes())
    .map_err(|e| AppError::WriteError {
      path: path.to_path_buf(),
      source: e,
    })
}

pub(crate) fn create_parent_dirs(path: &Path) -> Result<(), AppError> {
  let dirname = get_parent_dir(path);

  create_dir_all(dirname).map_err(|e| AppError::DirCreation {
    path: dirname.to_path_buf(),
    source: e,
  })
}

pub(crate) fn get_abs_path(path: &Path) -> Result<PathBuf, AppError> {
  path
    .canonicalize()
    .map_err(|e| AppError::PathCanonicalization {
      path: path.into(),
      source: e,
    })
}

pub(crate) fn get_parent_dir(path: &Path) -> &Path {
  path
    .parent()
    .unwrap_or_else(|| panic!("Could not get the parent directory of '{}'", path.display()))
}

pub(crate) fn get_cwd() -> PathBuf {
  current_dir().expect("Could not get the cwd")
}

/// Resolves `raw` against the directory of `base_file`. Absolute paths are
/// accepted as-is. When `required` is set, the resolved path must exist.
pub fn fix_path(raw: &Path, base_file: &Path, required: bool) -> Result<PathBuf, AppError> {
  let resolved = if raw.is_absolute() {
    raw.to_path_buf()
  } else {
    get_parent_dir(base_file).join(raw)
  };

  if required && !resolved.exists() {
    return Err(AppError::InvalidPath {
      path: raw.to_path_buf(),
      base: base_file.to_path_buf(),
    });
  }

  Ok(resolved)
}
