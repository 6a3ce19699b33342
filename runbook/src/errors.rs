use std::{io, path::PathBuf};

use thiserror::Error;

/// The kinds of errors that can occur during operations.
#[derive(Debug, Error)]
pub enum AppError {
  // I/O errors
  #[error("Could not create the dir `{path}`: {source}")]
  DirCreation { path: PathBuf, source: io::Error },

  #[error("Failed to create or write to the file `{path}`: {source}")]
  WriteError { path: PathBuf, source: io::Error },

  #[error("Could not read the contents of `{path}`: {source}")]
  ReadError { path: PathBuf, source: io::Error },

  #[error("Failed to canonicalize the path `{path}`: {source}")]
  PathCanonicalization { path: PathBuf, source: io::Error },

  // Configuration errors
  #[error("Error while deserializing the contents of `{file}`: {error}")]
  DeserializationError { file: PathBuf, error: String },

  #[error("Invalid configuration in `{file}`: {error}")]
  InvalidConfig { file: PathBuf, error: String },

  #[error("The path `{path}` does not exist (resolved against `{base}`)")]
  InvalidPath { path: PathBuf, base: PathBuf },

  #[error("{0}")]
  CircularDependency(String),

  #[error("No environment named `{name}` is defined")]
  UnknownEnvironment { name: String },

  // Script lookup errors
  #[error("The scripts path `{path}` is not a readable directory")]
  ScriptPathNotValid { path: PathBuf },

  #[error("No script named `{name}` was found{}", suggestions_help(.suggestions))]
  ScriptNotFound {
    name: String,
    suggestions: Vec<String>,
  },

  // Parse errors
  #[error("Parse error in `{script}` at `{line}`: {error}")]
  ScriptParse {
    script: String,
    line: String,
    error: String,
  },

  // Value resolution errors
  #[error("Failed to resolve the dynamic value `{expression}`: {error}")]
  ValueResolution { expression: String, error: String },

  #[error("Could not read the dotenv file `{path}`: {error}")]
  DotenvParse { path: PathBuf, error: String },

  // Execution errors
  #[error("The command `{line}` exited with status {status}")]
  ExecutionError { line: String, status: String },

  #[error("Failed to run the command `{line}`: {source}")]
  ProcessSpawn { line: String, source: io::Error },

  #[error(transparent)]
  Other(#[from] anyhow::Error),
}

fn suggestions_help(suggestions: &[String]) -> String {
  if suggestions.is_empty() {
    String::new()
  } else {
    format!(". Did you mean one of: {}?", suggestions.join(", "))
  }
}
