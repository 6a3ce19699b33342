mod loader;
mod merging;

use std::path::{Path, PathBuf};

use indexmap::IndexMap;

pub use loader::{DEFAULT_ENVIRONMENT, is_supported, load};
pub use merging::{merge_import, merge_override};

use crate::AppError;

/// The merged view over one or more configuration files.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Config {
  /// Banner printed above the script listing.
  pub header: Option<String>,
  /// The name of the default environment, when set explicitly.
  pub default_environment: Option<String>,
  /// All environments, the default one first.
  pub environments: IndexMap<String, ConfigEnvironment>,
  /// Raw CLI parameters, exported to child processes.
  pub params: Vec<String>,
}

impl Config {
  pub fn default_environment(&self) -> &str {
    self.default_environment.as_deref().unwrap_or(DEFAULT_ENVIRONMENT)
  }

  pub fn environment(&self, name: &str) -> Result<&ConfigEnvironment, AppError> {
    self
      .environments
      .get(name)
      .ok_or_else(|| AppError::UnknownEnvironment {
        name: name.to_string(),
      })
  }

  /// Every scripts path across all environments, in configuration order.
  pub fn all_script_paths(&self) -> Vec<&ScriptsPath> {
    self
      .environments
      .values()
      .flat_map(|env| &env.scripts_paths)
      .collect()
  }
}

/// A named slice of configuration: paths, variables, constants, templates
/// and dotenv files.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigEnvironment {
  pub hidden: bool,
  pub description: Option<String>,
  pub scripts_paths: Vec<ScriptsPath>,
  /// `name -> shell expression`, evaluated lazily.
  pub dynamic_variables: IndexMap<String, String>,
  /// `name -> literal value`.
  pub constants: IndexMap<String, String>,
  pub templates: Vec<TemplateDecl>,
  pub dotenv_paths: Vec<DotenvFile>,
}

/// One directory of scripts, optionally tagged with an environment
/// namespace. The path is validated lazily, at execution time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptsPath {
  pub path: PathBuf,
  pub namespace: Option<String>,
  pub hidden: bool,
}

/// A `source -> destination` template declaration, with both paths already
/// resolved to absolute ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateDecl {
  pub source: PathBuf,
  pub destination: PathBuf,
}

/// A path to a `KEY=VALUE` file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DotenvFile(PathBuf);

impl DotenvFile {
  pub fn new<T: Into<PathBuf>>(path: T) -> Self {
    Self(path.into())
  }

  pub fn path(&self) -> &Path {
    &self.0
  }
}
