use std::path::{Path, PathBuf};

use indexmap::{IndexMap, IndexSet};
use serde::Deserialize;

use crate::{
  AppError,
  config::{Config, ConfigEnvironment, DotenvFile, ScriptsPath, TemplateDecl, merge_import},
  fs::{deserialize_yaml, fix_path, get_abs_path},
};

pub const DEFAULT_ENVIRONMENT: &str = "default";

/// The raw shape of a configuration file, before paths are resolved and the
/// default environment is assembled.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawConfig {
  header: Option<String>,
  default_environment: Option<String>,
  paths: Vec<PathBuf>,
  dynamic: IndexMap<String, String>,
  #[serde(rename = "const")]
  constants: IndexMap<String, String>,
  dotenv: Vec<PathBuf>,
  templates: Vec<RawTemplate>,
  environments: IndexMap<String, RawEnvironment>,
  import: Vec<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawEnvironment {
  hidden: bool,
  description: Option<String>,
  paths: Vec<PathBuf>,
  dynamic: IndexMap<String, String>,
  #[serde(rename = "const")]
  constants: IndexMap<String, String>,
  dotenv: Vec<PathBuf>,
  templates: Vec<RawTemplate>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTemplate {
  source: PathBuf,
  destination: PathBuf,
}

/// Returns true for the recognised suffix family: `.yml`/`.yaml`, optionally
/// further suffixed with `.dist` or `.override`.
pub fn is_supported(filename: &str) -> bool {
  let base = filename
    .strip_suffix(".dist")
    .or_else(|| filename.strip_suffix(".override"))
    .unwrap_or(filename);

  base.ends_with(".yml") || base.ends_with(".yaml")
}

/// Loads a configuration file, resolving every path relative to it and
/// merging its `import` list in import mode.
pub fn load(path: &Path, params: &[String]) -> Result<Config, AppError> {
  let mut visited: IndexSet<PathBuf> = IndexSet::new();

  load_recursive(path, params, &mut visited)
}

fn load_recursive(
  path: &Path,
  params: &[String],
  visited: &mut IndexSet<PathBuf>,
) -> Result<Config, AppError> {
  let abs_path = get_abs_path(path)?;

  let was_absent = visited.insert(abs_path.clone());

  if !was_absent {
    let chain: Vec<_> = visited
      .iter()
      .map(|source| source.to_string_lossy())
      .collect();

    return Err(AppError::CircularDependency(format!(
      "Found a circular import of the config file {}. The full processed path is: {}",
      abs_path.display(),
      chain.join(" -> ")
    )));
  }

  let file_name = abs_path
    .file_name()
    .map(|name| name.to_string_lossy())
    .unwrap_or_default();

  if !is_supported(&file_name) {
    return Err(AppError::DeserializationError {
      file: abs_path.clone(),
      error: format!(
        "Invalid config format for `{}`. Allowed formats are: yml, yaml (with an optional .dist or .override suffix)",
        abs_path.display()
      ),
    });
  }

  let raw: RawConfig = deserialize_yaml(&abs_path)?;

  let imports = raw.import.clone();

  let mut config = build_config(raw, &abs_path, params)?;

  for import in imports {
    let import_path = fix_path(&import, &abs_path, true)?;
    let imported = load_recursive(&import_path, params, visited)?;

    config = merge_import(config, imported);
  }

  Ok(config)
}

fn build_config(raw: RawConfig, file: &Path, params: &[String]) -> Result<Config, AppError> {
  if raw.paths.is_empty() && raw.environments.is_empty() {
    return Err(AppError::InvalidConfig {
      file: file.to_path_buf(),
      error: "at least one of `paths` or `environments` must be defined".to_string(),
    });
  }

  let default_name = raw
    .default_environment
    .clone()
    .unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_string());

  let mut environments: IndexMap<String, ConfigEnvironment> = IndexMap::new();

  environments.insert(
    default_name.clone(),
    build_environment(
      None,
      false,
      None,
      raw.paths,
      raw.dynamic,
      raw.constants,
      raw.templates,
      raw.dotenv,
      file,
    )?,
  );

  for (name, env) in raw.environments {
    if name == default_name {
      return Err(AppError::InvalidConfig {
        file: file.to_path_buf(),
        error: format!(
          "the environment `{name}` collides with the default environment; use the top-level keys instead"
        ),
      });
    }

    let environment = build_environment(
      Some(name.as_str()),
      env.hidden,
      env.description,
      env.paths,
      env.dynamic,
      env.constants,
      env.templates,
      env.dotenv,
      file,
    )?;

    environments.insert(name, environment);
  }

  Ok(Config {
    header: raw.header,
    default_environment: raw.default_environment,
    environments,
    params: params.to_vec(),
  })
}

#[allow(clippy::too_many_arguments)]
fn build_environment(
  namespace: Option<&str>,
  hidden: bool,
  description: Option<String>,
  paths: Vec<PathBuf>,
  dynamic: IndexMap<String, String>,
  constants: IndexMap<String, String>,
  templates: Vec<RawTemplate>,
  dotenv: Vec<PathBuf>,
  file: &Path,
) -> Result<ConfigEnvironment, AppError> {
  let scripts_paths = paths
    .into_iter()
    .map(|path| {
      Ok(ScriptsPath {
        path: fix_path(&path, file, false)?,
        namespace: namespace.map(String::from),
        hidden,
      })
    })
    .collect::<Result<Vec<_>, AppError>>()?;

  let templates = templates
    .into_iter()
    .map(|decl| {
      Ok(TemplateDecl {
        source: fix_path(&decl.source, file, true)?,
        destination: fix_path(&decl.destination, file, false)?,
      })
    })
    .collect::<Result<Vec<_>, AppError>>()?;

  let dotenv_paths = dotenv
    .into_iter()
    .map(|path| Ok(DotenvFile::new(fix_path(&path, file, false)?)))
    .collect::<Result<Vec<_>, AppError>>()?;

  Ok(ConfigEnvironment {
    hidden,
    description,
    scripts_paths,
    dynamic_variables: dynamic,
    constants,
    templates,
    dotenv_paths,
  })
}
