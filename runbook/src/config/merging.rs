use indexmap::map::Entry;

use crate::config::{Config, ConfigEnvironment};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MergeMode {
  /// A local file replaces the executables of its parent: scripts paths and
  /// templates are swapped out wholesale when the other side has any.
  Override,
  /// Bring in another ruleset additively: paths, templates and dotenv files
  /// from both sides are kept.
  Import,
}

pub fn merge_override(base: Config, other: Config) -> Config {
  merge(base, other, MergeMode::Override)
}

pub fn merge_import(base: Config, other: Config) -> Config {
  merge(base, other, MergeMode::Import)
}

fn merge(mut base: Config, other: Config, mode: MergeMode) -> Config {
  if other.header.as_ref().is_some_and(|h| !h.is_empty()) {
    base.header = other.header;
  }

  if other
    .default_environment
    .as_ref()
    .is_some_and(|name| !name.is_empty())
  {
    base.default_environment = other.default_environment;
  }

  if !other.params.is_empty() {
    base.params = other.params;
  }

  for (name, environment) in other.environments {
    match base.environments.entry(name) {
      Entry::Occupied(mut entry) => merge_environment(entry.get_mut(), environment, mode),
      Entry::Vacant(entry) => {
        entry.insert(environment);
      }
    }
  }

  base
}

fn merge_environment(base: &mut ConfigEnvironment, other: ConfigEnvironment, mode: MergeMode) {
  base.hidden |= other.hidden;

  if other.description.is_some() {
    base.description = other.description;
  }

  match mode {
    MergeMode::Override => {
      if !other.scripts_paths.is_empty() {
        base.scripts_paths = other.scripts_paths;
      }

      if !other.templates.is_empty() {
        base.templates = other.templates;
      }

      for dotenv in other.dotenv_paths {
        if !base.dotenv_paths.contains(&dotenv) {
          base.dotenv_paths.push(dotenv);
        }
      }
    }
    MergeMode::Import => {
      base.scripts_paths.extend(other.scripts_paths);
      base.templates.extend(other.templates);
      base.dotenv_paths.extend(other.dotenv_paths);
    }
  }

  // IndexMap keeps the original position on collision, so base entries come
  // first and new keys are appended.
  base.dynamic_variables.extend(other.dynamic_variables);
  base.constants.extend(other.constants);
}
