pub mod parser;

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use walkdir::WalkDir;

use crate::{
  AppError,
  config::{Config, ScriptsPath},
  fs::read_file_to_string,
};

/// The recognised script extensions. `.psh` files are parsed line by line;
/// `.sh` files run whole, through a rendered temporary copy.
pub const SCRIPT_EXTENSIONS: [&str; 2] = ["sh", "psh"];

/// An executable file found under one of the configured script paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script {
  pub directory: PathBuf,
  pub filename: String,
  pub hidden: bool,
  pub namespace: Option<String>,
  pub description: Option<String>,
}

impl Script {
  /// The logical name: the filename without extension, prefixed with
  /// `<namespace>:` when the owning path is namespaced.
  pub fn name(&self) -> String {
    let base = self
      .filename
      .rsplit_once('.')
      .map_or(self.filename.as_str(), |(stem, _)| stem);

    match &self.namespace {
      Some(namespace) => format!("{namespace}:{base}"),
      None => base.to_string(),
    }
  }

  pub fn path(&self) -> PathBuf {
    self.directory.join(&self.filename)
  }

  pub fn is_bash(&self) -> bool {
    self.filename.ends_with(".sh")
  }
}

/// Enumerates the scripts under the configured paths.
#[derive(Debug, Clone)]
pub struct ScriptFinder {
  paths: Vec<ScriptsPath>,
}

impl ScriptFinder {
  pub fn new(paths: Vec<ScriptsPath>) -> Self {
    Self { paths }
  }

  pub fn from_config(config: &Config) -> Self {
    Self::new(config.all_script_paths().into_iter().cloned().collect())
  }

  /// All scripts, in path order, each directory read in ascending filename
  /// order. On duplicate names the later path wins.
  pub fn all_scripts(&self) -> Result<Vec<Script>, AppError> {
    let mut scripts: IndexMap<String, Script> = IndexMap::new();

    for scripts_path in &self.paths {
      if !scripts_path.path.is_dir() {
        return Err(AppError::ScriptPathNotValid {
          path: scripts_path.path.clone(),
        });
      }

      let entries = WalkDir::new(&scripts_path.path)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name();

      for entry in entries {
        let entry = entry.map_err(|_| AppError::ScriptPathNotValid {
          path: scripts_path.path.clone(),
        })?;

        if !entry.file_type().is_file() {
          continue;
        }

        let extension = entry.path().extension().and_then(|e| e.to_str());

        if !extension.is_some_and(|e| SCRIPT_EXTENSIONS.contains(&e)) {
          continue;
        }

        let script = Script {
          directory: scripts_path.path.clone(),
          filename: entry.file_name().to_string_lossy().to_string(),
          hidden: scripts_path.hidden,
          namespace: scripts_path.namespace.clone(),
          description: read_description(entry.path()),
        };

        let name = script.name();

        if let Some(shadowed) = scripts.insert(name.clone(), script) {
          log::warn!(
            "The script `{}` from `{}` is shadowed by the one in `{}`",
            name,
            shadowed.directory.display(),
            scripts_path.path.display()
          );
        }
      }
    }

    Ok(scripts.into_values().collect())
  }

  /// All scripts whose owning path is not hidden.
  pub fn all_visible_scripts(&self) -> Result<Vec<Script>, AppError> {
    Ok(
      self
        .all_scripts()?
        .into_iter()
        .filter(|script| !script.hidden)
        .collect(),
    )
  }

  pub fn find_by_name(&self, name: &str) -> Result<Script, AppError> {
    let mut scripts = self.all_scripts()?;

    if let Some(position) = scripts.iter().position(|script| script.name() == name) {
      return Ok(scripts.swap_remove(position));
    }

    let suggestions = self
      .find_by_partial_name(name)?
      .iter()
      .map(Script::name)
      .collect();

    Err(AppError::ScriptNotFound {
      name: name.to_string(),
      suggestions,
    })
  }

  /// Scripts whose name contains `query`, or sits within an edit distance
  /// of 2 from it.
  pub fn find_by_partial_name(&self, query: &str) -> Result<Vec<Script>, AppError> {
    Ok(
      self
        .all_scripts()?
        .into_iter()
        .filter(|script| {
          let name = script.name();

          name.contains(query) || strsim::levenshtein(&name, query) < 3
        })
        .collect(),
    )
  }
}

/// The first leading comment line of a script (shebang excluded) doubles as
/// its listing description.
fn read_description(path: &Path) -> Option<String> {
  let content = read_file_to_string(path).ok()?;

  for line in content.lines() {
    let line = line.trim();

    if line.starts_with("#!") {
      continue;
    }

    if let Some(comment) = line.strip_prefix('#') {
      let comment = comment.trim();

      if comment.is_empty() {
        continue;
      }

      return Some(comment.to_string());
    }

    if !line.is_empty() {
      break;
    }
  }

  None
}

#[cfg(test)]
mod tests {
  use std::fs;

  use pretty_assertions::assert_eq;

  use super::*;

  fn plain_path(path: &Path) -> ScriptsPath {
    ScriptsPath {
      path: path.to_path_buf(),
      namespace: None,
      hidden: false,
    }
  }

  #[test]
  fn scripts_are_listed_in_ascending_name_order() -> Result<(), AppError> {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("zz.sh"), "echo zz\n").unwrap();
    fs::write(dir.path().join("aa.psh"), "# first in line\necho aa\n").unwrap();
    fs::write(dir.path().join("notes.txt"), "not a script\n").unwrap();

    let finder = ScriptFinder::new(vec![plain_path(dir.path())]);
    let scripts = finder.all_scripts()?;

    let names: Vec<_> = scripts.iter().map(Script::name).collect();

    assert_eq!(names, vec!["aa", "zz"]);
    assert_eq!(scripts[0].description.as_deref(), Some("first in line"));

    Ok(())
  }

  #[test]
  fn later_paths_shadow_earlier_ones() -> Result<(), AppError> {
    let first = tempfile::tempdir().unwrap();
    let second = tempfile::tempdir().unwrap();
    fs::write(first.path().join("deploy.psh"), "echo first\n").unwrap();
    fs::write(second.path().join("deploy.psh"), "echo second\n").unwrap();

    let finder = ScriptFinder::new(vec![plain_path(first.path()), plain_path(second.path())]);
    let scripts = finder.all_scripts()?;

    assert_eq!(scripts.len(), 1);
    assert_eq!(scripts[0].directory, second.path());

    Ok(())
  }

  #[test]
  fn namespaced_scripts_carry_the_namespace_in_their_name() -> Result<(), AppError> {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("deploy.psh"), "echo hi\n").unwrap();

    let finder = ScriptFinder::new(vec![ScriptsPath {
      path: dir.path().to_path_buf(),
      namespace: Some("staging".to_string()),
      hidden: false,
    }]);

    let script = finder.find_by_name("staging:deploy")?;

    assert_eq!(script.name(), "staging:deploy");

    Ok(())
  }

  #[test]
  fn hidden_paths_are_dropped_from_the_visible_view() -> Result<(), AppError> {
    let visible = tempfile::tempdir().unwrap();
    let hidden = tempfile::tempdir().unwrap();
    fs::write(visible.path().join("build.psh"), "echo hi\n").unwrap();
    fs::write(hidden.path().join("internal.psh"), "echo hi\n").unwrap();

    let finder = ScriptFinder::new(vec![
      plain_path(visible.path()),
      ScriptsPath {
        path: hidden.path().to_path_buf(),
        namespace: None,
        hidden: true,
      },
    ]);

    assert_eq!(finder.all_scripts()?.len(), 2);

    let names: Vec<_> = finder
      .all_visible_scripts()?
      .iter()
      .map(Script::name)
      .collect();

    assert_eq!(names, vec!["build"]);

    Ok(())
  }

  #[test]
  fn invalid_paths_are_reported() {
    let finder = ScriptFinder::new(vec![plain_path(Path::new("/nonexistent/scripts"))]);

    let result = finder.all_scripts();

    assert!(matches!(result, Err(AppError::ScriptPathNotValid { .. })));
  }

  #[test]
  fn unknown_names_come_back_with_suggestions() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("deploy.psh"), "echo hi\n").unwrap();

    let finder = ScriptFinder::new(vec![plain_path(dir.path())]);

    let result = finder.find_by_name("depoy");

    match result {
      Err(AppError::ScriptNotFound { suggestions, .. }) => {
        assert_eq!(suggestions, vec!["deploy".to_string()]);
      }
      other => panic!("Expected ScriptNotFound, got {other:?}"),
    }
  }
}
