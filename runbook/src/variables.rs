use std::{cell::OnceCell, process::Command, rc::Rc};

use indexmap::IndexMap;

use crate::{
  AppError,
  config::{DotenvFile, TemplateDecl},
  exec::default_shell,
  templating::Template,
};

/// A thunk yielding a string value, either eagerly or lazily.
#[derive(Debug, Clone)]
pub enum ValueProvider {
  /// An already-resolved string.
  Simple(String),
  /// A shell expression, evaluated on first access and memoised.
  Deferred(Rc<DeferredValue>),
}

impl ValueProvider {
  pub fn simple<T: Into<String>>(value: T) -> Self {
    Self::Simple(value.into())
  }

  pub fn deferred<T: Into<String>>(expression: T) -> Self {
    Self::Deferred(Rc::new(DeferredValue {
      expression: expression.into(),
      cell: OnceCell::new(),
    }))
  }

  pub fn value(&self) -> Result<String, AppError> {
    match self {
      Self::Simple(value) => Ok(value.clone()),
      Self::Deferred(deferred) => deferred.value(),
    }
  }
}

/// A lazily evaluated shell expression. Evaluation happens at most once;
/// both the resolved value and a failure are memoised.
#[derive(Debug)]
pub struct DeferredValue {
  expression: String,
  cell: OnceCell<Result<String, String>>,
}

impl DeferredValue {
  fn value(&self) -> Result<String, AppError> {
    self
      .cell
      .get_or_init(|| evaluate_shell_expression(&self.expression))
      .clone()
      .map_err(|error| AppError::ValueResolution {
        expression: self.expression.clone(),
        error,
      })
  }
}

fn evaluate_shell_expression(expression: &str) -> Result<String, String> {
  let (shell, shell_arg) = default_shell();

  let output = Command::new(shell)
    .args([shell_arg, expression])
    .output()
    .map_err(|e| e.to_string())?;

  if !output.status.success() {
    let stderr = String::from_utf8_lossy(&output.stderr);

    return Err(format!(
      "the shell exited with {}: {}",
      output.status,
      stderr.trim()
    ));
  }

  Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

pub fn resolve_constants(constants: &IndexMap<String, String>) -> IndexMap<String, ValueProvider> {
  constants
    .iter()
    .map(|(name, value)| (name.clone(), ValueProvider::simple(value)))
    .collect()
}

pub fn resolve_variables(variables: &IndexMap<String, String>) -> IndexMap<String, ValueProvider> {
  variables
    .iter()
    .map(|(name, expression)| (name.clone(), ValueProvider::deferred(expression)))
    .collect()
}

pub fn resolve_templates(declarations: &[TemplateDecl]) -> Vec<Template> {
  declarations
    .iter()
    .map(|decl| Template::new(decl.source.clone(), decl.destination.clone()))
    .collect()
}

/// Parses each dotenv file in the given order. Keys from later files
/// overwrite earlier ones.
pub fn resolve_dotenv_variables(
  files: &[DotenvFile],
) -> Result<IndexMap<String, ValueProvider>, AppError> {
  let mut values = IndexMap::new();

  for file in files {
    let entries = dotenvy::from_path_iter(file.path()).map_err(|e| AppError::DotenvParse {
      path: file.path().to_path_buf(),
      error: e.to_string(),
    })?;

    for entry in entries {
      let (key, value) = entry.map_err(|e| AppError::DotenvParse {
        path: file.path().to_path_buf(),
        error: e.to_string(),
      })?;

      values.insert(key, ValueProvider::simple(value));
    }
  }

  Ok(values)
}
