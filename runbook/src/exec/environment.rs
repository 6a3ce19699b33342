use std::{env, process};

use indexmap::IndexMap;

use crate::{
  AppError,
  config::ConfigEnvironment,
  exec::default_shell,
  templating::Template,
  variables::{
    ValueProvider, resolve_constants, resolve_dotenv_variables, resolve_templates,
    resolve_variables,
  },
};

/// The materialised variable set of one environment, plus the factory for
/// child processes carrying it.
#[derive(Debug)]
pub struct ProcessEnvironment {
  constants: IndexMap<String, ValueProvider>,
  variables: IndexMap<String, ValueProvider>,
  dotenv: IndexMap<String, ValueProvider>,
  templates: Vec<Template>,
  params: Vec<String>,
}

impl ProcessEnvironment {
  pub fn new(environment: &ConfigEnvironment, params: &[String]) -> Result<Self, AppError> {
    Ok(Self {
      constants: resolve_constants(&environment.constants),
      variables: resolve_variables(&environment.dynamic_variables),
      dotenv: resolve_dotenv_variables(&environment.dotenv_paths)?,
      templates: resolve_templates(&environment.templates),
      params: params.to_vec(),
    })
  }

  /// The merged value set, highest precedence last: dotenv, then constants,
  /// then dynamic variables. A host environment variable overrides a dotenv
  /// value of the same name: dotenv entries are defaults, not enforcements.
  pub fn all_values(&self) -> IndexMap<String, ValueProvider> {
    let mut values: IndexMap<String, ValueProvider> = IndexMap::new();

    for (name, provider) in &self.dotenv {
      match env::var(name) {
        Ok(host_value) => values.insert(name.clone(), ValueProvider::simple(host_value)),
        Err(_) => values.insert(name.clone(), provider.clone()),
      };
    }

    for (name, provider) in &self.constants {
      values.insert(name.clone(), provider.clone());
    }

    for (name, provider) in &self.variables {
      values.insert(name.clone(), provider.clone());
    }

    values
  }

  pub fn templates(&self) -> &[Template] {
    &self.templates
  }

  /// A child process ready to run `command_line` through the host shell,
  /// with the resolved value set in its environment. No timeout is applied.
  pub fn create_process(&self, command_line: &str) -> Result<process::Command, AppError> {
    let (shell, shell_arg) = default_shell();

    let mut command = process::Command::new(shell);

    command.arg(shell_arg).arg(command_line);

    for (position, param) in self.params.iter().enumerate() {
      command.env(format!("PARAM{}", position + 1), param);
    }

    if !self.params.is_empty() {
      command.env("PARAMS", self.params.join(" "));
    }

    for (name, provider) in self.all_values() {
      command.env(name, provider.value()?);
    }

    Ok(command)
  }
}
