use std::path::{Path, PathBuf};

use anyhow::anyhow;
use clap::Parser;
use indexmap::IndexMap;

use crate::{
  AppError,
  config::{Config, load, merge_override},
  exec::{Executor, ProcessEnvironment},
  fs::get_cwd,
  logging::ConsoleLogger,
  scripts::{ScriptFinder, parser::ScriptParser},
};

/// The config file basenames probed in the working directory, lowest
/// precedence first within each family.
const CONFIG_BASENAMES: [&str; 2] = ["runbook.yml", "runbook.yaml"];

#[derive(Parser, Debug)]
#[command(name = "runbook", version, about)]
pub struct Cli {
  /// The name of the script to run
  pub script: Option<String>,

  /// Extra parameters, exported to the script's processes as PARAM1..n
  #[arg(trailing_var_arg = true)]
  pub params: Vec<String>,

  /// The path to the config file to use instead of the discovered ones
  #[arg(short, long, value_name = "FILE")]
  pub config: Option<PathBuf>,

  /// The environment whose variables apply to this run
  #[arg(short, long, value_name = "NAME")]
  pub environment: Option<String>,

  /// List the available scripts
  #[arg(short, long)]
  pub list: bool,
}

pub fn main_entrypoint() -> Result<(), AppError> {
  execute_cli(Cli::parse())
}

pub fn execute_cli(cli: Cli) -> Result<(), AppError> {
  let config = resolve_config(cli.config.as_deref(), &cli.params)?;

  match &cli.script {
    Some(name) if !cli.list => run_script(&config, name, cli.environment.as_deref()),
    _ => print_script_list(&config),
  }
}

/// Loads the explicit config file, or discovers the
/// `runbook.yml[.dist|.override]` family in the working directory and merges
/// it in override mode: `.dist` < plain < `.override`.
fn resolve_config(explicit: Option<&Path>, params: &[String]) -> Result<Config, AppError> {
  if let Some(path) = explicit {
    return load(path, params);
  }

  let mut config: Option<Config> = None;

  for suffix in [".dist", "", ".override"] {
    for basename in CONFIG_BASENAMES {
      let candidate = PathBuf::from(format!("{basename}{suffix}"));

      if !candidate.is_file() {
        continue;
      }

      let loaded = load(&candidate, params)?;

      config = Some(match config {
        Some(base) => merge_override(base, loaded),
        None => loaded,
      });
    }
  }

  config.ok_or_else(|| {
    AppError::Other(anyhow!(
      "No config file found. Create a `runbook.yml` or pass one with --config"
    ))
  })
}

fn run_script(
  config: &Config,
  name: &str,
  environment_override: Option<&str>,
) -> Result<(), AppError> {
  let finder = ScriptFinder::from_config(config);
  let script = finder.find_by_name(name)?;

  // A namespaced script runs with the variables of its owning environment.
  let environment_name = environment_override
    .or(script.namespace.as_deref())
    .unwrap_or_else(|| config.default_environment());

  let environment = config.environment(environment_name)?;

  let process_environment = ProcessEnvironment::new(environment, &config.params)?;

  let commands = ScriptParser::new(&finder).parse(&script)?;

  let mut logger = ConsoleLogger;

  Executor::new(&process_environment, &mut logger, get_cwd()).execute(&script, &commands)
}

fn print_script_list(config: &Config) -> Result<(), AppError> {
  if let Some(header) = &config.header {
    println!("{header}");
    println!();
  }

  let finder = ScriptFinder::from_config(config);
  let scripts = finder.all_visible_scripts()?;

  if scripts.is_empty() {
    println!("No scripts found.");

    return Ok(());
  }

  let width = scripts
    .iter()
    .map(|script| script.name().len())
    .max()
    .unwrap_or(0);

  // One group per namespace, un-namespaced scripts first, in listing order
  let mut groups: IndexMap<Option<String>, Vec<_>> = IndexMap::new();

  groups.insert(None, Vec::new());

  for script in scripts {
    groups
      .entry(script.namespace.clone())
      .or_default()
      .push(script);
  }

  println!("Available scripts:");

  for (namespace, scripts) in &groups {
    if let Some(namespace) = namespace {
      println!();
      println!("{namespace}:");
    }

    for script in scripts {
      let name = script.name();
      let description = script.description.as_deref().unwrap_or("");

      println!("  {name:<width$}  {description}");
    }
  }

  Ok(())
}
