use std::path::{Path, PathBuf};

use indexmap::IndexSet;

use crate::{
  AppError,
  fs::{fix_path, read_file_to_string},
  scripts::{Script, ScriptFinder},
};

/// A process to run through the host shell. `shell` is the command text,
/// `line` the script line it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessCommand {
  pub shell: String,
  pub line: String,
  pub ignore_error: bool,
  pub tty: bool,
}

/// One entry of the typed command stream emitted by the parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
  /// Runs to completion before the next command starts.
  Sync(ProcessCommand),
  /// Started in the background, synchronised at the next `WAIT:` barrier or
  /// at script end.
  Deferred(ProcessCommand),
  Template {
    source: PathBuf,
    destination: PathBuf,
    line: String,
  },
  Wait {
    line: String,
  },
  /// A whole `.sh` file, executed through a rendered temporary copy.
  Bash {
    script: Script,
    line: String,
  },
}

/// Modifier flags accumulated across dispatcher passes over a single line.
/// Consumed by exactly the next process command, then reset.
#[derive(Debug, Default)]
struct ModifierState {
  ignore_error: bool,
  tty: bool,
  deferred: bool,
}

/// Turns script content into a command stream. `ACTION:` and `INCLUDE:`
/// re-enter the parser; a visited set of normalised paths guards against
/// inclusion cycles.
pub struct ScriptParser<'a> {
  finder: &'a ScriptFinder,
  visited: IndexSet<PathBuf>,
}

impl<'a> ScriptParser<'a> {
  pub fn new(finder: &'a ScriptFinder) -> Self {
    Self {
      finder,
      visited: IndexSet::new(),
    }
  }

  pub fn parse(&mut self, script: &Script) -> Result<Vec<Command>, AppError> {
    let path = normalize_path(&script.path());

    let was_absent = self.visited.insert(path.clone());

    if !was_absent {
      let chain: Vec<_> = self
        .visited
        .iter()
        .map(|p| p.to_string_lossy())
        .collect();

      return Err(AppError::CircularDependency(format!(
        "Found a circular inclusion of the script {}. The full processed path is: {}",
        path.display(),
        chain.join(" -> ")
      )));
    }

    let result = self.parse_script(script);

    self.visited.shift_remove(&path);

    result
  }

  fn parse_script(&mut self, script: &Script) -> Result<Vec<Command>, AppError> {
    if script.is_bash() {
      return Ok(vec![Command::Bash {
        script: script.clone(),
        line: script.name(),
      }]);
    }

    let content = read_file_to_string(&script.path())?;

    self.parse_content(&content, script)
  }

  /// Parses already-loaded content against its owning script.
  pub fn parse_content(
    &mut self,
    content: &str,
    script: &Script,
  ) -> Result<Vec<Command>, AppError> {
    let mut commands = Vec::new();

    for line in logical_lines(content) {
      self.dispatch_line(&line, script, &mut commands)?;
    }

    Ok(commands)
  }

  fn dispatch_line(
    &mut self,
    line: &str,
    script: &Script,
    commands: &mut Vec<Command>,
  ) -> Result<(), AppError> {
    let mut state = ModifierState::default();
    let mut rest = line;

    loop {
      if let Some(name) = rest.strip_prefix("ACTION:") {
        let target = self.finder.find_by_name(name.trim())?;

        commands.extend(self.parse(&target)?);

        return Ok(());
      }

      if let Some(raw_path) = rest.strip_prefix("INCLUDE:") {
        let target = self.resolve_include(raw_path.trim(), script, line)?;

        commands.extend(self.parse(&target)?);

        return Ok(());
      }

      if let Some(pair) = rest.strip_prefix("TEMPLATE:") {
        let (source, destination) =
          pair
            .trim()
            .split_once(':')
            .ok_or_else(|| parse_error(script, line, "expected `TEMPLATE: <source>:<destination>`"))?;

        let script_file = script.path();

        let source = fix_path(Path::new(source.trim()), &script_file, true)
          .map_err(|e| parse_error(script, line, &e.to_string()))?;
        let destination = fix_path(Path::new(destination.trim()), &script_file, false)?;

        commands.push(Command::Template {
          source,
          destination,
          line: line.to_string(),
        });

        return Ok(());
      }

      if let Some(remainder) = rest.strip_prefix("WAIT:") {
        if !remainder.trim().is_empty() {
          return Err(parse_error(script, line, "unexpected content after `WAIT:`"));
        }

        commands.push(Command::Wait {
          line: line.to_string(),
        });

        return Ok(());
      }

      if let Some(remainder) = rest.strip_prefix("I:") {
        if state.ignore_error {
          return Err(parse_error(script, line, "the `I:` modifier is repeated"));
        }

        state.ignore_error = true;
        rest = non_empty_remainder(remainder, script, line, "I:")?;

        continue;
      }

      if let Some(remainder) = rest.strip_prefix("TTY:") {
        if state.tty {
          return Err(parse_error(script, line, "the `TTY:` modifier is repeated"));
        }

        state.tty = true;
        rest = non_empty_remainder(remainder, script, line, "TTY:")?;

        continue;
      }

      if let Some(remainder) = rest.strip_prefix("D:") {
        if state.deferred {
          return Err(parse_error(script, line, "the `D:` modifier is repeated"));
        }

        state.deferred = true;
        rest = non_empty_remainder(remainder, script, line, "D:")?;

        continue;
      }

      // Anything else is an executable shell command. Emitting it consumes
      // the modifier state.
      let command = ProcessCommand {
        shell: rest.to_string(),
        line: line.to_string(),
        ignore_error: state.ignore_error,
        tty: state.tty,
      };

      commands.push(if state.deferred {
        Command::Deferred(command)
      } else {
        Command::Sync(command)
      });

      return Ok(());
    }
  }

  fn resolve_include(
    &self,
    raw_path: &str,
    script: &Script,
    line: &str,
  ) -> Result<Script, AppError> {
    let script_file = script.path();

    let resolved = fix_path(Path::new(raw_path), &script_file, true)
      .map_err(|_| parse_error(script, line, &format!("cannot resolve the include `{raw_path}`")))?;

    let directory = resolved
      .parent()
      .map(Path::to_path_buf)
      .ok_or_else(|| parse_error(script, line, &format!("cannot resolve the include `{raw_path}`")))?;

    let filename = resolved
      .file_name()
      .map(|name| name.to_string_lossy().to_string())
      .ok_or_else(|| parse_error(script, line, &format!("cannot resolve the include `{raw_path}`")))?;

    Ok(Script {
      directory,
      filename,
      hidden: true,
      namespace: script.namespace.clone(),
      description: None,
    })
  }
}

/// Splits content into logical lines: trailing whitespace stripped, blank
/// and `#` lines skipped, a line starting with at least three spaces is a
/// continuation of the previous one.
fn logical_lines(content: &str) -> Vec<String> {
  let mut lines: Vec<String> = Vec::new();

  for raw in content.split('\n') {
    let line = raw.trim_end();

    if line.is_empty() || line.starts_with('#') {
      continue;
    }

    if line.starts_with("   ") {
      if let Some(previous) = lines.last_mut() {
        previous.push(' ');
        previous.push_str(line.trim_start());

        continue;
      }
    }

    lines.push(line.to_string());
  }

  lines
}

fn non_empty_remainder<'l>(
  remainder: &'l str,
  script: &Script,
  line: &str,
  token: &str,
) -> Result<&'l str, AppError> {
  let remainder = remainder.trim_start();

  if remainder.is_empty() {
    return Err(parse_error(
      script,
      line,
      &format!("the `{token}` modifier has nothing to apply to"),
    ));
  }

  Ok(remainder)
}

fn parse_error(script: &Script, line: &str, error: &str) -> AppError {
  AppError::ScriptParse {
    script: script.name(),
    line: line.to_string(),
    error: error.to_string(),
  }
}

fn normalize_path(path: &Path) -> PathBuf {
  path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}
