pub mod environment;

use std::{
  fs,
  io::{BufRead, BufReader, Read},
  path::{Path, PathBuf},
  process::{Child, ExitStatus, Stdio},
  thread,
};

use anyhow::anyhow;
pub use environment::ProcessEnvironment;
use indexmap::IndexMap;

use crate::{
  AppError,
  fs::{read_file_to_string, write_file},
  logging::{CommandKind, ExecutionLogger, LogMessage},
  scripts::{
    Script,
    parser::{Command, ProcessCommand},
  },
  templating::{self, Template},
  variables::ValueProvider,
};

pub(crate) const fn default_shell() -> (&'static str, &'static str) {
  if cfg!(target_os = "windows") {
    ("cmd.exe", "/C")
  } else {
    ("sh", "-c")
  }
}

/// A background child process awaiting its `WAIT:` barrier. Output is
/// buffered and replayed when the queue is drained.
#[derive(Debug)]
struct DeferredProcess {
  child: Child,
  shell: String,
  ignore_error: bool,
}

/// The pool of outstanding deferred processes, owned exclusively by the
/// executor. Dropping the queue awaits any children still in it, so no
/// child outlives the executor even during unwinding.
#[derive(Debug, Default)]
struct DeferredQueue {
  processes: Vec<DeferredProcess>,
}

impl DeferredQueue {
  fn push(&mut self, process: DeferredProcess) {
    self.processes.push(process);
  }

  fn take_all(&mut self) -> Vec<DeferredProcess> {
    std::mem::take(&mut self.processes)
  }

  fn is_empty(&self) -> bool {
    self.processes.is_empty()
  }
}

impl Drop for DeferredQueue {
  fn drop(&mut self) {
    // Last-resort cleanup: only reached when unwinding past the executor.
    // The regular drain empties the queue first on both success and error
    // paths. Nobody reads the pipes anymore, so the children are killed
    // rather than awaited to completion.
    for process in &mut self.processes {
      let _ = process.child.kill();
      let _ = process.child.wait();
    }
  }
}

/// Drives a command stream against the operating system.
pub struct Executor<'a> {
  environment: &'a ProcessEnvironment,
  logger: &'a mut dyn ExecutionLogger,
  app_dir: PathBuf,
  deferred: DeferredQueue,
}

impl<'a> Executor<'a> {
  pub fn new(
    environment: &'a ProcessEnvironment,
    logger: &'a mut dyn ExecutionLogger,
    app_dir: PathBuf,
  ) -> Self {
    Self {
      environment,
      logger,
      app_dir,
      deferred: DeferredQueue::default(),
    }
  }

  pub fn execute(&mut self, script: &Script, commands: &[Command]) -> Result<(), AppError> {
    self.logger.start_script(script);

    let values = self.environment.all_values();

    let run_result = self.run_commands(commands, &values);

    if run_result.is_err() && !self.deferred.is_empty() {
      self
        .logger
        .warn("The script failed with deferred commands still running; waiting for them to finish");
    }

    // The drain must happen even when a command failed, so no deferred
    // child is orphaned. A deferred failure never masks the original error.
    let drain_result = self.drain_deferred();

    run_result.and(drain_result)?;

    self.logger.finish_script(script);

    Ok(())
  }

  fn run_commands(
    &mut self,
    commands: &[Command],
    values: &IndexMap<String, ValueProvider>,
  ) -> Result<(), AppError> {
    let environment = self.environment;

    // Environment-level templates come first, so commands can read the
    // generated files.
    for template in environment.templates() {
      self.render_template_file(template, values)?;
    }

    let total = commands.len();

    for (index, command) in commands.iter().enumerate() {
      match command {
        Command::Sync(process) => self.run_sync(process, values, index, total)?,
        Command::Deferred(process) => self.start_deferred(process, values, index, total)?,
        Command::Template {
          source,
          destination,
          line,
        } => {
          self.logger.log_start(
            CommandKind::Template,
            &destination.display().to_string(),
            line,
            false,
            index,
            total,
          );

          let template = Template::new(source.clone(), destination.clone());

          self.render_template_file(&template, values)?;

          self.logger.log_success();
        }
        Command::Wait { .. } => {
          self.logger.log_wait();
          self.drain_deferred()?;
        }
        Command::Bash { script, line } => self.run_bash(script, values, line, index, total)?,
      }
    }

    Ok(())
  }

  /// Renders a template's content and destination path, then writes the
  /// result to disk.
  fn render_template_file(
    &mut self,
    template: &Template,
    values: &IndexMap<String, ValueProvider>,
  ) -> Result<(), AppError> {
    let rendered = templating::render(template.content()?, values)?;

    let destination = templating::render(&template.destination().to_string_lossy(), values)?;

    write_file(Path::new(&destination), &rendered)
  }

  fn run_sync(
    &mut self,
    command: &ProcessCommand,
    values: &IndexMap<String, ValueProvider>,
    index: usize,
    total: usize,
  ) -> Result<(), AppError> {
    let rendered = templating::render(&command.shell, values)?;

    self.logger.log_start(
      CommandKind::Process,
      &rendered,
      &command.line,
      command.ignore_error,
      index,
      total,
    );

    let mut process = self.environment.create_process(&rendered)?;

    process.current_dir(&self.app_dir);

    let status = if command.tty {
      process
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());

      process.status().map_err(|e| AppError::ProcessSpawn {
        line: rendered.clone(),
        source: e,
      })?
    } else {
      process
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

      let mut child = process.spawn().map_err(|e| AppError::ProcessSpawn {
        line: rendered.clone(),
        source: e,
      })?;

      self.stream_child_output(&mut child)?;

      child.wait().map_err(|e| AppError::ProcessSpawn {
        line: rendered.clone(),
        source: e,
      })?
    };

    self.finish_process(&rendered, status, command.ignore_error)
  }

  fn start_deferred(
    &mut self,
    command: &ProcessCommand,
    values: &IndexMap<String, ValueProvider>,
    index: usize,
    total: usize,
  ) -> Result<(), AppError> {
    let rendered = templating::render(&command.shell, values)?;

    self.logger.log_start(
      CommandKind::DeferredProcess,
      &rendered,
      &command.line,
      command.ignore_error,
      index,
      total,
    );

    let mut process = self.environment.create_process(&rendered)?;

    process
      .current_dir(&self.app_dir)
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped());

    let child = process.spawn().map_err(|e| AppError::ProcessSpawn {
      line: rendered.clone(),
      source: e,
    })?;

    self.deferred.push(DeferredProcess {
      child,
      shell: rendered,
      ignore_error: command.ignore_error,
    });

    Ok(())
  }

  /// Awaits every deferred process in insertion order, replays its buffered
  /// output, then fails if any non-ignored process exited non-zero.
  fn drain_deferred(&mut self) -> Result<(), AppError> {
    let processes = self.deferred.take_all();

    let mut first_error: Option<AppError> = None;

    for process in processes {
      let DeferredProcess {
        child,
        shell,
        ignore_error,
      } = process;

      match child.wait_with_output() {
        Ok(output) => {
          for line in String::from_utf8_lossy(&output.stdout).lines() {
            self.logger.log(LogMessage {
              text: line.to_string(),
              is_err: false,
            });
          }

          for line in String::from_utf8_lossy(&output.stderr).lines() {
            self.logger.log(LogMessage {
              text: line.to_string(),
              is_err: true,
            });
          }

          if output.status.success() {
            self.logger.log_success();
          } else {
            self.logger.log_failure();

            if !ignore_error && first_error.is_none() {
              first_error = Some(AppError::ExecutionError {
                line: shell,
                status: output.status.to_string(),
              });
            }
          }
        }
        Err(e) => {
          if first_error.is_none() {
            first_error = Some(AppError::ProcessSpawn {
              line: shell,
              source: e,
            });
          }
        }
      }
    }

    match first_error {
      Some(error) => Err(error),
      None => Ok(()),
    }
  }

  /// Runs a whole `.sh` file through a rendered temporary copy. The copy is
  /// unlinked on every exit path when the handle drops.
  fn run_bash(
    &mut self,
    script: &Script,
    values: &IndexMap<String, ValueProvider>,
    line: &str,
    index: usize,
    total: usize,
  ) -> Result<(), AppError> {
    let content = read_file_to_string(&script.path())?;
    let rendered = templating::render(&content, values)?;

    self.logger.log_start(
      CommandKind::Bash,
      &script.name(),
      line,
      false,
      index,
      total,
    );

    let temp = tempfile::Builder::new()
      .prefix("runbook-")
      .suffix(".sh")
      .tempfile()
      .map_err(anyhow::Error::from)?;

    fs::write(temp.path(), &rendered).map_err(|e| AppError::WriteError {
      path: temp.path().to_path_buf(),
      source: e,
    })?;

    #[cfg(unix)]
    {
      use std::os::unix::fs::PermissionsExt;

      fs::set_permissions(temp.path(), fs::Permissions::from_mode(0o700))
        .map_err(anyhow::Error::from)?;
    }

    let command_line = temp.path().to_string_lossy().to_string();

    let mut process = self.environment.create_process(&command_line)?;

    process
      .current_dir(&self.app_dir)
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped());

    let mut child = process.spawn().map_err(|e| AppError::ProcessSpawn {
      line: command_line.clone(),
      source: e,
    })?;

    self.stream_child_output(&mut child)?;

    let status = child.wait().map_err(|e| AppError::ProcessSpawn {
      line: command_line,
      source: e,
    })?;

    self.finish_process(&script.name(), status, false)
  }

  /// Streams the child's stdout into the logger as it arrives. Stderr is
  /// drained concurrently on a background thread and replayed once stdout
  /// closes: a child filling its stderr pipe while the executor still reads
  /// stdout must not block.
  fn stream_child_output(&mut self, child: &mut Child) -> Result<(), AppError> {
    let stderr_reader = child.stderr.take().map(|mut stderr| {
      thread::spawn(move || {
        let mut buffer = String::new();

        stderr.read_to_string(&mut buffer).map(|_| buffer)
      })
    });

    if let Some(stdout) = child.stdout.take() {
      for line in BufReader::new(stdout).lines() {
        let line = line.map_err(anyhow::Error::from)?;

        self.logger.log(LogMessage {
          text: line,
          is_err: false,
        });
      }
    }

    if let Some(reader) = stderr_reader {
      let buffer = reader
        .join()
        .map_err(|_| anyhow!("The stderr reader thread panicked"))?
        .map_err(anyhow::Error::from)?;

      for line in buffer.lines() {
        self.logger.log(LogMessage {
          text: line.to_string(),
          is_err: true,
        });
      }
    }

    Ok(())
  }

  fn finish_process(
    &mut self,
    rendered: &str,
    status: ExitStatus,
    ignore_error: bool,
  ) -> Result<(), AppError> {
    if status.success() {
      self.logger.log_success();

      return Ok(());
    }

    self.logger.log_failure();

    if ignore_error {
      return Ok(());
    }

    Err(AppError::ExecutionError {
      line: rendered.to_string(),
      status: status.to_string(),
    })
  }
}

#[cfg(test)]
mod tests {
  use std::fs as std_fs;

  use indexmap::indexmap;
  use pretty_assertions::assert_eq;

  use super::*;
  use crate::{
    config::{ConfigEnvironment, TemplateDecl},
    logging::RecordingLogger,
  };

  fn test_script() -> Script {
    Script {
      directory: PathBuf::from("/tmp"),
      filename: "test.psh".to_string(),
      hidden: false,
      namespace: None,
      description: None,
    }
  }

  fn sync_command(shell: &str) -> Command {
    Command::Sync(ProcessCommand {
      shell: shell.to_string(),
      line: shell.to_string(),
      ignore_error: false,
      tty: false,
    })
  }

  fn run(
    environment: &ConfigEnvironment,
    commands: &[Command],
  ) -> (Result<(), AppError>, RecordingLogger) {
    let process_env = ProcessEnvironment::new(environment, &[]).unwrap();
    let mut logger = RecordingLogger::default();

    let result = Executor::new(&process_env, &mut logger, std::env::temp_dir())
      .execute(&test_script(), commands);

    (result, logger)
  }

  #[test]
  fn a_single_synchronous_command_runs_to_success() {
    let (result, logger) = run(&Default::default(), &[sync_command("echo hi")]);

    assert!(result.is_ok());
    assert!(logger.events.contains(&"out hi".to_string()));
    assert_eq!(logger.events.last().unwrap(), "finish test");
  }

  #[test]
  fn ignored_failures_do_not_abort_the_script() {
    let commands = [
      Command::Sync(ProcessCommand {
        shell: "false".to_string(),
        line: "I: TTY: false".to_string(),
        ignore_error: true,
        tty: false,
      }),
      sync_command("echo still-here"),
    ];

    let (result, logger) = run(&Default::default(), &commands);

    assert!(result.is_ok());
    assert!(logger.events.contains(&"failure".to_string()));
    assert!(logger.events.contains(&"out still-here".to_string()));
  }

  #[test]
  fn failures_abort_before_the_next_command() {
    let commands = [sync_command("false"), sync_command("echo unreachable")];

    let (result, logger) = run(&Default::default(), &commands);

    assert!(matches!(result, Err(AppError::ExecutionError { .. })));
    assert!(!logger.events.contains(&"out unreachable".to_string()));
  }

  #[test]
  fn heavy_stderr_output_does_not_block_the_command() {
    // Writes far more to stderr than a pipe buffer holds while stdout is
    // still open; both streams must drain concurrently.
    let command = sync_command(
      "i=0; while [ $i -lt 20000 ]; do echo some-stderr-noise >&2; i=$((i+1)); done; echo finished",
    );

    let (result, logger) = run(&Default::default(), &[command]);

    assert!(result.is_ok());
    assert!(logger.events.contains(&"out finished".to_string()));

    let stderr_lines = logger
      .events
      .iter()
      .filter(|event| event.as_str() == "err some-stderr-noise")
      .count();

    assert_eq!(stderr_lines, 20000);
  }

  #[test]
  fn deferred_output_is_replayed_in_insertion_order() {
    let commands = [
      Command::Deferred(ProcessCommand {
        shell: "sleep 0.2 && echo a".to_string(),
        line: "D: sleep 0.2 && echo a".to_string(),
        ignore_error: false,
        tty: false,
      }),
      Command::Deferred(ProcessCommand {
        shell: "echo b".to_string(),
        line: "D: echo b".to_string(),
        ignore_error: false,
        tty: false,
      }),
      Command::Wait {
        line: "WAIT:".to_string(),
      },
      sync_command("echo c"),
    ];

    let (result, logger) = run(&Default::default(), &commands);

    assert!(result.is_ok());

    let position = |event: &str| {
      logger
        .events
        .iter()
        .position(|e| e == event)
        .unwrap_or_else(|| panic!("missing event `{event}` in {:?}", logger.events))
    };

    // Insertion order at drain, regardless of completion order, and the
    // barrier empties the queue before `echo c` starts.
    assert!(position("out a") < position("out b"));
    assert!(position("wait") < position("out a"));
    assert!(position("out b") < position("out c"));
  }

  #[test]
  fn deferred_failures_surface_after_the_drain() {
    let commands = [
      Command::Deferred(ProcessCommand {
        shell: "exit 3".to_string(),
        line: "D: exit 3".to_string(),
        ignore_error: false,
        tty: false,
      }),
      sync_command("echo kept-running"),
    ];

    let (result, logger) = run(&Default::default(), &commands);

    // The sync command after the deferred one still ran; the failure only
    // surfaces at the end-of-script drain.
    assert!(logger.events.contains(&"out kept-running".to_string()));
    assert!(matches!(result, Err(AppError::ExecutionError { .. })));
  }

  #[test]
  fn an_abort_still_drains_outstanding_deferred_commands() {
    let commands = [
      Command::Deferred(ProcessCommand {
        shell: "echo lingering".to_string(),
        line: "D: echo lingering".to_string(),
        ignore_error: false,
        tty: false,
      }),
      sync_command("false"),
    ];

    let (result, logger) = run(&Default::default(), &commands);

    assert!(matches!(result, Err(AppError::ExecutionError { .. })));
    assert!(logger.events.iter().any(|e| e.starts_with("warn ")));
    assert!(logger.events.contains(&"out lingering".to_string()));
  }

  #[test]
  fn ignored_deferred_failures_are_only_logged() {
    let commands = [Command::Deferred(ProcessCommand {
      shell: "exit 3".to_string(),
      line: "I: D: exit 3".to_string(),
      ignore_error: true,
      tty: false,
    })];

    let (result, logger) = run(&Default::default(), &commands);

    assert!(result.is_ok());
    assert!(logger.events.contains(&"failure".to_string()));
  }

  #[test]
  fn command_lines_are_rendered_before_execution() {
    let environment = ConfigEnvironment {
      constants: indexmap! { "GREETING".to_string() => "hello".to_string() },
      ..Default::default()
    };

    let (result, logger) = run(&environment, &[sync_command("echo __GREETING__")]);

    assert!(result.is_ok());
    assert!(logger.events.contains(&"out hello".to_string()));
  }

  #[test]
  fn environment_templates_render_before_any_command() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("config.tpl");
    let destination = dir.path().join("generated/config.ini");
    std_fs::write(&source, "name=__NAME__\n").unwrap();

    let environment = ConfigEnvironment {
      constants: indexmap! { "NAME".to_string() => "rendered".to_string() },
      templates: vec![TemplateDecl {
        source,
        destination: destination.clone(),
      }],
      ..Default::default()
    };

    let (result, logger) = run(
      &environment,
      &[sync_command(&format!("cat {}", destination.display()))],
    );

    assert!(result.is_ok());
    assert!(logger.events.contains(&"out name=rendered".to_string()));
    assert_eq!(std_fs::read_to_string(&destination).unwrap(), "name=rendered\n");
  }

  #[test]
  fn inline_template_commands_render_at_their_position() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("value.tpl");
    let destination = dir.path().join("out.txt");
    std_fs::write(&source, "__VALUE__").unwrap();

    let environment = ConfigEnvironment {
      constants: indexmap! { "VALUE".to_string() => "42".to_string() },
      ..Default::default()
    };

    let commands = [Command::Template {
      source,
      destination: destination.clone(),
      line: "TEMPLATE: value.tpl:out.txt".to_string(),
    }];

    let (result, _) = run(&environment, &commands);

    assert!(result.is_ok());
    assert_eq!(std_fs::read_to_string(&destination).unwrap(), "42");
  }

  #[test]
  fn bash_files_run_through_a_rendered_temporary_copy() {
    let dir = tempfile::tempdir().unwrap();
    std_fs::write(
      dir.path().join("whole.sh"),
      "#!/bin/sh\necho from __PLACE__\n",
    )
    .unwrap();

    let environment = ConfigEnvironment {
      constants: indexmap! { "PLACE".to_string() => "temp-copy".to_string() },
      ..Default::default()
    };

    let script = Script {
      directory: dir.path().to_path_buf(),
      filename: "whole.sh".to_string(),
      hidden: false,
      namespace: None,
      description: None,
    };

    let commands = [Command::Bash {
      script: script.clone(),
      line: "whole".to_string(),
    }];

    let (result, logger) = run(&environment, &commands);

    assert!(result.is_ok());
    assert!(logger.events.contains(&"out from temp-copy".to_string()));
  }
}
