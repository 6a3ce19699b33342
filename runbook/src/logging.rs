use crate::scripts::Script;

/// One captured output line of a child process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogMessage {
  pub text: String,
  pub is_err: bool,
}

/// What kind of command is about to run, for display purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
  Process,
  DeferredProcess,
  Template,
  Bash,
}

/// Observer hooks for executor lifecycle events. Calls arrive in dispatch
/// order; deferred process output is replayed at drain time.
pub trait ExecutionLogger {
  fn start_script(&mut self, script: &Script);
  fn finish_script(&mut self, script: &Script);
  fn log_start(
    &mut self,
    kind: CommandKind,
    payload: &str,
    line: &str,
    ignores_error: bool,
    index: usize,
    total: usize,
  );
  fn log(&mut self, message: LogMessage);
  fn log_wait(&mut self);
  fn log_success(&mut self);
  fn log_failure(&mut self);
  fn warn(&mut self, message: &str);
}

/// Writes lifecycle events to the terminal.
#[derive(Debug, Default)]
pub struct ConsoleLogger;

impl ExecutionLogger for ConsoleLogger {
  fn start_script(&mut self, script: &Script) {
    println!("Running `{}`", script.name());
  }

  fn finish_script(&mut self, script: &Script) {
    println!("Finished `{}`", script.name());
  }

  fn log_start(
    &mut self,
    kind: CommandKind,
    payload: &str,
    _line: &str,
    ignores_error: bool,
    index: usize,
    total: usize,
  ) {
    let mut annotations = Vec::new();

    if kind == CommandKind::DeferredProcess {
      annotations.push("deferred");
    }

    if ignores_error {
      annotations.push("errors ignored");
    }

    let suffix = if annotations.is_empty() {
      String::new()
    } else {
      format!(" ({})", annotations.join(", "))
    };

    let position = index + 1;

    match kind {
      CommandKind::Template => println!("[{position}/{total}] rendering {payload}{suffix}"),
      CommandKind::Bash => println!("[{position}/{total}] running file {payload}{suffix}"),
      _ => println!("[{position}/{total}] {payload}{suffix}"),
    }
  }

  fn log(&mut self, message: LogMessage) {
    if message.is_err {
      eprintln!("{}", message.text);
    } else {
      println!("{}", message.text);
    }
  }

  fn log_wait(&mut self) {
    println!("Waiting for deferred commands to finish...");
  }

  fn log_success(&mut self) {
    println!("Done");
  }

  fn log_failure(&mut self) {
    eprintln!("Failed");
  }

  fn warn(&mut self, message: &str) {
    log::warn!("{message}");
  }
}

/// Records every event, for assertions in tests.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingLogger {
  pub events: Vec<String>,
}

#[cfg(test)]
impl ExecutionLogger for RecordingLogger {
  fn start_script(&mut self, script: &Script) {
    self.events.push(format!("start {}", script.name()));
  }

  fn finish_script(&mut self, script: &Script) {
    self.events.push(format!("finish {}", script.name()));
  }

  fn log_start(
    &mut self,
    kind: CommandKind,
    payload: &str,
    _line: &str,
    _ignores_error: bool,
    index: usize,
    total: usize,
  ) {
    let position = index + 1;

    self
      .events
      .push(format!("begin {kind:?} {payload} {position}/{total}"));
  }

  fn log(&mut self, message: LogMessage) {
    let stream = if message.is_err { "err" } else { "out" };

    self.events.push(format!("{stream} {}", message.text));
  }

  fn log_wait(&mut self) {
    self.events.push("wait".to_string());
  }

  fn log_success(&mut self) {
    self.events.push("success".to_string());
  }

  fn log_failure(&mut self) {
    self.events.push("failure".to_string());
  }

  fn warn(&mut self, message: &str) {
    self.events.push(format!("warn {message}"));
  }
}
