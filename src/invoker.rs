//! Line-oriented step invoker
//!
//! Drives a workflow from a terminal or a script: every dispatched step is
//! announced on the output and its outcome is read as one line of input.
//!
//! | input line        | result                          |
//! |-------------------|---------------------------------|
//! | empty             | `Next`                          |
//! | an outcome name   | that outcome (`back`, `abort`)  |
//! | `fail`, EOF       | no outcome, step failed         |
//!
//! After a failure the invoker reads a [`FailureDecision`] the same way; an
//! unreadable answer gives up.

use std::io::{BufRead, Write};
use std::str::FromStr;

use crate::executor::{StepArguments, StepInvoker};
use crate::types::{FailureDecision, Outcome};

pub struct LineInvoker<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> LineInvoker<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    pub fn into_output(self) -> W {
        self.output
    }

    fn read_line(&mut self) -> Option<String> {
        let mut line = String::new();
        match self.input.read_line(&mut line) {
            Ok(0) => None,
            Ok(_) => Some(line.trim().to_string()),
            Err(e) => {
                log::error!("Failed to read input: {}", e);
                None
            }
        }
    }

    fn prompt(&mut self, text: std::fmt::Arguments<'_>) {
        if let Err(e) = writeln!(self.output, "{}", text).and_then(|_| self.output.flush()) {
            log::warn!("Failed to write prompt: {}", e);
        }
    }
}

impl<R: BufRead, W: Write> StepInvoker for LineInvoker<R, W> {
    fn invoke(&mut self, client: &str, arguments: &StepArguments) -> Option<Outcome> {
        let args = serde_json::Value::Object(arguments.to_map());
        self.prompt(format_args!("step {} {}", client, args));

        let line = self.read_line()?;
        if line.is_empty() {
            return Some(Outcome::Next);
        }
        match Outcome::from_str(&line) {
            Ok(outcome) => Some(outcome),
            Err(_) => {
                if !line.eq_ignore_ascii_case("fail") {
                    log::warn!("Unknown outcome '{}' for step '{}'", line, client);
                }
                None
            }
        }
    }

    fn on_step_failure(&mut self, client: &str) -> FailureDecision {
        self.prompt(format_args!(
            "failed {} (next, back, again, give_up)",
            client
        ));
        self.read_line()
            .and_then(|line| FailureDecision::from_str(&line).ok())
            .unwrap_or(FailureDecision::GiveUp)
    }

    fn retranslate(&mut self) {
        log::debug!("Retranslation requested");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn invoker(input: &str) -> LineInvoker<Cursor<Vec<u8>>, Vec<u8>> {
        LineInvoker::new(Cursor::new(input.as_bytes().to_vec()), Vec::new())
    }

    #[test]
    fn test_reads_outcomes() {
        let mut inv = invoker("\nback\nABORT\nrestart_same_step\n");
        let args = StepArguments::default();
        assert_eq!(inv.invoke("a", &args), Some(Outcome::Next));
        assert_eq!(inv.invoke("a", &args), Some(Outcome::Back));
        assert_eq!(inv.invoke("a", &args), Some(Outcome::Abort));
        assert_eq!(inv.invoke("a", &args), Some(Outcome::RestartSameStep));
        assert_eq!(inv.invoke("a", &args), None);
    }

    #[test]
    fn test_fail_and_decision() {
        let mut inv = invoker("fail\nagain\nbogus\n");
        assert_eq!(inv.invoke("disks", &StepArguments::default()), None);
        assert_eq!(inv.on_step_failure("disks"), FailureDecision::Again);
        assert_eq!(inv.on_step_failure("disks"), FailureDecision::GiveUp);
    }

    #[test]
    fn test_prompt_shows_arguments() {
        let mut inv = invoker("\n");
        let args = StepArguments {
            enable_next: true,
            proposal: Some("initial".to_string()),
            ..Default::default()
        };
        inv.invoke("inst_proposal", &args);
        let out = String::from_utf8(inv.into_output()).unwrap();
        assert!(out.starts_with("step inst_proposal "));
        assert!(out.contains("\"proposal\":\"initial\""));
    }
}
