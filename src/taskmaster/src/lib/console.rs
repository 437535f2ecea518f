use std::io::{self, BufRead, Write};

use libq::strings::Tokenizer;

use crate::error::MasterError;
use crate::master::Master;

pub const PROMPT: &str = "taskmaster> ";

pub const USAGE: &str = "Commands:
  start NAME            start a task
  stop NAME             stop a task
  restart NAME          restart a task
  status [NAME]         show the status of one task, or all of them
  reload-config [FILE]  reload the config, from FILE or the last loaded one
  exit [cli|daemon]     leave the console, or shut the daemon down
";

/// What the caller should do after a line has been executed
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConsoleAction {
    Continue,
    Exit,
}

/// The interactive front end. Reads command lines and runs them against any `Master`
pub struct Console<O: Write, E: Write> {
    name: String,
    out: O,
    err: E,
}

impl Console<io::Stdout, io::Stderr> {
    pub fn stdio(name: &str) -> Console<io::Stdout, io::Stderr> {
        return Console::new(name, io::stdout(), io::stderr());
    }
}

impl<O: Write, E: Write> Console<O, E> {
    pub fn new(name: &str, out: O, err: E) -> Console<O, E> {
        return Console {
            name: name.to_owned(),
            out: out,
            err: err,
        };
    }

    pub fn prompt(&mut self) {
        let _ = write!(self.out, "{}", PROMPT);
        let _ = self.out.flush();
    }

    fn usage(&mut self, usage: &str) {
        let _ = writeln!(self.err, "Usage: {}", usage);
    }

    /// Prints a reply, or an error prefixed with what the command was aimed at
    fn report(&mut self, target: Option<&str>, result: Result<String, MasterError>) {
        match result {
            Ok(reply) => {
                let _ = writeln!(self.out, "{}", reply);
            }
            Err(err) => {
                let target = target.unwrap_or(self.name.as_str());
                let _ = writeln!(self.err, "{}: error: {}", target, err);
            }
        }
    }

    /// Runs a single command line
    pub fn execute<M: Master + ?Sized>(&mut self, line: &str, master: &mut M) -> ConsoleAction {
        let tokens = match Tokenizer::new(line).try_tokenize() {
            Ok(tokens) => tokens,
            Err(err) => {
                let _ = writeln!(self.err, "{}: error: {}", self.name, err);
                return ConsoleAction::Continue;
            }
        };

        let (command, args) = match tokens.split_first() {
            Some((command, args)) => (command.as_str(), args),
            None => {
                return ConsoleAction::Continue;
            }
        };

        let first_arg = args.first().map(|arg| arg.as_str());
        match (command, first_arg) {
            ("start", Some(name)) => {
                let result = master.start(name);
                self.report(Some(name), result);
            }
            ("start", None) => self.usage("start NAME"),
            ("stop", Some(name)) => {
                let result = master.stop(name);
                self.report(Some(name), result);
            }
            ("stop", None) => self.usage("stop NAME"),
            ("restart", Some(name)) => {
                let result = master.restart(name);
                self.report(Some(name), result);
            }
            ("restart", None) => self.usage("restart NAME"),
            ("status", name) => {
                let result = master.status(name.unwrap_or(""));
                self.report(name, result);
            }
            ("reload-config", path) => {
                let result = master.reload_config(path.unwrap_or(""));
                self.report(path, result);
            }
            ("exit", None) | ("exit", Some("cli")) => {
                return ConsoleAction::Exit;
            }
            ("exit", Some("daemon")) => {
                let result = master.exit();
                self.report(None, result);
                return ConsoleAction::Exit;
            }
            ("exit", Some(_)) => self.usage("exit [cli|daemon]"),
            (unknown, _) => {
                let _ = write!(self.err, "Unknown command: {}\n{}", unknown, USAGE);
            }
        }

        return ConsoleAction::Continue;
    }

    /// Reads and executes lines until end of input or an exit command
    pub fn run<R: BufRead, M: Master + ?Sized>(&mut self, input: R, master: &mut M) {
        self.prompt();
        for line in input.lines() {
            let line = match line {
                Ok(line) => line,
                Err(_) => break,
            };

            if self.execute(&line, master) == ConsoleAction::Exit {
                return;
            }

            self.prompt();
        }
    }

    pub fn into_inner(self) -> (O, E) {
        return (self.out, self.err);
    }
}
