//! Line-oriented session over an [`Engine`].
//!
//! Each input line is one command; each command writes the procedure output
//! it produced followed by a single status line.

use std::fmt::Write as _;
use std::io::{self, BufRead, Write};
use std::str::FromStr;

use derive_more::{Display, Error, From};
use reprise_runtime::{ContinuationId, Engine, ParseIdError, Request, Run, RunOutcome};

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Start { class: String, request: Request },
    Resume { id: ContinuationId, request: Request },
    Clone { id: ContinuationId },
    Drop { id: ContinuationId },
    Sweep,
    List,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, Display, Error, From)]
pub enum CommandError {
    #[display("empty command")]
    #[from(skip)]
    Empty,
    #[display("unknown command {name}")]
    #[from(skip)]
    Unknown { name: String },
    #[display("{command} expects {expected}")]
    #[from(skip)]
    Usage {
        command: &'static str,
        expected: &'static str,
    },
    #[display("parameter {text} is not of the form key=value")]
    #[from(skip)]
    Param { text: String },
    #[display("{_0}")]
    Id(ParseIdError),
}

fn parse_request<'a>(mut words: impl Iterator<Item = &'a str>) -> Result<Request, CommandError> {
    words.try_fold(Request::new(), |request, word| match word.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok(request.with_param(key, value)),
        _ => Err(CommandError::Param {
            text: word.to_owned(),
        }),
    })
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let name = words.next().ok_or(CommandError::Empty)?;
        let mut operand = |command, expected| {
            words
                .next()
                .ok_or(CommandError::Usage { command, expected })
        };
        let command = match name {
            "start" => Command::Start {
                class: operand("start", "a class name")?.to_owned(),
                request: Request::new(),
            },
            "resume" => Command::Resume {
                id: operand("resume", "a continuation id")?.parse()?,
                request: Request::new(),
            },
            "clone" => Command::Clone {
                id: operand("clone", "a continuation id")?.parse()?,
            },
            "drop" => Command::Drop {
                id: operand("drop", "a continuation id")?.parse()?,
            },
            "sweep" => Command::Sweep,
            "list" => Command::List,
            "quit" | "exit" => Command::Quit,
            other => {
                return Err(CommandError::Unknown {
                    name: other.to_owned(),
                });
            }
        };
        Ok(match command {
            Command::Start { class, .. } => Command::Start {
                class,
                request: parse_request(words)?,
            },
            Command::Resume { id, .. } => Command::Resume {
                id,
                request: parse_request(words)?,
            },
            other => other,
        })
    }
}

pub struct Session<'a> {
    engine: &'a Engine,
}

impl<'a> Session<'a> {
    pub fn new(engine: &'a Engine) -> Self {
        Self { engine }
    }

    /// Execute one command line. Returns `None` on `quit`.
    pub fn execute(&self, line: &str) -> Option<String> {
        let command = match line.parse::<Command>() {
            Ok(command) => command,
            Err(CommandError::Empty) => return Some(String::new()),
            Err(error) => return Some(format!("error: {error}\n")),
        };
        tracing::debug!("session command {command:?}");
        let reply = match command {
            Command::Start { class, request } => report(self.engine.start(&class, &request)),
            Command::Resume { id, request } => report(self.engine.resume(&id, &request)),
            Command::Clone { id } => match self.engine.clone_continuation(&id) {
                Ok(clone) => format!("cloned {clone}\n"),
                Err(error) => format!("error: {error}\n"),
            },
            Command::Drop { id } => {
                if self.engine.dispose(&id) {
                    format!("dropped {id}\n")
                } else {
                    format!("error: continuation {id} not found\n")
                }
            }
            Command::Sweep => format!("swept {}\n", self.engine.sweep()),
            Command::List => self.list(),
            Command::Quit => return None,
        };
        Some(reply)
    }

    /// Read commands from `input` until `quit` or end of input.
    pub fn run<R: BufRead, W: Write>(&self, input: R, mut output: W) -> io::Result<()> {
        for line in input.lines() {
            let Some(reply) = self.execute(&line?) else {
                break;
            };
            output.write_all(reply.as_bytes())?;
            output.flush()?;
        }
        Ok(())
    }

    fn list(&self) -> String {
        let rows = self.engine.manager().entries();
        if rows.is_empty() {
            return "no continuations\n".to_owned();
        }
        let mut text = String::new();
        for row in rows {
            let _ = write!(text, "{} {} at {}", row.id, row.procedure, row.resume_point);
            if let Some(caller) = row.caller {
                let _ = write!(text, " caller={caller}");
            }
            if row.in_use {
                text.push_str(" (in use)");
            }
            if row.awaiting_answer {
                text.push_str(" (awaiting answer)");
            }
            text.push('\n');
        }
        text
    }
}

fn report(run: Run) -> String {
    let mut text = run.output;
    let _ = match run.outcome {
        RunOutcome::Completed(None) => writeln!(text, "completed"),
        RunOutcome::Completed(Some(value)) => writeln!(text, "completed: {value}"),
        RunOutcome::Suspended(id) => writeln!(text, "suspended {id}"),
        RunOutcome::Failed(error) => writeln!(text, "failed: {error}"),
        RunOutcome::Expired => writeln!(text, "expired"),
    };
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use reprise_ir::{ClassFile, CodeBuilder, DEFAULT_METHOD, SlotType};

    fn greeter() -> Vec<u8> {
        let mut b = CodeBuilder::new();
        b.print_str("who?").pause();
        b.const_str("hello ").param("name").concat().print();
        b.ret();
        ClassFile::new("Greeter")
            .with_method(b.build(DEFAULT_METHOD).unwrap())
            .encode()
    }

    fn engine() -> Engine {
        let engine = Engine::new(Default::default());
        engine.load(&greeter()).unwrap();
        engine
    }

    fn suspended_id(reply: &str) -> &str {
        reply
            .lines()
            .find_map(|line| line.strip_prefix("suspended "))
            .unwrap()
    }

    #[test]
    fn parses_parameters() {
        let command: Command = "start Greeter name=Ada lang=en".parse().unwrap();
        assert_eq!(
            command,
            Command::Start {
                class: "Greeter".to_owned(),
                request: Request::new()
                    .with_param("name", "Ada")
                    .with_param("lang", "en"),
            }
        );
    }

    #[test]
    fn rejects_malformed_commands() {
        assert_eq!("".parse::<Command>(), Err(CommandError::Empty));
        assert!(matches!(
            "jump".parse::<Command>(),
            Err(CommandError::Unknown { .. })
        ));
        assert!(matches!(
            "resume".parse::<Command>(),
            Err(CommandError::Usage { command: "resume", .. })
        ));
        assert!(matches!(
            "resume xyz".parse::<Command>(),
            Err(CommandError::Id(_))
        ));
        assert!(matches!(
            "start Greeter name".parse::<Command>(),
            Err(CommandError::Param { .. })
        ));
    }

    #[test]
    fn start_then_resume() {
        let engine = engine();
        let session = Session::new(&engine);

        let first = session.execute("start Greeter").unwrap();
        assert!(first.starts_with("who?\nsuspended "));
        let id = suspended_id(&first);

        let second = session.execute(&format!("resume {id} name=Ada")).unwrap();
        assert_eq!(second, "hello Ada\ncompleted\n");
        let again = session.execute(&format!("resume {id}")).unwrap();
        assert_eq!(again, "expired\n");
    }

    #[test]
    fn list_and_drop() {
        let engine = engine();
        let session = Session::new(&engine);
        assert_eq!(session.execute("list").unwrap(), "no continuations\n");

        let first = session.execute("start Greeter").unwrap();
        let id = suspended_id(&first).to_owned();
        assert_eq!(
            session.execute("list").unwrap(),
            format!("{id} Greeter.process at #1\n")
        );
        assert_eq!(session.execute(&format!("drop {id}")).unwrap(), format!("dropped {id}\n"));
        assert!(session.execute(&format!("drop {id}")).unwrap().starts_with("error:"));
        assert_eq!(session.execute("sweep").unwrap(), "swept 0\n");
    }

    #[test]
    fn run_stops_at_quit() {
        let engine = engine();
        let session = Session::new(&engine);
        let mut output = Vec::new();
        session
            .run("start Greeter\nquit\nstart Greeter\n".as_bytes(), &mut output)
            .unwrap();
        let output = String::from_utf8(output).unwrap();
        assert_eq!(output.matches("suspended").count(), 1);
        assert_eq!(engine.manager().len(), 1);
    }

    #[test]
    fn clone_of_a_plain_procedure_is_refused() {
        let engine = engine();
        let session = Session::new(&engine);
        let first = session.execute("start Greeter").unwrap();
        let id = suspended_id(&first);
        let reply = session.execute(&format!("clone {id}")).unwrap();
        assert!(reply.starts_with("error: Greeter.process does not support cloning"));
    }
}
