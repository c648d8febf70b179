//! Interactive Session - Event Dispatch And Compile/Execute Cycles
//!
//! One event at a time. Every slider, spinner or selector change and every
//! explicit apply runs a full cycle synchronously:
//! snapshot -> compile -> preview -> execute -> refresh output.
//! Path edits only take effect on the next cycle.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use crate::executor::{Executor, ProcessRunner, ToolRunner};
use crate::params::{real_to_int, Field, FieldValue, ParameterStore, StoreError};
use crate::pipeline::{CompileRequest, PipelineCompiler, PipelineError};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Compilation failed: {0}")]
    Compile(#[from] PipelineError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventParseError {
    #[error("Empty command")]
    Empty,

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("{0} needs an argument")]
    MissingArgument(&'static str),

    #[error("{0} takes no argument")]
    UnexpectedArgument(&'static str),

    #[error("Invalid number for {command}: {value}")]
    InvalidNumber { command: &'static str, value: String },
}

/// Closed set of things the front end can report
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    SourcePath(PathBuf),
    DestinationPath(PathBuf),
    Gamma(f64),
    PreBias(i64),
    GainPercent(i64),
    PostBias(i64),
    QuantizeBits(i64),
    MaxColors(i64),
    /// Selector label, not tool token
    Algorithm(String),
    Apply,
}

impl Event {
    /// Field written by this event, with its value
    fn update(&self) -> Option<(Field, FieldValue)> {
        Some(match self {
            Event::SourcePath(p) => (Field::Source, FieldValue::Path(p.clone())),
            Event::DestinationPath(p) => (Field::Destination, FieldValue::Path(p.clone())),
            Event::Gamma(v) => (Field::Gamma, FieldValue::Real(*v)),
            Event::PreBias(v) => (Field::PreBias, FieldValue::Int(*v)),
            Event::GainPercent(v) => (Field::GainPercent, FieldValue::Int(*v)),
            Event::PostBias(v) => (Field::PostBias, FieldValue::Int(*v)),
            Event::QuantizeBits(v) => (Field::QuantizeBits, FieldValue::Int(*v)),
            Event::MaxColors(v) => (Field::MaxColors, FieldValue::Int(*v)),
            Event::Algorithm(label) => (Field::Algorithm, FieldValue::Label(label.clone())),
            Event::Apply => return None,
        })
    }
}

impl FromStr for Event {
    type Err = EventParseError;

    /// `<command> [argument]`, e.g. `gain 250`, `algo Floyd-Steinberg`, `in scan.png`
    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        if line.is_empty() {
            return Err(EventParseError::Empty);
        }
        let (command, arg) = match line.split_once(char::is_whitespace) {
            Some((c, rest)) => (c, rest.trim()),
            None => (line, ""),
        };

        match command.to_ascii_lowercase().as_str() {
            "in" => Ok(Event::SourcePath(required("in", arg)?.into())),
            "out" => Ok(Event::DestinationPath(required("out", arg)?.into())),
            "gamma" => Ok(Event::Gamma(number("gamma", arg)?)),
            "prebias" => Ok(Event::PreBias(integer("prebias", arg)?)),
            "gain" => Ok(Event::GainPercent(integer("gain", arg)?)),
            "postbias" => Ok(Event::PostBias(integer("postbias", arg)?)),
            "quantize" => Ok(Event::QuantizeBits(integer("quantize", arg)?)),
            "maxcolors" => Ok(Event::MaxColors(integer("maxcolors", arg)?)),
            "algo" => Ok(Event::Algorithm(required("algo", arg)?.to_string())),
            "apply" if arg.is_empty() => Ok(Event::Apply),
            "apply" => Err(EventParseError::UnexpectedArgument("apply")),
            _ => Err(EventParseError::UnknownCommand(command.to_string())),
        }
    }
}

fn required<'a>(command: &'static str, arg: &'a str) -> Result<&'a str, EventParseError> {
    if arg.is_empty() {
        Err(EventParseError::MissingArgument(command))
    } else {
        Ok(arg)
    }
}

fn number(command: &'static str, arg: &str) -> Result<f64, EventParseError> {
    required(command, arg)?
        .parse()
        .map_err(|_| EventParseError::InvalidNumber { command, value: arg.to_string() })
}

/// Integers also accept a fractional form ("12.0"), as slider widgets report them.
/// Fractions round the same way the store rounds real input.
fn integer(command: &'static str, arg: &str) -> Result<i64, EventParseError> {
    let arg = required(command, arg)?;
    arg.parse::<i64>()
        .or_else(|_| arg.parse::<f64>().map(real_to_int))
        .map_err(|_| EventParseError::InvalidNumber { command, value: arg.to_string() })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pane {
    Input,
    Output,
}

/// Where images and the last command line are shown
pub trait DisplaySurface {
    /// Load and show the image at `path`
    fn refresh(&mut self, pane: Pane, path: &Path);

    /// Read-only preview of the most recently compiled invocation
    fn show_invocation(&mut self, command: &str);
}

/// Outcome of one compile/execute cycle
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub fingerprint: String,
    pub command: String,
    pub succeeded: bool,
    pub error: Option<String>,
}

pub struct Session<D: DisplaySurface, R: ToolRunner = ProcessRunner> {
    store: ParameterStore,
    compiler: PipelineCompiler,
    executor: Executor<R>,
    display: D,
}

impl<D: DisplaySurface, R: ToolRunner> Session<D, R> {
    pub fn new(compiler: PipelineCompiler, executor: Executor<R>, display: D) -> Self {
        Self {
            store: ParameterStore::new(),
            compiler,
            executor,
            display,
        }
    }

    pub fn store(&self) -> &ParameterStore {
        &self.store
    }

    pub fn display(&self) -> &D {
        &self.display
    }

    pub fn display_mut(&mut self) -> &mut D {
        &mut self.display
    }

    pub fn executor(&self) -> &Executor<R> {
        &self.executor
    }

    /// Write a whole request through the store without running a cycle
    pub fn load(&mut self, request: &CompileRequest) -> Result<(), SessionError> {
        request.apply_to(&mut self.store)?;
        if let Some(source) = self.store.snapshot().source() {
            self.display.refresh(Pane::Input, source);
        }
        Ok(())
    }

    /// Handle one event. Returns the cycle report when the event ran a cycle.
    ///
    /// Errors abort the current operation only; the session stays usable.
    pub fn handle(&mut self, event: Event) -> Result<Option<CycleReport>, SessionError> {
        tracing::debug!(?event, "Handling event");

        let Some((field, value)) = event.update() else {
            return self.run_cycle().map(Some);
        };

        let applied = self.store.set(field, value)?;
        if field == Field::Source {
            match &applied.value {
                FieldValue::Path(path) if !path.as_os_str().is_empty() => {
                    self.display.refresh(Pane::Input, path);
                }
                _ => {}
            }
        }

        if field.triggers_cycle() {
            self.run_cycle().map(Some)
        } else {
            Ok(None)
        }
    }

    /// Compile the current snapshot and run it.
    ///
    /// A compile error returns before anything is executed. A tool failure is
    /// reported, not returned as an error, and leaves no state behind.
    pub fn run_cycle(&mut self) -> Result<CycleReport, SessionError> {
        let params = self.store.snapshot();
        let invocation = self.compiler.compile(&params)?;
        let command = invocation.render();
        let fingerprint = invocation.fingerprint()?;

        let id = Uuid::new_v4();
        let started_at = Utc::now();
        tracing::info!(cycle = %id, fingerprint = %&fingerprint[..12], "Compiled invocation");

        self.display.show_invocation(&command);
        let outcome = self.executor.execute(&invocation);

        if outcome.is_ok() {
            self.display.refresh(Pane::Output, params.destination());
        }

        Ok(CycleReport {
            id,
            started_at,
            fingerprint,
            command,
            succeeded: outcome.is_ok(),
            error: outcome.err().map(|e| e.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_events() {
        assert_eq!("gamma 1.25".parse::<Event>(), Ok(Event::Gamma(1.25)));
        assert_eq!("prebias -40".parse::<Event>(), Ok(Event::PreBias(-40)));
        assert_eq!("gain 250".parse::<Event>(), Ok(Event::GainPercent(250)));
        assert_eq!("postbias 12.0".parse::<Event>(), Ok(Event::PostBias(12)));
        assert_eq!("QUANTIZE 5".parse::<Event>(), Ok(Event::QuantizeBits(5)));
        assert_eq!("maxcolors 16".parse::<Event>(), Ok(Event::MaxColors(16)));
        assert_eq!("apply".parse::<Event>(), Ok(Event::Apply));
        assert_eq!(
            "algo Diffuse large errors only".parse::<Event>(),
            Ok(Event::Algorithm("Diffuse large errors only".into()))
        );
        assert_eq!(
            "in  my scans/photo.png ".parse::<Event>(),
            Ok(Event::SourcePath("my scans/photo.png".into()))
        );
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!("".parse::<Event>(), Err(EventParseError::Empty));
        assert_eq!("gamma".parse::<Event>(), Err(EventParseError::MissingArgument("gamma")));
        assert_eq!(
            "gain lots".parse::<Event>(),
            Err(EventParseError::InvalidNumber { command: "gain", value: "lots".into() })
        );
        assert_eq!("apply now".parse::<Event>(), Err(EventParseError::UnexpectedArgument("apply")));
        assert!(matches!("sharpen 2".parse::<Event>(), Err(EventParseError::UnknownCommand(_))));
    }

    #[test]
    fn test_event_updates() {
        assert_eq!(Event::Apply.update(), None);
        assert_eq!(
            Event::MaxColors(0).update(),
            Some((Field::MaxColors, FieldValue::Int(0)))
        );
    }

    #[test]
    fn test_fractional_integers_match_store_rounding() {
        for text in ["NaN", "inf", "-inf", "12.5", "-3.4"] {
            let value: f64 = text.parse().unwrap();
            let mut direct = ParameterStore::new();
            direct.set(Field::PreBias, FieldValue::Real(value)).unwrap();

            let event = format!("prebias {}", text).parse::<Event>().unwrap();
            let (field, parsed) = event.update().unwrap();
            let mut via_event = ParameterStore::new();
            via_event.set(field, parsed).unwrap();

            assert_eq!(via_event.snapshot(), direct.snapshot(), "input {}", text);
        }
        assert_eq!("prebias NaN".parse::<Event>(), Ok(Event::PreBias(i64::MIN)));
    }
}
