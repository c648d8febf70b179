//! Process Boundary Tests
//!
//! Runs a real subprocess through the session. Unix only.

#![cfg(unix)]

use std::fs;
use std::path::{Path, PathBuf};

use ditherfront_core::{DisplaySurface, Event, Executor, Pane, PipelineCompiler, Session};

#[derive(Default)]
struct Panes {
    output: Vec<PathBuf>,
}

impl DisplaySurface for Panes {
    fn refresh(&mut self, pane: Pane, path: &Path) {
        if pane == Pane::Output {
            self.output.push(path.to_path_buf());
        }
    }

    fn show_invocation(&mut self, _command: &str) {}
}

#[test]
fn exit_zero_refreshes_output() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out.png");

    let mut session = Session::new(PipelineCompiler::new("true"), Executor::process(), Panes::default());
    session.handle(Event::SourcePath(dir.path().join("in.png"))).unwrap();
    session.handle(Event::DestinationPath(out.clone())).unwrap();

    let report = session.handle(Event::Apply).unwrap().unwrap();
    assert!(report.succeeded);
    assert_eq!(session.display().output, vec![out]);
}

#[test]
fn nonzero_exit_keeps_stale_output() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out.png");
    fs::write(&out, b"previous").unwrap();

    let mut session = Session::new(PipelineCompiler::new("false"), Executor::process(), Panes::default());
    session.handle(Event::SourcePath(dir.path().join("missing.png"))).unwrap();
    session.handle(Event::DestinationPath(out.clone())).unwrap();

    let report = session.handle(Event::Apply).unwrap().unwrap();
    assert!(!report.succeeded);
    assert!(session.display().output.is_empty());
    assert_eq!(fs::read(&out).unwrap(), b"previous");
}

#[test]
fn missing_tool_is_a_failed_cycle() {
    let mut session = Session::new(
        PipelineCompiler::new("/nonexistent/dither"),
        Executor::process(),
        Panes::default(),
    );
    session.handle(Event::SourcePath("in.png".into())).unwrap();

    let report = session.handle(Event::Apply).unwrap().unwrap();
    assert!(!report.succeeded);
    assert!(report.error.unwrap().contains("/nonexistent/dither"));

    // Still usable afterwards
    assert!(session.handle(Event::Gamma(2.0)).unwrap().is_some());
}
