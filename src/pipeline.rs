//! Pipeline Compiler - Parameter Set To Tool Invocation
//!
//! CRITICAL: the tool reads its arguments as a sequence of operations, not as
//! a flat option set. Stage order below is load-bearing:
//!
//! 1. load source, preprocess (gamma, bias, gain, bias)
//! 2. quantize, reduce colors, make reference palette
//! 3. reload source, replay the identical preprocessing
//! 4. select algorithm, dither against the palette from 2
//! 5. write destination

use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::algorithm::{DitherAlgorithm, UnknownAlgorithm};
use crate::hashing::fingerprint;
use crate::params::{ParameterSet, ParameterStore};

#[cfg(feature = "test-hooks")]
use std::sync::atomic::{AtomicU32, Ordering};

#[cfg(feature = "test-hooks")]
static COMPILE_CALL_COUNT: AtomicU32 = AtomicU32::new(0);

#[cfg(feature = "test-hooks")]
pub fn get_compile_call_count() -> u32 {
    COMPILE_CALL_COUNT.load(Ordering::SeqCst)
}

#[cfg(feature = "test-hooks")]
pub fn reset_compile_call_count() {
    COMPILE_CALL_COUNT.store(0, Ordering::SeqCst);
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Unknown algorithm label: {0}")]
    UnknownAlgorithm(String),

    #[error("No source image selected")]
    MissingSource,

    #[error("No destination image selected")]
    MissingDestination,

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl From<UnknownAlgorithm> for PipelineError {
    fn from(e: UnknownAlgorithm) -> Self {
        PipelineError::UnknownAlgorithm(e.0)
    }
}

/// One operation of the tool's argument program
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "stage", content = "value", rename_all = "snake_case")]
pub enum Stage {
    Load(PathBuf),
    Gamma(f64),
    Bias(i32),
    Gain(f64),
    Quantize(u8),
    ReduceColors(u16),
    MakePalette,
    Reload,
    Algorithm(DitherAlgorithm),
    Dither,
    Output(PathBuf),
}

impl Stage {
    pub fn flag(&self) -> &'static str {
        match self {
            Stage::Load(_) => "-in",
            Stage::Gamma(_) => "-gamma",
            Stage::Bias(_) => "-bias",
            Stage::Gain(_) => "-gain",
            Stage::Quantize(_) => "-quantize",
            Stage::ReduceColors(_) => "-reducecolors",
            Stage::MakePalette => "-makepal",
            Stage::Reload => "-reload",
            Stage::Algorithm(_) => "-algo",
            Stage::Dither => "-dither",
            Stage::Output(_) => "-out",
        }
    }

    /// Arguments following the flag (zero or one for every stage the tool knows)
    pub fn arguments(&self) -> Vec<OsString> {
        match self {
            Stage::Load(path) | Stage::Output(path) => vec![path.clone().into_os_string()],
            Stage::Gamma(v) | Stage::Gain(v) => vec![format_real(*v).into()],
            Stage::Bias(v) => vec![v.to_string().into()],
            Stage::Quantize(v) => vec![v.to_string().into()],
            Stage::ReduceColors(v) => vec![v.to_string().into()],
            Stage::Algorithm(algo) => vec![algo.token().into()],
            Stage::MakePalette | Stage::Reload | Stage::Dither => vec![],
        }
    }

    fn is_preprocessing(&self) -> bool {
        matches!(self, Stage::Gamma(_) | Stage::Bias(_) | Stage::Gain(_))
    }
}

/// Shortest decimal that round-trips, always with a fractional part ("2.5", "0.0")
fn format_real(value: f64) -> String {
    format!("{:?}", value)
}

/// Fully resolved, ordered tool invocation. Never mutated after compilation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledInvocation {
    tool: PathBuf,
    verbose: bool,
    stages: Vec<Stage>,
}

impl CompiledInvocation {
    pub fn tool(&self) -> &Path {
        &self.tool
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Argument vector handed to the process (tool path excluded)
    pub fn args_os(&self) -> Vec<OsString> {
        let mut args = Vec::with_capacity(self.stages.len() * 2 + 1);
        if self.verbose {
            args.push(OsString::from("-v"));
        }
        for stage in &self.stages {
            args.push(OsString::from(stage.flag()));
            args.extend(stage.arguments());
        }
        args
    }

    pub fn args(&self) -> Vec<String> {
        self.args_os()
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    pub fn flags(&self) -> Vec<&'static str> {
        self.stages.iter().map(Stage::flag).collect()
    }

    /// Pass-1 and pass-2 preprocessing blocks (the stages after `-in` and after `-reload`)
    pub fn preprocessing(&self) -> (&[Stage], &[Stage]) {
        (
            self.block_after(|s| matches!(s, Stage::Load(_))),
            self.block_after(|s| matches!(s, Stage::Reload)),
        )
    }

    fn block_after(&self, start: impl Fn(&Stage) -> bool) -> &[Stage] {
        let Some(begin) = self.stages.iter().position(start).map(|i| i + 1) else {
            return &[];
        };
        let len = self.stages[begin..]
            .iter()
            .take_while(|s| s.is_preprocessing())
            .count();
        &self.stages[begin..begin + len]
    }

    /// Human-readable command line for the preview surface
    pub fn render(&self) -> String {
        std::iter::once(self.tool.to_string_lossy().into_owned())
            .chain(self.args())
            .map(|a| quote_arg(&a))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// sha256 over the canonical tool + argument vector
    pub fn fingerprint(&self) -> Result<String, PipelineError> {
        #[derive(Serialize)]
        struct Argv<'a> {
            tool: std::borrow::Cow<'a, str>,
            args: Vec<String>,
        }

        Ok(fingerprint(&Argv {
            tool: self.tool.to_string_lossy(),
            args: self.args(),
        })?)
    }
}

impl fmt::Display for CompiledInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

fn quote_arg(arg: &str) -> String {
    if arg.is_empty() || arg.chars().any(char::is_whitespace) {
        format!("\"{}\"", arg.replace('"', "\\\""))
    } else {
        arg.to_string()
    }
}

/// JSON payload form of a parameter set. The algorithm is given by label.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompileRequest {
    #[serde(default)]
    pub source: Option<PathBuf>,
    #[serde(default)]
    pub destination: Option<PathBuf>,
    #[serde(default)]
    pub gamma: Option<f64>,
    #[serde(default)]
    pub pre_bias: Option<i64>,
    #[serde(default)]
    pub gain_percent: Option<i64>,
    #[serde(default)]
    pub post_bias: Option<i64>,
    #[serde(default)]
    pub quantize_bits: Option<i64>,
    #[serde(default)]
    pub max_colors: Option<i64>,
    #[serde(default)]
    pub algorithm: Option<String>,
}

impl CompileRequest {
    /// Write every given value through the store's clamping
    pub fn apply_to(&self, store: &mut ParameterStore) -> Result<(), PipelineError> {
        if let Some(path) = &self.source {
            store.set_source(path);
        }
        if let Some(path) = &self.destination {
            store.set_destination(path);
        }
        if let Some(v) = self.gamma {
            store.set_gamma(v);
        }
        if let Some(v) = self.pre_bias {
            store.set_pre_bias(v);
        }
        if let Some(v) = self.gain_percent {
            store.set_gain_percent(v);
        }
        if let Some(v) = self.post_bias {
            store.set_post_bias(v);
        }
        if let Some(v) = self.quantize_bits {
            store.set_quantize_bits(v);
        }
        if let Some(v) = self.max_colors {
            store.set_max_colors(v);
        }
        if let Some(label) = &self.algorithm {
            store.set_algorithm(DitherAlgorithm::from_label(label)?);
        }
        Ok(())
    }
}

/// Turns parameter sets into invocations of one tool
#[derive(Debug, Clone)]
pub struct PipelineCompiler {
    tool: PathBuf,
    verbose: bool,
}

impl PipelineCompiler {
    pub fn new(tool: impl Into<PathBuf>) -> Self {
        Self { tool: tool.into(), verbose: false }
    }

    /// Pass `-v` to the tool ahead of the stage program
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn tool(&self) -> &Path {
        &self.tool
    }

    /// Compile a parameter set.
    ///
    /// Pure: no I/O, same input gives a byte-identical invocation.
    pub fn compile(&self, params: &ParameterSet) -> Result<CompiledInvocation, PipelineError> {
        #[cfg(feature = "test-hooks")]
        COMPILE_CALL_COUNT.fetch_add(1, Ordering::SeqCst);

        let source = params.source().ok_or(PipelineError::MissingSource)?;
        if params.destination().as_os_str().is_empty() {
            return Err(PipelineError::MissingDestination);
        }

        // Built once and emitted twice so both passes cannot diverge.
        let preprocess = [
            Stage::Gamma(params.gamma()),
            Stage::Bias(params.pre_bias()),
            Stage::Gain(params.gain()),
            Stage::Bias(params.post_bias()),
        ];

        let mut stages = Vec::with_capacity(16);
        stages.push(Stage::Load(source.to_path_buf()));
        stages.extend(preprocess.iter().cloned());
        stages.push(Stage::Quantize(params.quantize_bits()));
        stages.push(Stage::ReduceColors(params.max_colors()));
        stages.push(Stage::MakePalette);
        stages.push(Stage::Reload);
        stages.extend(preprocess);
        stages.push(Stage::Algorithm(params.algorithm()));
        stages.push(Stage::Dither);
        stages.push(Stage::Output(params.destination().to_path_buf()));

        Ok(CompiledInvocation {
            tool: self.tool.clone(),
            verbose: self.verbose,
            stages,
        })
    }

    /// Compile a JSON-style request on top of the default parameter set
    pub fn compile_request(&self, request: &CompileRequest) -> Result<CompiledInvocation, PipelineError> {
        let mut store = ParameterStore::new();
        request.apply_to(&mut store)?;
        self.compile(&store.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ParameterSet {
        let mut store = ParameterStore::new();
        store.set_source("in.png");
        store.set_destination("out.png");
        store.snapshot()
    }

    #[rustfmt::skip]
    #[test]
    fn test_full_argument_vector() {
        let invocation = PipelineCompiler::new("dither").compile(&sample()).unwrap();
        assert_eq!(
            invocation.args(),
            vec![
                "-in", "in.png",
                "-gamma", "1.0", "-bias", "0", "-gain", "1.0", "-bias", "0",
                "-quantize", "4", "-reducecolors", "255", "-makepal",
                "-reload",
                "-gamma", "1.0", "-bias", "0", "-gain", "1.0", "-bias", "0",
                "-algo", "fs", "-dither",
                "-out", "out.png",
            ]
        );
    }

    #[test]
    fn test_verbose_flag_leads() {
        let invocation = PipelineCompiler::new("dither")
            .with_verbose(true)
            .compile(&sample())
            .unwrap();
        assert_eq!(invocation.args()[0], "-v");
        assert_eq!(invocation.args()[1], "-in");
        // Stages are unchanged
        assert_eq!(invocation.flags()[0], "-in");
    }

    #[test]
    fn test_missing_source() {
        let params = ParameterStore::new().snapshot();
        let err = PipelineCompiler::new("dither").compile(&params).unwrap_err();
        assert!(matches!(err, PipelineError::MissingSource));
    }

    #[test]
    fn test_missing_destination() {
        let mut store = ParameterStore::new();
        store.set_source("in.png");
        store.set_destination("");
        let err = PipelineCompiler::new("dither").compile(&store.snapshot()).unwrap_err();
        assert!(matches!(err, PipelineError::MissingDestination));
    }

    #[test]
    fn test_gain_text() {
        let compiler = PipelineCompiler::new("dither");
        for (percent, text) in [(250, "2.5"), (0, "0.0"), (100, "1.0"), (1500, "15.0"), (1, "0.01")] {
            let mut store = ParameterStore::new();
            store.set_source("in.png");
            store.set_gain_percent(percent);
            let invocation = compiler.compile(&store.snapshot()).unwrap();
            let gains: Vec<_> = invocation
                .stages()
                .iter()
                .filter_map(|s| match s {
                    Stage::Gain(_) => Some(s.arguments()[0].clone()),
                    _ => None,
                })
                .collect();
            assert_eq!(gains, vec![OsString::from(text), OsString::from(text)]);
        }
    }

    #[test]
    fn test_render_quotes_whitespace() {
        let mut store = ParameterStore::new();
        store.set_source("my scans/in.png");
        store.set_destination("out.png");
        let invocation = PipelineCompiler::new("/opt/dither").compile(&store.snapshot()).unwrap();
        let text = invocation.render();
        assert!(text.starts_with("/opt/dither -in \"my scans/in.png\" -gamma 1.0"));
        assert!(text.ends_with("-algo fs -dither -out out.png"));
        assert_eq!(invocation.to_string(), text);
    }

    #[test]
    fn test_preprocessing_blocks() {
        let mut store = ParameterStore::new();
        store.set_source("in.png");
        store.set_gamma(2.2);
        store.set_pre_bias(-12);
        store.set_gain_percent(175);
        store.set_post_bias(40);
        let invocation = PipelineCompiler::new("dither").compile(&store.snapshot()).unwrap();
        let (first, second) = invocation.preprocessing();
        assert_eq!(first.len(), 4);
        assert_eq!(first, second);
        assert_eq!(
            first,
            &[Stage::Gamma(2.2), Stage::Bias(-12), Stage::Gain(1.75), Stage::Bias(40)]
        );
    }

    #[test]
    fn test_compile_request_unknown_label() {
        let request = CompileRequest {
            source: Some("in.png".into()),
            algorithm: Some("Ordered 4x4".into()),
            ..Default::default()
        };
        let err = PipelineCompiler::new("dither").compile_request(&request).unwrap_err();
        assert!(matches!(err, PipelineError::UnknownAlgorithm(ref l) if l == "Ordered 4x4"));
    }

    #[test]
    fn test_compile_request_clamps() {
        let request: CompileRequest = serde_json::from_str(
            r#"{"source": "in.png", "max_colors": 0, "quantize_bits": 9, "gamma": -1, "algorithm": "None"}"#,
        )
        .unwrap();
        let invocation = PipelineCompiler::new("dither").compile_request(&request).unwrap();
        let args = invocation.args();
        let after = |flag: &str| {
            let i = args.iter().position(|a| a == flag).unwrap();
            args[i + 1].clone()
        };
        assert_eq!(after("-reducecolors"), "1");
        assert_eq!(after("-quantize"), "8");
        assert_eq!(after("-gamma"), "0.0");
        assert_eq!(after("-algo"), "nop");
    }

    #[test]
    fn test_fingerprint_tracks_arguments() {
        let compiler = PipelineCompiler::new("dither");
        let a = compiler.compile(&sample()).unwrap();
        let mut store = ParameterStore::new();
        store.set_source("in.png");
        store.set_destination("out.png");
        store.set_post_bias(1);
        let b = compiler.compile(&store.snapshot()).unwrap();
        assert_eq!(a.fingerprint().unwrap(), compiler.compile(&sample()).unwrap().fingerprint().unwrap());
        assert_ne!(a.fingerprint().unwrap(), b.fingerprint().unwrap());
    }
}
