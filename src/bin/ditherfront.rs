//! Ditherfront CLI - Terminal front end for the dither tool
//!
//! Commands: algorithms, compile, run, interactive (default)
//! Reports go to stdout, logs to stderr
//! Returns 2 when the tool itself fails

use clap::{Args, Parser, Subcommand};
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ditherfront_core::{
    CompileRequest, DisplaySurface, DitherAlgorithm, Event, Executor, Pane, PipelineCompiler,
    Session, DEFAULT_TOOL,
};

#[derive(Parser)]
#[command(name = "ditherfront")]
#[command(about = "Ditherfront - tune dithering parameters and rerun the dither tool")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to the dither tool
    #[arg(long, env = "DITHERFRONT_TOOL", default_value = DEFAULT_TOOL, global = true)]
    tool: PathBuf,

    /// Pass -v to the dither tool
    #[arg(long, global = true)]
    verbose_tool: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List dithering algorithms (label and tool token)
    Algorithms,

    /// Print the invocation for a parameter set without running it
    Compile(ParamArgs),

    /// Compile and run the tool once
    Run(ParamArgs),

    /// Read events from stdin, one per line, rerunning the tool on every change
    Interactive {
        /// Input image
        input: Option<PathBuf>,

        /// Output image
        output: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct ParamArgs {
    /// JSON payload (CompileRequest); flags below override it
    #[arg(short, long)]
    payload: Option<String>,

    /// Input image
    #[arg(long = "in")]
    source: Option<PathBuf>,

    /// Output image
    #[arg(long = "out")]
    destination: Option<PathBuf>,

    #[arg(long, allow_hyphen_values = true)]
    gamma: Option<f64>,

    /// Bias applied before gain
    #[arg(long, allow_hyphen_values = true)]
    pre_bias: Option<i64>,

    /// Gain in percent (100 = unchanged)
    #[arg(long, allow_hyphen_values = true)]
    gain: Option<i64>,

    /// Bias applied after gain
    #[arg(long, allow_hyphen_values = true)]
    post_bias: Option<i64>,

    /// Bits per color component kept when building the palette
    #[arg(long, allow_hyphen_values = true)]
    quantize: Option<i64>,

    #[arg(long, allow_hyphen_values = true)]
    max_colors: Option<i64>,

    /// Algorithm label, e.g. "Floyd-Steinberg"
    #[arg(long = "algo")]
    algorithm: Option<String>,
}

impl ParamArgs {
    fn request(&self) -> Result<CompileRequest, serde_json::Error> {
        let mut request = match &self.payload {
            Some(payload) => serde_json::from_str(payload)?,
            None => CompileRequest::default(),
        };
        request.source = self.source.clone().or(request.source);
        request.destination = self.destination.clone().or(request.destination);
        request.gamma = self.gamma.or(request.gamma);
        request.pre_bias = self.pre_bias.or(request.pre_bias);
        request.gain_percent = self.gain.or(request.gain_percent);
        request.post_bias = self.post_bias.or(request.post_bias);
        request.quantize_bits = self.quantize.or(request.quantize_bits);
        request.max_colors = self.max_colors.or(request.max_colors);
        request.algorithm = self.algorithm.clone().or(request.algorithm);
        Ok(request)
    }
}

/// Prints pane refreshes and the last command line
struct TerminalDisplay;

impl DisplaySurface for TerminalDisplay {
    fn refresh(&mut self, pane: Pane, path: &Path) {
        let label = match pane {
            Pane::Input => "input",
            Pane::Output => "output",
        };
        println!("[{}] {}", label, path.display());
    }

    fn show_invocation(&mut self, command: &str) {
        println!("$ {}", command);
    }
}

/// Use the absolute path when the tool exists relative to the working directory
fn resolve_tool(tool: PathBuf) -> PathBuf {
    std::fs::canonicalize(&tool).unwrap_or(tool)
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ditherfront=warn,ditherfront_core=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr).without_time())
        .init();

    let cli = Cli::parse();
    let compiler = PipelineCompiler::new(resolve_tool(cli.tool)).with_verbose(cli.verbose_tool);

    match cli.command {
        Some(Commands::Algorithms) => {
            let algorithms: Vec<_> = DitherAlgorithm::ALL
                .iter()
                .map(|a| serde_json::json!({
                    "label": a.label(),
                    "token": a.token(),
                }))
                .collect();
            print_json(&serde_json::Value::from(algorithms));
            ExitCode::SUCCESS
        }

        Some(Commands::Compile(args)) => {
            let request = match args.request() {
                Ok(r) => r,
                Err(e) => return fail(format!("Invalid payload: {}", e)),
            };
            let compiled = compiler
                .compile_request(&request)
                .and_then(|inv| Ok((inv.fingerprint()?, inv)));
            match compiled {
                Ok((fingerprint, invocation)) => {
                    print_json(&serde_json::json!({
                        "success": true,
                        "command": invocation.render(),
                        "args": invocation.args(),
                        "fingerprint": fingerprint,
                    }));
                    ExitCode::SUCCESS
                }
                Err(e) => fail(e.to_string()),
            }
        }

        Some(Commands::Run(args)) => {
            let request = match args.request() {
                Ok(r) => r,
                Err(e) => return fail(format!("Invalid payload: {}", e)),
            };
            let mut session = Session::new(compiler, Executor::process(), TerminalDisplay);
            if let Err(e) = session.load(&request) {
                return fail(e.to_string());
            }
            match session.run_cycle() {
                Ok(report) => {
                    print_json(&serde_json::to_value(&report).unwrap_or_default());
                    if report.succeeded {
                        ExitCode::SUCCESS
                    } else {
                        ExitCode::from(2)
                    }
                }
                Err(e) => fail(e.to_string()),
            }
        }

        Some(Commands::Interactive { input, output }) => interactive(compiler, input, output),
        None => interactive(compiler, None, None),
    }
}

fn interactive(compiler: PipelineCompiler, input: Option<PathBuf>, output: Option<PathBuf>) -> ExitCode {
    let mut session = Session::new(compiler, Executor::process(), TerminalDisplay);

    if let Some(input) = input {
        if let Err(e) = session.handle(Event::SourcePath(input)) {
            eprintln!("error: {}", e);
        }
    }
    if let Some(output) = output {
        session.display_mut().refresh(Pane::Output, &output);
        if let Err(e) = session.handle(Event::DestinationPath(output)) {
            eprintln!("error: {}", e);
        }
    }

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                eprintln!("error: {}", e);
                return ExitCode::FAILURE;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "quit" || line == "exit" {
            break;
        }

        let event: Event = match line.parse() {
            Ok(ev) => ev,
            Err(e) => {
                eprintln!("error: {}", e);
                continue;
            }
        };

        match session.handle(event) {
            Ok(Some(report)) if !report.succeeded => {
                eprintln!("error: {}", report.error.unwrap_or_default());
            }
            Ok(_) => {}
            Err(e) => eprintln!("error: {}", e),
        }
    }

    ExitCode::SUCCESS
}

fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(e) => eprintln!(r#"{{"error": "{}"}}"#, e),
    }
}

fn fail(message: String) -> ExitCode {
    let output = serde_json::json!({
        "success": false,
        "error": message,
    });
    println!("{}", output);
    ExitCode::FAILURE
}
