use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use diode_container::{remove_by_name_prefix, ContainerRuntime, DockerCli};
use diode_core::{remove_files, AGENT_FILE_NAME_PREFIX, AGENT_FILE_SUFFIX};
use diode_harness::{catalog, total_duration, Harness, ScenarioReport, TestConfig, DEFAULT_CONFIG_PATH};
use diode_stub::StubRuntime;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::atomic::Ordering;

const CONFIG_ENV: &str = "DIODE_IT_CONFIG";
const STUB_API_URL: &str = "http://127.0.0.1";

#[derive(Parser)]
#[command(name = "diode-it", version = "0.3.0", about = "diode agent integration tests")]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum RuntimeArg {
    Docker,
    /// In-process agents, no container runtime needed.
    Stub,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "List the built-in scenarios and their steps")]
    List {
        #[arg(long)]
        json: bool,
    },
    #[command(about = "Run built-in scenarios against the agent")]
    Run {
        #[arg(long)]
        config: Option<PathBuf>,
        /// Only run scenarios whose label contains this text.
        #[arg(long)]
        scenario: Option<String>,
        #[arg(long, value_enum, default_value_t = RuntimeArg::Docker)]
        runtime: RuntimeArg,
        #[arg(long)]
        json: bool,
    },
    #[command(about = "Remove generated agent config files and test containers")]
    Cleanup {
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long, value_enum, default_value_t = RuntimeArg::Docker)]
        runtime: RuntimeArg,
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let json_mode = command_json_mode(&cli.command);
    match run_command(cli.command) {
        Ok(Outcome { payload, ok }) => {
            if let Some(payload) = payload {
                emit_json(&payload);
            }
            if !ok {
                std::process::exit(1);
            }
            Ok(())
        }
        Err(err) => {
            if json_mode {
                emit_json(&json_error("command_failed", format!("{:#}", err), json!({})));
                std::process::exit(1);
            }
            Err(err)
        }
    }
}

struct Outcome {
    payload: Option<Value>,
    ok: bool,
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run_command(command: Commands) -> Result<Outcome> {
    match command {
        Commands::List { json } => {
            let scenarios = catalog::builtin()?;
            if json {
                let listed: Vec<Value> = scenarios
                    .iter()
                    .map(|s| {
                        json!({
                            "scenario": s.label,
                            "steps": s.steps.iter().map(ToString::to_string).collect::<Vec<_>>(),
                        })
                    })
                    .collect();
                return Ok(Outcome {
                    payload: Some(json!({ "ok": true, "command": "list", "scenarios": listed })),
                    ok: true,
                });
            }
            for scenario in &scenarios {
                println!("{}", scenario.label);
                for step in &scenario.steps {
                    println!("  {}", step);
                }
            }
            Ok(Outcome { payload: None, ok: true })
        }
        Commands::Run {
            config,
            scenario,
            runtime,
            json,
        } => {
            let mut config = load_config(config)?;
            if matches!(runtime, RuntimeArg::Stub) {
                config.agent_api_url = STUB_API_URL.to_string();
            }
            let scenarios = catalog::select(scenario.as_deref())?;
            let harness = Harness::new(config, make_runtime(runtime))?;

            let interrupted = harness.interrupt_flag();
            ctrlc::set_handler(move || {
                tracing::warn!("interrupt received, stopping after the current step");
                interrupted.store(true, Ordering::SeqCst);
            })?;

            let reports = harness.run_all(&scenarios);
            let ok = reports.iter().all(ScenarioReport::passed) && reports.len() == scenarios.len();
            if json {
                return Ok(Outcome {
                    payload: Some(json!({
                        "ok": ok,
                        "command": "run",
                        "scenarios": reports,
                        "duration_ms": total_duration(&reports).as_millis() as u64,
                    })),
                    ok,
                });
            }
            print_reports(&reports);
            Ok(Outcome { payload: None, ok })
        }
        Commands::Cleanup {
            config,
            runtime,
            json,
        } => {
            let config = load_config(config)?;
            let files = remove_files(AGENT_FILE_NAME_PREFIX, AGENT_FILE_SUFFIX, &config.local_path)?;
            let runtime = make_runtime(runtime);
            let containers = remove_by_name_prefix(runtime.as_ref(), AGENT_FILE_NAME_PREFIX)?;
            if json {
                return Ok(Outcome {
                    payload: Some(json!({
                        "ok": true,
                        "command": "cleanup",
                        "removed_files": files,
                        "removed_containers": containers,
                    })),
                    ok: true,
                });
            }
            println!(
                "removed {} config files and {} containers",
                files,
                containers.len()
            );
            Ok(Outcome { payload: None, ok: true })
        }
    }
}

fn load_config(path: Option<PathBuf>) -> Result<TestConfig> {
    let path = path
        .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    TestConfig::load(&path)
}

fn make_runtime(runtime: RuntimeArg) -> Box<dyn ContainerRuntime> {
    match runtime {
        RuntimeArg::Docker => Box::new(DockerCli::new()),
        RuntimeArg::Stub => Box::new(StubRuntime::new()),
    }
}

fn print_reports(reports: &[ScenarioReport]) {
    for report in reports {
        let verdict = match report.status {
            diode_harness::ScenarioStatus::Passed => "PASS",
            diode_harness::ScenarioStatus::Failed => "FAIL",
            diode_harness::ScenarioStatus::Interrupted => "STOP",
        };
        println!("{} {} ({} ms)", verdict, report.scenario, report.duration_ms);
        for step in report.steps.iter().filter(|s| !s.passed) {
            println!("  step: {}", step.step);
            if let Some(error) = &step.error {
                println!("  error: {}", error);
            }
        }
        if !report.kept_containers.is_empty() {
            println!("  kept containers: {}", report.kept_containers.join(", "));
        }
    }
    let passed = reports.iter().filter(|r| r.passed()).count();
    println!(
        "{} passed, {} not passed, {:.1}s",
        passed,
        reports.len() - passed,
        total_duration(reports).as_secs_f64()
    );
}

fn emit_json(value: &Value) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!(
            "{{\"ok\":false,\"error\":{{\"code\":\"serialization_error\",\"message\":\"failed to serialize JSON payload\",\"details\":{{}}}}}}"
        ),
    }
}

fn json_error(code: &str, message: String, details: Value) -> Value {
    json!({
        "ok": false,
        "error": {
            "code": code,
            "message": message,
            "details": details
        }
    })
}

fn command_json_mode(command: &Commands) -> bool {
    match command {
        Commands::List { json } => *json,
        Commands::Run { json, .. } => *json,
        Commands::Cleanup { json, .. } => *json,
    }
}
