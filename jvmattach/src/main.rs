use std::path::PathBuf;
use std::process;
use std::time::Duration;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use jvmattach::{AttachConfig, VirtualMachine};

struct Opts {
    pid: i32,
    agent: String,
    timeout_ms: Option<u64>,
    tmp_root: Option<PathBuf>,
}

fn main() {
    let args: Vec<String> = std::env::args().collect();

    let opts = match parse_args(&args) {
        Ok(v) => v,
        Err(msg) => {
            if !msg.is_empty() {
                eprintln!("error: {msg}");
                eprintln!();
            }
            eprintln!("Usage: jvmattach <pid> <agent-jar[=options]> [options]");
            eprintln!();
            eprintln!("Arguments:");
            eprintln!("  <pid>                    Target JVM process id");
            eprintln!("  <agent-jar[=options]>    Agent jar path, optionally with agent options");
            eprintln!();
            eprintln!("Options:");
            eprintln!("  --timeout-ms <ms>    Handshake timeout ceiling [default: 5000]");
            eprintln!("  --tmp-root <dir>     Attach file directory [default: system temp dir]");
            process::exit(2);
        }
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(opts) {
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}

fn parse_args(args: &[String]) -> Result<Opts, String> {
    let mut pid: Option<i32> = None;
    let mut agent: Option<String> = None;
    let mut timeout_ms: Option<u64> = None;
    let mut tmp_root: Option<PathBuf> = None;

    let mut i = 1; // skip argv[0]
    while i < args.len() {
        match args[i].as_str() {
            "--timeout-ms" => {
                i += 1;
                let value = args.get(i).ok_or("--timeout-ms requires a value")?;
                timeout_ms = Some(
                    value
                        .parse()
                        .map_err(|_| format!("invalid timeout: {value}"))?,
                );
            }
            "--tmp-root" => {
                i += 1;
                tmp_root = Some(PathBuf::from(
                    args.get(i).ok_or("--tmp-root requires a value")?,
                ));
            }
            "--help" | "-h" => return Err(String::new()),
            arg if arg.starts_with('-') => return Err(format!("unknown flag: {arg}")),
            arg if pid.is_none() => {
                pid = Some(arg.parse().map_err(|_| format!("invalid pid: {arg}"))?);
            }
            arg if agent.is_none() => {
                agent = Some(arg.to_string());
            }
            arg => return Err(format!("unexpected argument: {arg}")),
        }
        i += 1;
    }

    let pid = pid.ok_or("missing required argument: <pid>")?;
    let agent = agent.ok_or("missing required argument: <agent-jar[=options]>")?;
    Ok(Opts {
        pid,
        agent,
        timeout_ms,
        tmp_root,
    })
}

fn run(opts: Opts) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start runtime")?;

    runtime.block_on(async {
        let mut config = AttachConfig::new();
        if let Some(ms) = opts.timeout_ms {
            config = config.with_timeout(Duration::from_millis(ms));
        }
        if let Some(root) = opts.tmp_root {
            config = config.with_tmp_root(root);
        }

        let vm = VirtualMachine::with_config(opts.pid, config);
        vm.attach()
            .await
            .with_context(|| format!("failed to attach to process {}", opts.pid))?;
        vm.load_agent(&opts.agent)
            .await
            .with_context(|| format!("failed to load agent {}", opts.agent))?;
        vm.detach();

        println!("agent loaded into process {}", opts.pid);
        Ok(())
    })
}
