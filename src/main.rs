use anyhow::{Context, Result, anyhow, bail};
use argh::FromArgs;
use process_primitives::{
    Argv, Bindings, Config, Export, ExportStyle, ReadOutcome, Value, spawn_with, wait_pid,
};
use std::io::{Read, Write};
use std::thread;
use tracing_subscriber::EnvFilter;

#[derive(FromArgs)]
/// Run the process primitives the way a script host would.
struct Cli {
    #[argh(switch, short = 'v')]
    /// log lifecycle events to stderr (RUST_LOG overrides this)
    verbose: bool,

    #[argh(option, default = "4096")]
    /// bytes per read call
    chunk: usize,

    #[argh(subcommand)]
    command: Subcommand,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Subcommand {
    Cwd(Cwd),
    Pipe(Pipe),
    Spawn(Spawn),
    Exit(Exit),
    Exports(Exports),
}

#[derive(FromArgs)]
#[argh(subcommand, name = "cwd")]
/// print the current working directory
struct Cwd {}

#[derive(FromArgs)]
#[argh(subcommand, name = "pipe")]
/// run a command through /bin/sh with one end piped
struct Pipe {
    #[argh(positional)]
    /// shell command line
    command: String,

    #[argh(option, short = 'm', default = "String::from(\"r\")")]
    /// mode: "r" copies the command's output to stdout, "w" feeds stdin to the command
    mode: String,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "spawn")]
/// spawn a program with its standard streams piped
struct Spawn {
    #[argh(positional, greedy)]
    /// program followed by its arguments
    argv: Vec<String>,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "exit")]
/// exit immediately with the given code
struct Exit {
    #[argh(positional)]
    /// exit code, 0 when omitted
    code: Option<i64>,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "exports")]
/// list what a runtime would install
struct Exports {
    #[argh(option, default = "String::from(\"module\")")]
    /// export style: "global" or "module"
    style: String,
}

fn main() {
    let cli: Cli = argh::from_env();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("procprim: {e:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<i32> {
    let config = Config::default().with_read_chunk(cli.chunk);
    match cli.command {
        Subcommand::Cwd(_) => {
            let mut bindings = Bindings::with_config(ExportStyle::Module, config);
            let cwd = bindings.call("currentDirectory", &[])?;
            println!("{}", cwd.as_str().unwrap_or_default());
            Ok(0)
        }
        Subcommand::Exit(Exit { code }) => {
            let mut bindings = Bindings::with_config(ExportStyle::Module, config);
            let args: Vec<Value> = code.map(Value::Int).into_iter().collect();
            bindings.call("exit", &args)?;
            bail!("exit returned without terminating the process")
        }
        Subcommand::Pipe(args) => run_pipe(config, args),
        Subcommand::Spawn(args) => run_spawn(config, args),
        Subcommand::Exports(Exports { style }) => {
            let style = match style.as_str() {
                "global" => ExportStyle::Global,
                "module" => ExportStyle::Module,
                other => bail!("unknown export style {other:?}"),
            };
            for export in Bindings::with_config(style, config).exports() {
                match export {
                    Export::Function(name) => println!("function {name}"),
                    Export::Constructor(name) => println!("constructor {name}"),
                    Export::Value(name, value) => println!("value {name} = {value:?}"),
                }
            }
            Ok(0)
        }
    }
}

fn run_pipe(config: Config, Pipe { command, mode }: Pipe) -> Result<i32> {
    let chunk = config.read_chunk;
    let mut bindings = Bindings::with_config(ExportStyle::Global, config);
    let pipe = bindings
        .construct("Pipe", &[Value::Str(command), Value::Str(mode.clone())])?
        .as_handle()
        .context("Pipe did not return an object")?;

    if mode == "r" {
        let mut stdout = std::io::stdout().lock();
        while let Value::Bytes(data) = bindings.call_method(pipe, "read", &[])? {
            stdout.write_all(&data)?;
        }
        stdout.flush()?;
    } else {
        let mut stdin = std::io::stdin().lock();
        let mut buf = vec![0u8; chunk];
        loop {
            let n = stdin.read(&mut buf)?;
            if n == 0 {
                break;
            }
            bindings.call_method(pipe, "write", &[Value::Bytes(buf[..n].to_vec())])?;
        }
    }

    let status = bindings.call_method(pipe, "close", &[])?;
    bindings.finalize(pipe);
    let status = status.as_int().context("close did not return a status")? as i32;
    Ok(shell_code(status))
}

fn run_spawn(config: Config, Spawn { argv }: Spawn) -> Result<i32> {
    let argv = Argv::new(&argv)?;
    let chunk = config.read_chunk;
    let (mut stdin, mut stdout, mut stderr, pid) = spawn_with(&config, &argv)?.into_parts();
    stdin.close();

    let errors = thread::spawn(move || -> Result<()> {
        let mut out = std::io::stderr().lock();
        while let ReadOutcome::Data(data) = stderr.read(chunk)? {
            out.write_all(&data)?;
        }
        Ok(())
    });

    let mut out = std::io::stdout().lock();
    while let ReadOutcome::Data(data) = stdout.read(chunk)? {
        out.write_all(&data)?;
    }
    out.flush()?;

    errors
        .join()
        .map_err(|_| anyhow!("stderr reader panicked"))??;
    Ok(wait_pid(pid)?.code())
}

/// Shell-style exit code from a raw wait status.
fn shell_code(status: i32) -> i32 {
    if libc::WIFEXITED(status) {
        libc::WEXITSTATUS(status)
    } else if libc::WIFSIGNALED(status) {
        128 + libc::WTERMSIG(status)
    } else {
        1
    }
}
