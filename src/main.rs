use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use tracing::{debug, error, info};
use tracing_subscriber::{EnvFilter, fmt};

use tern as lib;
use tern::Diagnostic;
use tern::config::VmConfig;
use tern::runtime_io::StdIo;
use tern::vm::disasm;

#[derive(Parser, Debug)]
#[command(name = "ternc")]
#[command(about = "Compile and execute tern bytecode")]
struct Cli {
    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// VM configuration file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(long, global = true)]
    max_stack: Option<usize>,

    #[arg(long, global = true)]
    max_frames: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 프로그램(AST)을 바이트코드로 컴파일
    Compile {
        program: PathBuf,
        #[arg(short, long, default_value = "out.ternb")]
        output: PathBuf,
        /// Source text used to render diagnostics
        #[arg(long)]
        source: Option<PathBuf>,
        #[arg(long)]
        level: Option<i32>,
    },
    /// Run a bytecode file, then its `main`
    Exec {
        bytecode: PathBuf,
        args: Vec<String>,
    },
    Disasm {
        bytecode: PathBuf,
    },
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    fmt().with_env_filter(filter).with_target(false).init();
}

fn load_config(cli: &Cli) -> VmConfig {
    let mut config = match &cli.config {
        Some(path) => match VmConfig::load(path) {
            Ok(c) => c,
            Err(e) => {
                error!("{}: {}", path.display(), e);
                process::exit(2);
            }
        },
        None => VmConfig::default(),
    };
    if let Some(n) = cli.max_stack {
        config = config.with_max_stack(n);
    }
    if let Some(n) = cli.max_frames {
        config = config.with_max_frames(n);
    }
    config
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let config = load_config(&cli);
    debug!(?config, "configuration");

    match &cli.command {
        Command::Compile {
            program,
            output,
            source,
            level,
        } => {
            let statements = match lib::load_program(program) {
                Ok(p) => p,
                Err(e) => {
                    error!("{}: {}", program.display(), e);
                    process::exit(1);
                }
            };
            let source_id = program.display().to_string();
            let bytecode = match lib::compile(&source_id, &statements) {
                Ok(bc) => bc,
                Err(e) => {
                    match source.as_ref().and_then(|p| std::fs::read_to_string(p).ok()) {
                        Some(src) => eprint!("{}", Diagnostic::from(&e).format(&source_id, &src, "Compilation failed", 1)),
                        None => eprintln!("{}: {}", source_id, e),
                    }
                    process::exit(1);
                }
            };
            let level = level.unwrap_or(config.compression_level);
            if let Err(e) = lib::save_bytecode(&bytecode, output, level) {
                error!("{}: {}", output.display(), e);
                process::exit(1);
            }
            info!("wrote {}", output.display());
        }
        Command::Exec { bytecode, args } => {
            let bc = match lib::load_bytecode(bytecode) {
                Ok(bc) => bc,
                Err(e) => {
                    error!("{}: {}", bytecode.display(), e);
                    process::exit(1);
                }
            };
            if let Err(e) = lib::run(bc, Box::new(StdIo), config, args) {
                eprintln!("Runtime Error: {}", e);
                if let Some(span) = &e.span {
                    eprintln!("  at {}:{}..{}", e.source_id.as_deref().unwrap_or("<unknown>"), span.start, span.end);
                }
                process::exit(1);
            }
        }
        Command::Disasm { bytecode } => match lib::load_bytecode(bytecode) {
            Ok(bc) => print!("{}", disasm::disassemble_to_string(&bc)),
            Err(e) => {
                error!("{}: {}", bytecode.display(), e);
                process::exit(1);
            }
        },
    }
}
