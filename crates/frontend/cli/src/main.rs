use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::{debug, info};
use sim86_core::logging::{LogConfig, LogLevel};
use sim86_core::{RunConfig, Simulator};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "sim86", version, about = "8086 disassembler and simulator")]
struct Args {
    /// Core log level: off, error, warn, info, debug or trace
    #[arg(long, global = true, default_value = "off")]
    log_level: String,

    /// Append core log output to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print a NASM listing of a binary
    Disasm {
        /// Raw 8086 machine code
        file: PathBuf,

        /// Load address (decimal or 0x-prefixed hex)
        #[arg(long, default_value = "0", value_parser = parse_address)]
        offset: u16,

        /// Write the listing to this file instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Execute a binary and print the final registers
    Sim {
        /// Raw 8086 machine code
        file: PathBuf,

        /// Load address (decimal or 0x-prefixed hex)
        #[arg(long, default_value = "0", value_parser = parse_address)]
        offset: u16,

        /// Estimate clocks per instruction (MOV and ADD only)
        #[arg(long, default_value_t = false)]
        estimate: bool,

        /// Stop after this many instructions
        #[arg(long)]
        step_limit: Option<u64>,

        /// Print the final state as JSON
        #[arg(long, default_value_t = false)]
        json: bool,

        /// Print every executed instruction with its register changes
        #[arg(long, default_value_t = false)]
        trace: bool,
    },
}

fn parse_address(s: &str) -> Result<u16, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => s.parse::<u16>(),
    };
    parsed.map_err(|e| format!("invalid address '{}': {}", s, e))
}

fn configure_core_logging(level: &str, log_file: Option<&Path>) -> Result<()> {
    let Some(level) = LogLevel::from_str(level) else {
        bail!("Unknown log level: {}", level);
    };
    let config = LogConfig::global();
    config.set_global_level(level);
    if let Some(path) = log_file {
        config
            .set_log_file(path.to_path_buf())
            .with_context(|| format!("opening log file {}", path.display()))?;
    }
    Ok(())
}

fn load_program(file: &Path, offset: u16) -> Result<Simulator> {
    let data = fs::read(file).with_context(|| format!("reading {}", file.display()))?;
    let mut sim = Simulator::new();
    let len = sim
        .load(&data, offset)
        .with_context(|| format!("loading {}", file.display()))?;
    info!("Loaded {} bytes from {} at {:#06X}", len, file.display(), offset);
    Ok(sim)
}

fn disassemble(file: &Path, offset: u16, output: Option<&Path>) -> Result<()> {
    let sim = load_program(file, offset)?;
    let count = match output {
        Some(path) => {
            let file =
                File::create(path).with_context(|| format!("creating {}", path.display()))?;
            let mut out = BufWriter::new(file);
            let count = sim.disassemble_to(&mut out)?;
            out.flush()?;
            count
        }
        None => {
            let stdout = io::stdout();
            let mut out = stdout.lock();
            sim.disassemble_to(&mut out)?
        }
    };
    info!("Disassembled {} instructions", count);
    Ok(())
}

fn simulate(file: &Path, offset: u16, config: RunConfig, json: bool, trace: bool) -> Result<()> {
    let mut sim = load_program(file, offset)?;
    debug!("Run config: {:?}", config);

    let summary = if trace {
        let mut total_clocks = 0u64;
        sim.run_with(&config, |step| {
            let changes: Vec<String> = step.changes().iter().map(|c| c.to_string()).collect();
            match step.clocks {
                Some(clocks) => {
                    total_clocks += clocks as u64;
                    println!(
                        "{} ; Clocks: +{} = {} | {}",
                        step.text(),
                        clocks,
                        total_clocks,
                        changes.join(" ")
                    );
                }
                None => println!("{} ; {}", step.text(), changes.join(" ")),
            }
        })?
    } else {
        sim.run(&config)?
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        if trace {
            println!();
        }
        print!("{}", summary);
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    configure_core_logging(&args.log_level, args.log_file.as_deref())?;

    match args.command {
        Command::Disasm {
            file,
            offset,
            output,
        } => disassemble(&file, offset, output.as_deref()),
        Command::Sim {
            file,
            offset,
            estimate,
            step_limit,
            json,
            trace,
        } => {
            let config = RunConfig {
                estimate_clocks: estimate,
                step_limit,
            };
            simulate(&file, offset, config, json, trace)
        }
    }
}
