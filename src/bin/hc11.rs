//! Runs a 68HC11 program on the simulated EVBU board.
//!
//! ```text
//! hc11 [Options] [Filename.S19]
//! ```
//!
//! The program's console I/O (through the BUFFALO monitor's routines) goes to stdin/stdout.
//! Set `HC11_LOG` (`error`, `warn`, `info`, `debug`, `trace`) to see the simulator's log on stderr.

use std::process::ExitCode;

use hc11_sim::err::Error as _;
use hc11_sim::monitor;
use hc11_sim::sim::console::Console;
use hc11_sim::sim::{SimFlags, Simulator};

const USAGE: &str = "\
Usage:
  hc11 [Options] [Filename.S19]

Options:
  -s, --start=addr -- Specify starting address (overrides S19 file)
  --use-swi        -- Allow SWI instructions to execute
  --no-buffalo     -- Do not use BUFFALO services
  --no-timer       -- Do not install the timer peripheral
  --no-pio         -- Do not install the parallel I/O peripheral
  -h, --help       -- Display this help summary
  -v, --version    -- Display version information";

#[derive(Debug, Default, PartialEq, Eq)]
struct Options {
    start: Option<u16>,
    file: Option<String>,
    flags: SimFlags,
}

#[derive(Debug, PartialEq, Eq)]
enum Action {
    Run(Options),
    Help,
    Version,
}

/// Parses an address: decimal, or hex with a `0x` or `$` prefix.
fn parse_addr(s: &str) -> Option<u16> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).or_else(|| s.strip_prefix('$')) {
        Some(hex) => u16::from_str_radix(hex, 16).ok(),
        None => s.parse().ok(),
    }
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<Action, String> {
    let mut opts = Options::default();
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        let start = match arg.as_str() {
            "-h" | "-H" | "--help" => return Ok(Action::Help),
            "-v" | "--version" => return Ok(Action::Version),
            "--use-swi" => { opts.flags.allow_swi = true; continue; },
            "--no-buffalo" => { opts.flags.rom_monitor = false; continue; },
            "--no-timer" => { opts.flags.timer = false; continue; },
            "--no-pio" => { opts.flags.parallel_io = false; continue; },
            "-s" | "--start" => args.next().ok_or_else(|| format!("option {arg} requires an argument"))?,
            a if a.starts_with("--start=") => a["--start=".len()..].to_string(),
            a if a.starts_with("-s") => a["-s".len()..].to_string(),
            a if a.starts_with('-') => return Err(format!("option {a} not recognized")),
            _ => {
                if opts.file.is_some() {
                    return Err(String::from("Too many arguments"));
                }
                opts.file = Some(arg);
                continue;
            }
        };

        let addr = parse_addr(&start).ok_or_else(|| format!("invalid start address {start:?}"))?;
        opts.start = Some(addr);
    }

    Ok(Action::Run(opts))
}

/// Prints log records to stderr.
struct StderrLogger;

impl log::Log for StderrLogger {
    fn enabled(&self, metadata: &log::Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record<'_>) {
        if self.enabled(record.metadata()) {
            eprintln!("[{}] {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

fn init_logging() {
    static LOGGER: StderrLogger = StderrLogger;

    let level = std::env::var("HC11_LOG")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(log::LevelFilter::Warn);

    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level);
    }
}

fn run(opts: Options) -> ExitCode {
    let mut sim = Simulator::new(opts.flags);
    let (console, writer) = Console::stdio();
    sim.console = console;
    if opts.flags.rom_monitor {
        monitor::install(&mut sim);
    }
    sim.reset();

    if let Some(file) = &opts.file {
        let summary = match sim.load_s19_file(file) {
            Ok(summary) => summary,
            Err(e) => {
                eprintln!("error: {e}");
                if let Some(help) = e.help() {
                    eprintln!("help: {help}");
                }
                return ExitCode::FAILURE;
            }
        };
        if let Some(d) = &summary.diagnostics {
            eprintln!("{d}");
        }
        sim.regs.set_pc(summary.start);

        // A MAP file next to the program is optional.
        if let Err(e) = sim.load_map_file(file) {
            log::info!("no MAP file loaded: {e}");
        }
    }
    if let Some(start) = opts.start {
        sim.regs.set_pc(start);
    }

    let result = sim.run();

    // Print everything the program wrote before the summary.
    sim.console = Console::disconnected();
    let _ = writer.join();

    match result {
        Ok(halt) => {
            println!("{halt}");
            println!("{}", sim.regs);
            ExitCode::SUCCESS
        },
        Err(e) => {
            println!("{e}");
            println!("{}", sim.regs);
            ExitCode::FAILURE
        }
    }
}

fn main() -> ExitCode {
    init_logging();

    match parse_args(std::env::args().skip(1)) {
        Ok(Action::Run(opts)) => run(opts),
        Ok(Action::Help) => {
            println!("{USAGE}");
            ExitCode::FAILURE
        },
        Ok(Action::Version) => {
            println!("hc11 version {}", env!("CARGO_PKG_VERSION"));
            ExitCode::SUCCESS
        },
        Err(e) => {
            eprintln!("Option error: {e}");
            eprintln!("{USAGE}");
            ExitCode::FAILURE
        }
    }
}
