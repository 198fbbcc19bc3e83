//! stackframe-demo
//!
//! Walks a simulated frame through a write plan and prints each stage.

use std::process;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use stackframe_sim::frame::{offset, range};
use stackframe_sim::{
    Frame, Mitigations, Pattern, Phase, Segment, SimConfig, SimError, StagedSession, ValidationError,
    LAYOUT,
};

/// Demo configuration
struct Args {
    config: SimConfig,
    pattern: Pattern,
    length: usize,
    step: bool,
    classic: bool,
    json: bool,
}

fn usage() {
    println!("stackframe-demo - conceptual stack-frame overflow simulator");
    println!();
    println!("USAGE:");
    println!("    stackframe-demo [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    -p, --pattern <P>      fixed | repeat | random | text:<s> [default: fixed]");
    println!("    -n, --length <N>       Bytes to write [default: 24]");
    println!("    -c, --config <FILE>    JSON config file");
    println!("        --canary           Enable the canary check");
    println!("        --nx               Enable the non-executable stack flag");
    println!("        --aslr             Enable the address randomization flag");
    println!("        --seed <N>         Seed the RNG");
    println!("        --delay-ms <N>     Delay between staged phases");
    println!("        --step             Write one byte at a time");
    println!("        --classic          Sentinel overwrite walkthrough");
    println!("        --json             Print the final view as JSON");
    println!("    -h, --help             Print help information");
}

fn fail(err: impl std::fmt::Display) -> ! {
    eprintln!("error: {err}");
    process::exit(1);
}

fn value<'a>(args: &'a [String], i: usize, flag: &str) -> &'a str {
    args.get(i + 1)
        .map(String::as_str)
        .unwrap_or_else(|| fail(format!("{flag} requires a value")))
}

fn number<T: std::str::FromStr>(raw: &str, flag: &str) -> T {
    raw.parse()
        .unwrap_or_else(|_| fail(format!("invalid value for {flag}: {raw}")))
}

fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = Args {
        config: SimConfig::default(),
        pattern: Pattern::FixedByte,
        length: 24,
        step: false,
        classic: false,
        json: false,
    };
    let mut mitigations = Mitigations::none();
    let mut seed = None;
    let mut delay_ms = None;

    let mut i = 1;
    while i < args.len() {
        let flag = args[i].as_str();
        match flag {
            "--pattern" | "-p" => {
                parsed.pattern = value(&args, i, flag).parse().unwrap_or_else(|e: ValidationError| fail(e));
                i += 2;
            }
            "--length" | "-n" => {
                parsed.length = number(value(&args, i, flag), flag);
                i += 2;
            }
            "--config" | "-c" => {
                let path = value(&args, i, flag);
                let raw = std::fs::read_to_string(path)
                    .unwrap_or_else(|e| fail(format!("cannot read {path}: {e}")));
                parsed.config = SimConfig::from_json_str(&raw).unwrap_or_else(|e| fail(e));
                mitigations = parsed.config.mitigations;
                i += 2;
            }
            "--seed" => {
                seed = Some(number(value(&args, i, flag), flag));
                i += 2;
            }
            "--delay-ms" => {
                delay_ms = Some(number(value(&args, i, flag), flag));
                i += 2;
            }
            "--canary" => {
                mitigations.canary_check_enabled = true;
                i += 1;
            }
            "--nx" => {
                mitigations.non_executable_stack = true;
                i += 1;
            }
            "--aslr" => {
                mitigations.address_randomization_enabled = true;
                i += 1;
            }
            "--step" => {
                parsed.step = true;
                i += 1;
            }
            "--classic" => {
                parsed.classic = true;
                i += 1;
            }
            "--json" => {
                parsed.json = true;
                i += 1;
            }
            "--help" | "-h" => {
                usage();
                process::exit(0);
            }
            arg => fail(format!("unknown argument: {arg}")),
        }
    }

    parsed.config.mitigations = mitigations;
    if let Some(seed) = seed {
        parsed.config.seed = Some(seed);
    }
    if let Some(delay_ms) = delay_ms {
        parsed.config.stage_delay_ms = delay_ms;
    }
    parsed
}

fn print_frame(bytes: &[u8], mask: &[bool]) {
    for entry in &LAYOUT {
        let cells: Vec<String> = range(entry.segment)
            .map(|i| {
                if mask[i] {
                    format!("{:02x}*", bytes[i])
                } else {
                    format!("{:02x} ", bytes[i])
                }
            })
            .collect();
        println!("  {:<6} {}", entry.segment.name(), cells.join(""));
    }
}

/// The sentinel walkthrough: 16 filler bytes, then 8 more over the canary.
fn classic(config: &SimConfig) -> Result<(), SimError> {
    let sim = StagedSession::new(config)?;
    sim.set_plan(Pattern::FixedByte, Frame::distance(Segment::Buf, Segment::Canary).unsigned_abs() + 8)?;

    let before = sim.snapshot()?;
    let canary_at = offset(Segment::Canary);
    let read = |bytes: &[u8]| {
        let mut word = [0u8; 8];
        word.copy_from_slice(&bytes[canary_at..canary_at + 8]);
        u64::from_le_bytes(word)
    };

    println!("Before: canary = 0x{:016x}", read(&before.frame_bytes));
    println!(
        "Layout: buf at +{}, canary at +{} (distance={} bytes)",
        offset(Segment::Buf),
        canary_at,
        Frame::distance(Segment::Buf, Segment::Canary)
    );

    let after = sim.run_all()?;
    println!("After : canary = 0x{:016x}", read(&after.frame_bytes));
    if after.status.canary_changed {
        println!("Result: adjacent memory was corrupted (simulated).");
    } else {
        println!("Result: canary unchanged.");
    }
    Ok(())
}

fn run(args: &Args) -> Result<(), SimError> {
    if args.classic {
        return classic(&args.config);
    }

    let sim = StagedSession::new(&args.config)?;
    let mut view = sim.set_plan(args.pattern.clone(), args.length)?;

    if args.step {
        while !view.is_write_complete() {
            view = sim.step()?;
            println!("cursor {:>3}  verdict: {}", view.cursor, view.verdict_caption);
        }
    } else {
        view = sim.run_all()?;
    }

    let timeout = Duration::from_millis(args.config.stage_delay_ms.saturating_mul(4) + 1000);
    if !view.phase.is_terminal() {
        view = sim.wait_for_phase(Phase::Done, timeout)?;
    }

    if args.json {
        let json = serde_json::to_string_pretty(&view)
            .map_err(|e| SimError::internal(format!("failed to encode view: {e}")))?;
        println!("{json}");
        return Ok(());
    }

    println!("frame ({} bytes, * = written):", view.frame_bytes.len());
    print_frame(&view.frame_bytes, &view.written_mask);
    for caption in &view.address_captions {
        println!("  {caption}");
    }
    println!("phase:   {}", view.phase);
    println!("verdict: {}", view.verdict_caption);
    println!("log:");
    for entry in view.log.iter().rev() {
        println!("  [{}] {}", entry.at.format("%H:%M:%S%.3f"), entry.text);
    }
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args = parse_args();
    if let Err(e) = run(&args) {
        fail(e);
    }
}
