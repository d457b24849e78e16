//! kestrel CLI - list compute devices and run the bundled kernel drivers.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use kestrel_kernels::drivers::{hello, image, matmul, matrix_add, matvec, vector_add};
use kestrel_kernels::{DriverOptions, DriverReport, MatmulShape, MatmulVariant};
use kestrel_runtime::{
    describe_platforms, discover, predicate, select_device, Device, NdRange, PlatformSource,
    Session, SessionConfig, WgpuPlatforms,
};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "kestrel")]
#[command(about = "Run compute kernels on an accelerator through wgpu", long_about = None)]
#[command(version)]
struct Cli {
    /// Log device summaries, transfers and small matrices
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List platforms and their devices
    Devices,
    /// Run one of the bundled drivers
    Run(RunArgs),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Demo {
    VectorAdd,
    MatrixAdd,
    Matmul,
    Matvec,
    Image,
    Hello,
}

#[derive(Args)]
struct RunArgs {
    /// Driver to run
    #[arg(value_enum)]
    demo: Demo,

    /// Element count (vector-add, hello) or image side (image)
    #[arg(long)]
    size: Option<u32>,

    /// Rows of the output matrix
    #[arg(long, default_value = "64")]
    m: u32,

    /// Columns of the output matrix
    #[arg(long, default_value = "64")]
    n: u32,

    /// Inner dimension of matmul
    #[arg(long, default_value = "64")]
    k: u32,

    /// Work-group size, e.g. "64" or "8,8" (automatic when omitted)
    #[arg(long, value_name = "X[,Y[,Z]]", value_parser = parse_local)]
    local: Option<NdRange>,

    /// Matmul kernel variant: naive, tiled
    #[arg(long, default_value = "naive")]
    variant: MatmulVariant,

    /// Log stage timings
    #[arg(long)]
    profile: bool,

    /// Check a sample of the result on the host
    #[arg(long)]
    verify: bool,

    /// Largest accepted absolute difference when verifying
    #[arg(long, default_value = "1e-5")]
    tolerance: f32,

    /// Number of output entries checked when verifying
    #[arg(long, default_value = "100")]
    sample: usize,

    /// Seed for random inputs
    #[arg(long)]
    seed: Option<u64>,

    /// Only consider GPU devices
    #[arg(long)]
    gpu_only: bool,

    /// Read kernel source from FILE instead of the bundled kernel
    #[arg(long, value_name = "FILE")]
    source: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = SessionConfig::from_env();
    config.verbose |= cli.verbose;
    init_tracing(config.verbose);

    match cli.command {
        Commands::Devices => cmd_devices(&config),
        Commands::Run(args) => cmd_run(config, args),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "info,kestrel_runtime=debug"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn parse_local(s: &str) -> Result<NdRange, String> {
    let dims = s
        .split(',')
        .map(|d| {
            d.trim()
                .parse::<u32>()
                .map_err(|e| format!("invalid dimension '{d}': {e}"))
        })
        .collect::<Result<Vec<_>, _>>()?;
    if dims.is_empty() || dims.len() > 3 {
        return Err(format!("expected 1 to 3 dimensions, got {}", dims.len()));
    }
    Ok(NdRange::from_slice(&dims))
}

/// List every platform and device.
fn cmd_devices(config: &SessionConfig) -> Result<()> {
    let source = WgpuPlatforms::from_config(config);
    let platforms = discover(&source)?;
    let total = describe_platforms(&source, &platforms);

    for platform in &platforms {
        println!("{platform}");
        let devices = match source.devices(platform) {
            Ok(devices) => devices,
            Err(e) => {
                println!("  <enumeration failed: {e}>");
                continue;
            }
        };
        for device in devices {
            let info = device.info();
            println!(
                "  {} [{}] vendor={} driver={} available={} f64={} max_work_group_size={} max_work_item_sizes={:?}",
                info.name,
                info.kind,
                info.vendor,
                info.driver,
                info.available,
                info.supports_f64(),
                info.max_work_group_size,
                info.max_work_item_sizes,
            );
        }
    }
    println!("{} platform(s), {total} device(s)", platforms.len());
    Ok(())
}

/// Select a device, open a session and run the requested driver.
fn cmd_run(mut config: SessionConfig, args: RunArgs) -> Result<()> {
    config.profile |= args.profile;
    config.verify |= args.verify;

    let source_text = args
        .source
        .as_ref()
        .map(|path| {
            std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read kernel source from {}", path.display()))
        })
        .transpose()?;

    let platforms_source = WgpuPlatforms::from_config(&config);
    let platforms = discover(&platforms_source)?;
    let wants_f64 = args.demo == Demo::Hello;
    let filter: Box<dyn Fn(&Device) -> bool> = match (args.gpu_only, wants_f64) {
        (false, false) => Box::new(predicate::any()),
        (true, false) => Box::new(predicate::is_gpu()),
        (false, true) => Box::new(predicate::supports_f64()),
        (true, true) => Box::new(predicate::and(predicate::is_gpu(), predicate::supports_f64())),
    };
    let device = select_device(&platforms_source, &platforms, filter)
        .context("No suitable device found")?;
    let mut session = Session::initialize(&device, config)?;

    let options = DriverOptions {
        source: source_text,
        local: args.local.clone(),
        seed: args.seed,
        tolerance: args.tolerance,
        sample: args.sample,
    };

    let report = match args.demo {
        Demo::VectorAdd => vector_add::run(
            &mut session,
            args.size.unwrap_or(vector_add::DEFAULT_LEN),
            &options,
        )?,
        Demo::MatrixAdd => matrix_add::run(&mut session, args.m, args.n, &options)?,
        Demo::Matmul => {
            let shape = MatmulShape {
                m: args.m as usize,
                n: args.n as usize,
                k: args.k as usize,
            };
            matmul::run(&mut session, shape, args.variant, &options)?
        }
        Demo::Matvec => matvec::run(&mut session, args.m, args.n, &options)?,
        Demo::Image => {
            let side = args.size.unwrap_or(image::DEFAULT_SIDE);
            image::run(&mut session, side, side, &options)?
        }
        Demo::Hello => hello::run(
            &mut session,
            args.size.unwrap_or(hello::DEFAULT_LEN),
            &options,
        )?,
    };

    print_report(&report);
    if !report.passed() {
        bail!("{}: verification failed", report.name);
    }
    Ok(())
}

fn print_report(report: &DriverReport) {
    println!("{} on {}: {} elements", report.name, report.device, report.elements);
    if let Some((index, value)) = report.probe {
        println!("  result[{index}] = {value}");
    }
    if let Some(v) = &report.verification {
        println!(
            "  verification: {} ({} checked, max abs diff {:e}, {} mismatches)",
            if v.passed() { "passed" } else { "FAILED" },
            v.checked,
            v.max_abs_diff,
            v.mismatches.len()
        );
    }
    for (stage, elapsed) in &report.laps {
        println!("  {stage:<16} {:>10.3} ms", elapsed.as_secs_f64() * 1e3);
    }
}
