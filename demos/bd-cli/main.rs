//! Demo/test front-end for the `blockdev` crate (spec §2). Not part of the
//! library's public contract: a thin clap wrapper that exercises each
//! module end to end from the command line.

use blockdev::{deps, exec, nvme, sizes, smart};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "bd-cli", about = "Exercise the blockdev crate from the command line")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check whether an external utility is on PATH and report its version.
    Deps {
        util: String,
        #[arg(long)]
        min_version: Option<String>,
    },
    /// Parse a human size spec (e.g. "10 GiB") and print the byte count.
    Size { spec: String },
    /// Fetch an ATA SMART report via smartctl for a device.
    Smart {
        device: String,
        #[arg(long)]
        nowakeup: bool,
    },
    /// NVMe operations.
    Nvme {
        #[command(subcommand)]
        action: NvmeAction,
    },
}

#[derive(Subcommand)]
enum NvmeAction {
    /// List NVMe controllers under /sys/class/nvme.
    List,
    /// Print the SMART/Health log for a controller (e.g. /dev/nvme0).
    Smart { device: String },
}

fn main() {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Deps { util, min_version } => run_deps(&util, min_version.as_deref()),
        Command::Size { spec } => run_size(&spec),
        Command::Smart { device, nowakeup } => run_smart(&device, nowakeup),
        Command::Nvme { action } => match action {
            NvmeAction::List => run_nvme_list(),
            NvmeAction::Smart { device } => run_nvme_smart(&device),
        },
    };

    if let Err(e) = result {
        eprintln!("bd-cli: {e}");
        std::process::exit(1);
    }
}

fn run_deps(util: &str, min_version: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    match exec::which(util) {
        Some(path) => println!("{util}: found at {}", path.display()),
        None => {
            println!("{util}: not found on PATH");
            return Ok(());
        }
    }
    let cache = deps::AvailabilityCache::new();
    let specs = [deps::DepSpec::Util {
        name: Box::leak(util.to_string().into_boxed_str()),
        min_version: min_version.map(|v| Box::leak(v.to_string().into_boxed_str()) as &str),
        version_arg: Some("--version"),
        version_regexp: None,
    }];
    match cache.check(0b1, &specs) {
        Ok(()) => println!("{util}: available"),
        Err(e) => println!("{util}: unavailable ({e})"),
    }
    Ok(())
}

fn run_size(spec: &str) -> Result<(), Box<dyn std::error::Error>> {
    let bytes = sizes::size_from_spec(spec)?;
    println!("{bytes} bytes ({})", sizes::size_human_readable(bytes));
    Ok(())
}

fn run_smart(device: &str, nowakeup: bool) -> Result<(), Box<dyn std::error::Error>> {
    let report = smart::get_ata_info(device, nowakeup)?;
    println!("{report:#?}");
    Ok(())
}

fn run_nvme_list() -> Result<(), Box<dyn std::error::Error>> {
    for name in nvme::list_controllers() {
        println!("{name}");
    }
    Ok(())
}

fn run_nvme_smart(device: &str) -> Result<(), Box<dyn std::error::Error>> {
    let log = nvme::get_smart_log(device)?;
    println!("{log:#?}");
    Ok(())
}
