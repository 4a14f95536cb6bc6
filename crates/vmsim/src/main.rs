use clap::{Parser, Subcommand, ValueEnum};
use noff::{Endian, NoffBuilder, NoffHeader};
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use vmm::{
    AccessError, AddressSpace, EmulatedMachine, FileSystem, MemoryManager, PAGE_SIZE,
    ReplacementPolicy, SegmentLayout, VmConfig,
};

mod console;
mod host;
mod trace;

use console::Console;
use host::HostFileSystem;
use trace::Access;

#[derive(Parser)]
#[command(name = "vmsim")]
#[command(about = "NOFF image and demand paging tool")]
struct Args {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the header of a NOFF image
    Inspect {
        /// NOFF image
        image: PathBuf,

        /// User stack size used to compute the page count, in bytes
        #[arg(long, default_value_t = vmm::DEFAULT_USER_STACK_SIZE)]
        stack_size: usize,
    },
    /// Build a NOFF image from raw segment contents
    Pack {
        /// File holding the code segment
        #[arg(long)]
        code: PathBuf,

        /// File holding the initialized data segment
        #[arg(long)]
        data: Option<PathBuf>,

        /// Size of the uninitialized data segment, in bytes
        #[arg(long, default_value_t = 0)]
        bss: u32,

        /// Output image
        #[arg(short, long)]
        output: PathBuf,

        /// Write the header big-endian
        #[arg(long)]
        big_endian: bool,
    },
    /// Load an image into an emulated machine and replay a memory trace against it
    Run {
        /// NOFF image
        image: PathBuf,

        /// Trace of `r <addr>` and `w <addr> <byte>` lines. Without one, every page is read
        /// once in order.
        #[arg(short, long)]
        trace: Option<PathBuf>,

        /// Page replacement policy
        #[arg(long, value_enum)]
        policy: Option<PolicyArg>,

        /// Maximum resident pages for the process
        #[arg(long, default_value_t = vmm::DEFAULT_AVAILABLE_PAGES)]
        available_pages: usize,

        /// Physical frames in the machine
        #[arg(long, default_value_t = vmm::DEFAULT_NUM_PHYS_PAGES)]
        phys_pages: usize,

        /// User stack size, in bytes
        #[arg(long, default_value_t = vmm::DEFAULT_USER_STACK_SIZE)]
        stack_size: usize,

        /// Directory for the working copy of the image and the swap file
        #[arg(long)]
        swap_dir: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum PolicyArg {
    Fifo,
    SecondChance,
}

impl From<PolicyArg> for ReplacementPolicy {
    fn from(policy: PolicyArg) -> Self {
        match policy {
            PolicyArg::Fifo => ReplacementPolicy::Fifo,
            PolicyArg::SecondChance => ReplacementPolicy::SecondChance,
        }
    }
}

fn inspect(image: PathBuf, stack_size: usize) -> Result<(), Box<dyn Error>> {
    let data = fs::read(&image)?;
    let (header, endian) = NoffHeader::from_bytes(&data)
        .map_err(|e| format!("{}: {}", image.display(), e))?;
    let layout = SegmentLayout::new(&header, stack_size);

    println!("{}: NOFF image, {}", image.display(), endian);
    println!("{:<12} {:>8} {:>10} {:>10}", "segment", "size", "vaddr", "offset");
    for (name, segment) in [
        ("code", header.code),
        ("init data", header.init_data),
        ("uninit data", header.uninit_data),
    ] {
        println!(
            "{:<12} {:>8} {:>#10x} {:>#10x}",
            name, segment.size, segment.virtual_addr, segment.in_file_addr
        );
    }
    println!(
        "{} pages of {} bytes ({} of stack)",
        layout.page_count(),
        PAGE_SIZE,
        layout.stack_pages()
    );
    Ok(())
}

fn pack(
    code: PathBuf,
    data: Option<PathBuf>,
    bss: u32,
    output: PathBuf,
    big_endian: bool,
) -> Result<(), Box<dyn Error>> {
    let code = fs::read(code)?;
    let data = match data {
        Some(path) => fs::read(path)?,
        None => Vec::new(),
    };
    let endian = if big_endian { Endian::Big } else { Endian::Little };

    let image = NoffBuilder::new(PAGE_SIZE as u32)
        .code(&code)
        .init_data(&data)
        .uninit_size(bss)
        .endian(endian)
        .build();
    fs::write(&output, &image)?;

    println!("wrote {} ({} bytes, {})", output.display(), image.len(), endian);
    Ok(())
}

struct RunOptions {
    trace: Option<PathBuf>,
    config: VmConfig,
    swap_dir: PathBuf,
}

fn run(image: PathBuf, options: RunOptions) -> Result<(), Box<dyn Error>> {
    let accesses = match &options.trace {
        Some(path) => trace::parse(&fs::read_to_string(path)?)?,
        None => Vec::new(),
    };

    // Pages are written back to the executable, so run against a copy.
    let file_name = image
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| format!("{}: not a file name", image.display()))?
        .to_string();
    let process_name = Path::new(&file_name)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("process")
        .to_string();
    fs::create_dir_all(&options.swap_dir)?;
    let filesystem = Arc::new(HostFileSystem::new(&options.swap_dir));
    fs::copy(&image, filesystem.path(&file_name))?;

    let memory = Arc::new(MemoryManager::new(options.config)?);
    let mut machine = EmulatedMachine::new(options.config.num_phys_pages);
    let mut space = AddressSpace::open(
        &memory,
        Arc::clone(&filesystem),
        &mut machine,
        &file_name,
        &process_name,
    )?;
    space.init_registers(&mut machine);
    space.restore_state(&mut machine);

    if accesses.is_empty() {
        for page in 0..space.page_count() {
            let addr = page * PAGE_SIZE;
            replay(&mut space, &mut machine, Access::Read { addr })?;
        }
    } else {
        for access in accesses {
            let value = replay(&mut space, &mut machine, access)?;
            println!("{} -> {:#04x}", access, value);
        }
    }

    println!("{}", space.stats());
    println!("{}", space.dump());

    drop(space);
    filesystem.remove(&file_name);
    Ok(())
}

/// Performs one access, servicing page faults until it succeeds. Returns the byte read or
/// written.
fn replay<FS: FileSystem>(
    space: &mut AddressSpace<FS>,
    machine: &mut EmulatedMachine,
    access: Access,
) -> Result<u8, Box<dyn Error>> {
    loop {
        let (addr, result) = match access {
            Access::Read { addr } => {
                let mut byte = [0u8];
                (addr, space.read_mem(&*machine, addr, &mut byte).map(|()| byte[0]))
            }
            Access::Write { addr, value } => {
                (addr, space.write_mem(machine, addr, &[value]).map(|()| value))
            }
        };
        match result {
            Ok(value) => return Ok(value),
            Err(AccessError::PageFault { .. }) => {
                space.handle_page_fault(machine, addr)?;
            }
            Err(err) => return Err(err.into()),
        }
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    Console::init(args.verbose)?;

    match args.command {
        Command::Inspect { image, stack_size } => inspect(image, stack_size),
        Command::Pack {
            code,
            data,
            bss,
            output,
            big_endian,
        } => pack(code, data, bss, output, big_endian),
        Command::Run {
            image,
            trace,
            policy,
            available_pages,
            phys_pages,
            stack_size,
            swap_dir,
        } => {
            let mut config = VmConfig::default()
                .with_available_pages(available_pages)
                .with_phys_pages(phys_pages)
                .with_stack_size(stack_size);
            if let Some(policy) = policy {
                config = config.with_policy(policy.into());
            }
            let options = RunOptions {
                trace,
                config,
                swap_dir: swap_dir.unwrap_or_else(|| std::env::temp_dir().join("vmsim")),
            };
            run(image, options)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Args::command().debug_assert();
    }

    #[test]
    fn parses_run_options() {
        let args = Args::parse_from([
            "vmsim",
            "-vv",
            "run",
            "halt.noff",
            "--policy",
            "second-chance",
            "--available-pages",
            "2",
        ]);
        assert_eq!(args.verbose, 2);
        let Command::Run {
            policy,
            available_pages,
            phys_pages,
            ..
        } = args.command
        else {
            panic!("expected run");
        };
        assert!(matches!(policy, Some(PolicyArg::SecondChance)));
        assert_eq!(available_pages, 2);
        assert_eq!(phys_pages, vmm::DEFAULT_NUM_PHYS_PAGES);
    }

    #[test]
    fn replay_services_faults() {
        let config = VmConfig::default()
            .with_phys_pages(4)
            .with_available_pages(1)
            .with_stack_size(PAGE_SIZE)
            .with_policy(ReplacementPolicy::Fifo);
        let memory = Arc::new(MemoryManager::new(config).unwrap());
        let mut machine = EmulatedMachine::new(4);
        let filesystem = Arc::new(vmm::MemFileSystem::new());
        filesystem.insert(
            "prog",
            &NoffBuilder::new(PAGE_SIZE as u32).code(&[7; PAGE_SIZE]).build(),
        );
        let mut space =
            AddressSpace::open(&memory, filesystem, &mut machine, "prog", "prog").unwrap();

        let stack = PAGE_SIZE + 3;
        let write = Access::Write {
            addr: stack,
            value: 0x42,
        };
        assert_eq!(replay(&mut space, &mut machine, write).unwrap(), 0x42);
        assert_eq!(
            replay(&mut space, &mut machine, Access::Read { addr: 0 }).unwrap(),
            7
        );
        assert_eq!(
            replay(&mut space, &mut machine, Access::Read { addr: stack }).unwrap(),
            0x42
        );
        assert_eq!(space.stats().page_faults, 3);
    }
}
