//! Command-line front end over the snapshot engine: take a dump, populate
//! the type registry, and inspect objects in it.

mod dump;
mod scan;

use std::path::PathBuf;
use std::process;

use failure::{format_err, Error};
use structopt::StructOpt;

use pymemsnap::{Environment, MappedAddr, PyVersion, TraverseOptions};

fn parse_addr(s: &str) -> Result<MappedAddr, Error> {
    let trimmed = s.trim_start_matches("0x");
    u64::from_str_radix(trimmed, 16)
        .map(MappedAddr)
        .map_err(|_| format_err!("not a hex address: {}", s))
}

#[derive(StructOpt)]
struct EnvArgs {
    /// Snapshot directory or bundle file.
    #[structopt(long = "path", parse(from_os_str))]
    path: PathBuf,
    /// Interpreter version of the snapshotted process (3.10 or 3.14).
    #[structopt(long = "python-version", default_value = "3.10")]
    python_version: PyVersion,
}

impl EnvArgs {
    fn open(&self) -> Result<Environment, Error> {
        Ok(Environment::open(&self.path, self.python_version)?)
    }
}

#[derive(StructOpt)]
struct ReprArgs {
    #[structopt(flatten)]
    env: EnvArgs,
    /// Address of the object, in hex.
    #[structopt(parse(try_from_str = parse_addr))]
    addr: MappedAddr,
    #[structopt(long = "max-recursion-depth", default_value = "-1")]
    max_recursion_depth: i64,
    #[structopt(long = "max-entries", default_value = "-1")]
    max_entries: i64,
    #[structopt(long = "max-string-length", default_value = "1024")]
    max_string_length: u64,
    #[structopt(long = "frame-omit-back")]
    frame_omit_back: bool,
    #[structopt(long = "frame-omit-locals")]
    frame_omit_locals: bool,
    #[structopt(long = "bytes-as-hex")]
    bytes_as_hex: bool,
    #[structopt(long = "show-all-addresses")]
    show_all_addresses: bool,
    #[structopt(long = "short")]
    short: bool,
}

impl ReprArgs {
    fn options(&self) -> TraverseOptions {
        TraverseOptions {
            max_recursion_depth: self.max_recursion_depth,
            max_entries: self.max_entries,
            max_string_length: self.max_string_length,
            frame_omit_back: self.frame_omit_back,
            frame_omit_locals: self.frame_omit_locals,
            bytes_as_hex: self.bytes_as_hex,
            show_all_addresses: self.show_all_addresses,
            is_short: self.short,
        }
    }
}

#[derive(StructOpt)]
#[structopt(name = "pymemsnap", about = "Inspect CPython memory snapshots.")]
enum Command {
    /// Pause a process and write a snapshot of its memory.
    #[structopt(name = "dump")]
    Dump {
        #[structopt(long = "pid")]
        pid: u32,
        /// Directory to write `mem.<start>.<end>.bin` files into.
        #[structopt(long = "path", parse(from_os_str))]
        path: PathBuf,
        #[structopt(long = "max-threads", default_value = "0")]
        max_threads: usize,
    },
    /// Show the regions of a snapshot.
    #[structopt(name = "info")]
    Info {
        #[structopt(flatten)]
        env: EnvArgs,
    },
    /// Scan for type objects and persist the registry.
    #[structopt(name = "find-types")]
    FindTypes {
        #[structopt(flatten)]
        env: EnvArgs,
    },
    /// Check whether an address names a valid object.
    #[structopt(name = "validate")]
    Validate {
        #[structopt(flatten)]
        env: EnvArgs,
        #[structopt(parse(try_from_str = parse_addr))]
        addr: MappedAddr,
        /// Require the object to be of this registered type.
        #[structopt(long = "type")]
        type_name: Option<String>,
    },
    /// List the outgoing edges of an object.
    #[structopt(name = "referents")]
    Referents {
        #[structopt(flatten)]
        env: EnvArgs,
        #[structopt(parse(try_from_str = parse_addr))]
        addr: MappedAddr,
    },
    /// Render an object.
    #[structopt(name = "repr")]
    Repr(ReprArgs),
    /// Render a thread state and follow its linked list.
    #[structopt(name = "threads")]
    Threads {
        #[structopt(flatten)]
        env: EnvArgs,
        /// Address of any thread state on the list.
        #[structopt(parse(try_from_str = parse_addr))]
        addr: MappedAddr,
    },
}

fn run(command: Command) -> Result<(), Error> {
    match command {
        Command::Dump {
            pid,
            path,
            max_threads,
        } => dump::dump(pid, &path, max_threads),
        Command::Info { env } => {
            let env = env.open()?;
            for (base, size) in env.reader.all_regions() {
                println!("{}  {:#x} bytes", base, size);
            }
            println!(
                "{} bytes in {} regions",
                env.reader.bytes(),
                env.reader.region_count()
            );
            Ok(())
        }
        Command::FindTypes { env } => {
            let mut env = env.open()?;
            let count = scan::find_all_types(&mut env)?;
            env.save_analysis()?;
            println!("recorded {} types (meta type {})", count, env.base_type_object);
            Ok(())
        }
        Command::Validate {
            env,
            addr,
            type_name,
        } => {
            let env = env.open()?;
            let expected = match type_name {
                Some(name) => {
                    let addr = env.get_type_if_exists(&name);
                    if addr.is_null() {
                        return Err(format_err!(
                            "type {} is not in the registry; run find-types first",
                            name
                        ));
                    }
                    Some(addr)
                }
                None => None,
            };
            match env.invalid_reason(addr, expected) {
                Some(reason) => println!("{}: invalid ({})", addr, reason),
                None => println!("{}: valid", addr),
            }
            Ok(())
        }
        Command::Referents { env, addr } => {
            let env = env.open()?;
            let referents = env.direct_referents(addr)?;
            for referent in referents {
                println!("{}", referent);
            }
            Ok(())
        }
        Command::Repr(args) => {
            let env = args.env.open()?;
            let mut traversal = env.traverse(args.options());
            println!("{}", traversal.repr(args.addr));
            if !traversal.is_valid {
                process::exit(2);
            }
            Ok(())
        }
        Command::Threads { env, addr } => {
            let env = env.open()?;
            let mut current = addr;
            // Bounded walk: a corrupt list must not loop forever.
            for _ in 0..1024 {
                if current.is_null() {
                    break;
                }
                let mut traversal = env.traverse(TraverseOptions {
                    is_short: true,
                    ..Default::default()
                });
                println!("{} {}", current, traversal.repr_thread_state(current));
                current = match env.version {
                    PyVersion::Py310 => {
                        pymemsnap::py310::threadstate::PyThreadState::read(&env, current)?
                            .next
                    }
                    PyVersion::Py314 => {
                        pymemsnap::py314::threadstate::PyThreadState::read(&env, current)?
                            .next
                    }
                };
            }
            Ok(())
        }
    }
}

fn main() {
    env_logger::init();
    let command = Command::from_args();
    if let Err(err) = run(command) {
        eprintln!("error: {}", err);
        for cause in err.iter_causes() {
            eprintln!("  caused by: {}", cause);
        }
        process::exit(1);
    }
}
