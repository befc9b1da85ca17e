//! Host-side CLI for formatting, checking, and poking at an `efs` volume.
//!
//! This binary is ambient tooling to exercise and debug the mount, the way
//! the lineage this crate is drawn from ships `mkfs`/`fdisk`-style tools
//! alongside its kernel. It is not itself part of the filesystem engine.
use std::{
    io::{self, Write as _},
    path::PathBuf,
    sync::Arc,
};

use clap::{Parser, Subcommand};
use efs::{
    EfsError, Result,
    block::{
        BLOCK_SIZE, BlockDevice,
        cache::{CachingDevice, DEFAULT_CAPACITY},
        crypto::CryptoDevice,
        raw::RamDevice,
    },
    disk_layout::FileType,
    file::OpenFlags,
    mount::Mount,
};

#[derive(Parser)]
#[command(name = "efs-tool", about = "Format, check, and drive an efs volume")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Format a volume and exit.
    Mkfs {
        /// Path to the backing file, or `ram` for an in-memory volume.
        image: String,
        #[arg(long)]
        blocks: u64,
        #[arg(long)]
        key_file: Option<PathBuf>,
        #[arg(long)]
        cache: bool,
    },
    /// Walk the bitmap and inode graph and report inconsistencies. Mutates
    /// nothing.
    Fsck {
        image: String,
        #[arg(long)]
        blocks: Option<u64>,
        #[arg(long)]
        key_file: Option<PathBuf>,
    },
    /// Drive the mount through an interactive line-oriented shell.
    Shell {
        image: String,
        #[arg(long)]
        blocks: Option<u64>,
        #[arg(long)]
        key_file: Option<PathBuf>,
        #[arg(long)]
        cache: bool,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("efs-tool: {e}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Mkfs {
            image,
            blocks,
            key_file,
            cache,
        } => cmd_mkfs(&image, blocks, key_file.as_deref(), cache),
        Command::Fsck {
            image,
            blocks,
            key_file,
        } => cmd_fsck(&image, blocks, key_file.as_deref()),
        Command::Shell {
            image,
            blocks,
            key_file,
            cache,
        } => cmd_shell(&image, blocks, key_file.as_deref(), cache),
    }
}

fn read_key(path: &std::path::Path) -> Result<[u8; 32]> {
    let bytes = std::fs::read(path)?;
    bytes
        .try_into()
        .map_err(|_| EfsError::InvalidArg)
        .map(|k: [u8; 32]| k)
}

/// Builds the block-device stack (raw [-> crypto] [-> cache]) for `image`
/// sized to hold `blocks` filesystem-level blocks, or infers `blocks` from
/// an existing file's length when not given.
fn build_device(
    image: &str,
    blocks: Option<u64>,
    key_file: Option<&std::path::Path>,
    cache: bool,
) -> Result<Arc<dyn BlockDevice>> {
    let key = key_file.map(read_key).transpose()?;
    let raw_block_size = if key.is_some() {
        efs::block::crypto::RAW_BLOCK_SIZE
    } else {
        BLOCK_SIZE
    };

    let raw: Arc<dyn BlockDevice> = if image == "ram" {
        let blocks = blocks.ok_or(EfsError::InvalidArg)?;
        Arc::new(RamDevice::new(blocks, raw_block_size))
    } else {
        let path = std::path::Path::new(image);
        let blocks = match blocks {
            Some(b) => b,
            None => {
                let len = std::fs::metadata(path)?.len();
                len / raw_block_size as u64
            }
        };
        Arc::new(efs::block::raw::FileDevice::open(
            path,
            blocks,
            raw_block_size,
        )?)
    };

    let device: Arc<dyn BlockDevice> = match key {
        Some(k) => Arc::new(CryptoDevice::new(raw, &k)),
        None => raw,
    };
    let device: Arc<dyn BlockDevice> = if cache {
        Arc::new(CachingDevice::new(device, DEFAULT_CAPACITY))
    } else {
        device
    };
    Ok(device)
}

fn cmd_mkfs(
    image: &str,
    blocks: u64,
    key_file: Option<&std::path::Path>,
    cache: bool,
) -> Result<()> {
    let device = build_device(image, Some(blocks), key_file, cache)?;
    let mount = Mount::mkfs(device)?;
    println!("formatted {image} with {blocks} blocks");
    mount.release()
}

/// `ram` volumes carry no state between invocations, so mounting one always
/// means formatting it fresh; a persisted `image` path mounts its existing
/// superblock instead.
fn mount_for(image: &str, device: Arc<dyn BlockDevice>) -> Result<Mount> {
    if image == "ram" {
        Mount::mkfs(device)
    } else {
        Mount::initialize(device)
    }
}

fn cmd_fsck(image: &str, blocks: Option<u64>, key_file: Option<&std::path::Path>) -> Result<()> {
    let device = build_device(image, blocks, key_file, false)?;
    let mount = mount_for(image, device)?;
    let report = mount.fsck()?;
    if report.is_empty() {
        println!("{image}: clean");
    } else {
        for line in &report {
            println!("{image}: {line}");
        }
        println!("{image}: {} problem(s) found", report.len());
    }
    mount.release()
}

fn cmd_shell(
    image: &str,
    blocks: Option<u64>,
    key_file: Option<&std::path::Path>,
    cache: bool,
) -> Result<()> {
    let device = build_device(image, blocks, key_file, cache)?;
    let mount = mount_for(image, device)?;
    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        print!("efs> ");
        io::stdout().flush().ok();
        line.clear();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let words: Vec<&str> = line.split_whitespace().collect();
        let Some(&cmd) = words.first() else { continue };
        if cmd == "quit" || cmd == "exit" {
            break;
        }
        if let Err(e) = dispatch(&mount, cmd, &words[1..]) {
            println!("error: {e}");
        }
    }
    mount.release()
}

fn dispatch(mount: &Mount, cmd: &str, args: &[&str]) -> Result<()> {
    match cmd {
        "ls" => {
            let path = args.first().copied().unwrap_or("/");
            let fd = mount.opendir(path)?;
            let mut entries = mount.readdir(fd)?;
            mount.closedir(fd)?;
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            for (name, inum, ft) in entries {
                let tag = match ft {
                    FileType::Directory => "d",
                    FileType::RegularFile => "f",
                };
                println!("{tag} {inum:>6} {name}");
            }
            Ok(())
        }
        "cat" => {
            let path = args.first().copied().ok_or(EfsError::InvalidArg)?;
            let fd = mount.open(path, OpenFlags::empty())?;
            let mut buf = vec![0u8; BLOCK_SIZE];
            loop {
                let n = mount.read(fd, &mut buf)?;
                if n == 0 {
                    break;
                }
                io::stdout().write_all(&buf[..n])?;
            }
            println!();
            mount.close(fd)
        }
        "write" => {
            let path = args.first().copied().ok_or(EfsError::InvalidArg)?;
            let text = args[1..].join(" ");
            let fd = mount.open(path, OpenFlags::CREATE | OpenFlags::TRUNC)?;
            mount.write(fd, text.as_bytes())?;
            mount.close(fd)
        }
        "mkdir" => {
            let path = args.first().copied().ok_or(EfsError::InvalidArg)?;
            mount.mkdir(path).map(|_| ())
        }
        "rm" => {
            let path = args.first().copied().ok_or(EfsError::InvalidArg)?;
            mount.unlink(path)
        }
        "rmdir" => {
            let path = args.first().copied().ok_or(EfsError::InvalidArg)?;
            mount.rmdir(path)
        }
        "mv" => {
            let (from, to) = (
                args.first().copied().ok_or(EfsError::InvalidArg)?,
                args.get(1).copied().ok_or(EfsError::InvalidArg)?,
            );
            mount.rename(from, to)
        }
        "ln" => {
            let (from, to) = (
                args.first().copied().ok_or(EfsError::InvalidArg)?,
                args.get(1).copied().ok_or(EfsError::InvalidArg)?,
            );
            mount.link(from, to)
        }
        "stat" => {
            let path = args.first().copied().ok_or(EfsError::InvalidArg)?;
            let st = mount.stat(path)?;
            println!(
                "inode={} type={:?} size={} nlinks={}",
                st.inode_number, st.file_type, st.size, st.nlinks
            );
            Ok(())
        }
        "truncate" => {
            let path = args.first().copied().ok_or(EfsError::InvalidArg)?;
            let len: u64 = args
                .get(1)
                .and_then(|s| s.parse().ok())
                .ok_or(EfsError::InvalidArg)?;
            mount.truncate(path, len)
        }
        _ => {
            println!("unknown command: {cmd}");
            Ok(())
        }
    }
}
