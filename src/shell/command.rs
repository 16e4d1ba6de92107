use colored::*;
use dialoguer::Confirm;
use std::error::Error;

use sgfs::{
    disk::init::{InitRequest, MountedFs},
    fs::{config::FormatOptions, inode::FileType},
    utils::format_timestamp,
};

use crate::shell::{run_initialization, ShellState};

#[derive(Debug)]
pub enum Command {
    Help,
    Info,
    Df,
    Check,
    Sync,
    AllocInode(FileType),
    FreeInode(u64),
    Stat(u64),
    AllocBlock,
    FreeBlock(u32),
    Map(u64, u64),
    Bmap(u64, u64),
    Truncate(u64, u32),
    Format { block_size: Option<u32>, raw: bool },
    Exit,
}

fn mounted(state: &mut ShellState) -> Result<&mut MountedFs, Box<dyn Error>> {
    state
        .fs
        .as_mut()
        .ok_or_else(|| "no file system is mounted, run 'format' first".into())
}

pub fn execute_command(cmd: &Command, state: &mut ShellState) -> Result<(), Box<dyn Error>> {
    match cmd {
        Command::Help => print_help(),
        Command::Info => print_info(mounted(state)?),
        Command::Df => {
            let sb = *mounted(state)?.super_block();
            println!(
                "🧱 blocks: {} free / {} total",
                sb.free_blocks.to_string().green(),
                sb.total_blocks
            );
            println!(
                "📇 inodes: {} free / {} total",
                sb.free_inodes.to_string().green(),
                sb.total_inodes
            );
        }
        Command::Check => {
            let report = mounted(state)?.check()?;
            println!(
                "🔍 {} inodes in use, {} blocks referenced",
                report.inodes_in_use, report.blocks_referenced
            );
            if report.is_clean() {
                println!("{}", "✅ File system is consistent".green());
            } else {
                for problem in &report.problems {
                    println!("{} {}", "⚠️ ".yellow(), problem);
                }
            }
        }
        Command::Sync => {
            mounted(state)?.sync()?;
            println!("{}", "💾 Synced".green());
        }
        Command::AllocInode(file_type) => {
            let inode = mounted(state)?.alloc_inode(*file_type)?;
            println!(
                "📝 Allocated {} inode in slot {}",
                file_type,
                inode.slot().unwrap_or_default().to_string().green()
            );
        }
        Command::FreeInode(n) => {
            mounted(state)?.free_inode(*n)?;
            println!("❌ Freed inode {}", n.to_string().red());
        }
        Command::Stat(n) => {
            let fs = mounted(state)?;
            let inode = fs.read_inode(*n)?;
            println!("{}", "📊 Inode Info".bright_yellow().bold());
            println!("{}: {}", "Slot".blue(), n);
            println!("{}: {}", "Number".blue(), inode.inode_number);
            println!("{}: {}", "Type".blue(), inode.file_type);
            println!("{}: {:o}", "Mode".blue(), inode.permissions.bits());
            println!("{}: {} bytes", "Size".blue(), inode.file_size);
            println!("{}: {:?}", "Direct".blue(), inode.direct_blocks);
            println!("{}: {}", "Indirect".blue(), inode.indirect_block);
            println!("{}: {}", "Double".blue(), inode.double_indirect_block);
            println!("{}: {}", "Created".blue(), format_timestamp(inode.creation_time));
            println!("{}: {}", "Modified".blue(), format_timestamp(inode.modification_time));
            println!("{}: {}", "Accessed".blue(), format_timestamp(inode.access_time));
        }
        Command::AllocBlock => {
            let block = mounted(state)?.alloc_block()?;
            println!("🧱 Allocated block {}", block.to_string().green());
        }
        Command::FreeBlock(block) => {
            mounted(state)?.free_block(*block)?;
            println!("🗑️ Freed block {}", block.to_string().red());
        }
        Command::Map(n, logical) => {
            let block = mounted(state)?.map_block(*n, *logical)?;
            println!(
                "🔗 inode {} logical {} → block {}",
                n,
                logical,
                block.to_string().green()
            );
        }
        Command::Bmap(n, logical) => {
            let fs = mounted(state)?;
            let inode = fs.read_inode(*n)?;
            match fs.logical_to_physical(&inode, *logical)? {
                Some(block) => println!(
                    "🔗 inode {} logical {} → block {}",
                    n,
                    logical,
                    block.to_string().green()
                ),
                None => println!(
                    "{}",
                    format!("inode {} logical {} is a hole", n, logical).bright_black()
                ),
            }
        }
        Command::Truncate(n, size) => {
            mounted(state)?.truncate(*n, *size)?;
            println!("✂️  inode {} truncated to {} bytes", n, size);
        }
        Command::Format { block_size, raw } => {
            let confirmed = Confirm::new()
                .with_prompt(format!(
                    "Format {} with SGFS? Everything on it will be lost",
                    state.image.display()
                ))
                .default(false)
                .interact()?;
            if !confirmed {
                println!("{}", "Cancelled".bright_black());
                return Ok(());
            }

            if let Some(fs) = state.fs.take() {
                fs.unmount()?;
            }
            let request = InitRequest {
                partitioned: !raw,
                force_format: true,
                format: block_size
                    .map(FormatOptions::with_block_size)
                    .unwrap_or_default(),
                ..InitRequest::default()
            };
            state.fs = Some(run_initialization(&state.image, request)?);
            println!("{}", "✅ Disk formatted successfully!".green());
        }
        Command::Exit => println!("{}", "👋 Exiting SGFS shell...".yellow().bold()),
    }

    Ok(())
}

fn print_info(fs: &MountedFs) {
    let sb = fs.super_block();
    println!("{}", "📘 Superblock".bright_cyan().bold());
    println!("  magic          {:#010x}", sb.magic);
    println!("  version        {}", sb.version);
    println!("  block size     {} bytes", sb.block_size);
    println!("  inode size     {} bytes", sb.inode_size);
    println!("  total blocks   {}", sb.total_blocks);
    println!("  total inodes   {}", sb.total_inodes);
    println!("  free blocks    {}", sb.free_blocks);
    println!("  free inodes    {}", sb.free_inodes);
    println!("  max file size  {} blocks", fs.block_map().max_blocks());
    if fs.disk().offset() != 0 {
        println!("  volume offset  {} bytes (GPT partition)", fs.disk().offset());
    }

    println!("{}", "🗺️  Layout".bright_cyan().bold());
    for (region, range) in sb.regions() {
        println!(
            "  {:<13} {:>9} .. {:<9} {}",
            region,
            range.start,
            range.end,
            format!("({} blocks)", range.end - range.start).bright_black()
        );
    }
}

fn print_help() {
    println!("{}", "📘 SGFS Commands".bright_cyan().bold());
    println!(
        "{}",
        "
  info                      Show superblock and region layout
  df                        Show free block / inode counters
  check                     Verify bitmaps, counters and block pointers
  ialloc [file|dir]         Allocate an inode
  ifree <slot>              Free an inode and all of its blocks
  stat <slot>               Show an inode
  balloc                    Allocate a data block
  bfree <block>             Free a data block
  map <slot> <logical>      Map a logical block of an inode (allocating as needed)
  bmap <slot> <logical>     Translate a logical block to a physical block
  truncate <slot> <bytes>   Set file size, releasing blocks past the end
  format [block_size] [--raw]  Re-format the image (GPT unless --raw)
  sync                      Flush everything to disk
  help                      Show this help message
  exit                      Quit the shell
"
        .bright_black()
    );
}
