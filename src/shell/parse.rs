use sgfs::fs::inode::FileType;

use crate::shell::command::Command;

pub fn parse_command(input: &str) -> Option<Command> {
    let tokens: Vec<&str> = input.split_ascii_whitespace().collect();
    if tokens.is_empty() {
        return None;
    }

    let cmd = tokens[0];
    let args = &tokens[1..];
    let num = |i: usize| args.get(i).and_then(|s| s.parse::<u64>().ok());

    match cmd {
        "help" => Some(Command::Help),
        "info" => Some(Command::Info),
        "df" => Some(Command::Df),
        "check" => Some(Command::Check),
        "sync" => Some(Command::Sync),
        "ialloc" => match args.first().copied() {
            Some("file") | None => Some(Command::AllocInode(FileType::Regular)),
            Some("dir") => Some(Command::AllocInode(FileType::Directory)),
            Some(_) => None,
        },
        "ifree" => num(0).map(Command::FreeInode),
        "stat" => num(0).map(Command::Stat),
        "balloc" => Some(Command::AllocBlock),
        "bfree" => args
            .first()
            .and_then(|s| s.parse::<u32>().ok())
            .map(Command::FreeBlock),
        "map" => Some(Command::Map(num(0)?, num(1)?)),
        "bmap" => Some(Command::Bmap(num(0)?, num(1)?)),
        "truncate" => {
            let size = args.get(1)?.parse::<u32>().ok()?;
            Some(Command::Truncate(num(0)?, size))
        }
        "format" => {
            let raw = args.contains(&"--raw");
            let block_size = match args.iter().find(|a| !a.starts_with("--")) {
                Some(s) => Some(s.parse::<u32>().ok()?),
                None => None,
            };
            Some(Command::Format { block_size, raw })
        }
        "exit" | "quit" => Some(Command::Exit),
        _ => None,
    }
}
