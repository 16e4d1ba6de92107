pub mod command;
pub mod parse;

use crate::shell::{command::execute_command, parse::parse_command};
use colored::*;
use crossterm::{
    cursor, execute,
    style::{Color, Print, ResetColor, SetForegroundColor},
    terminal::{Clear, ClearType},
};
use indicatif::{ProgressBar, ProgressStyle};
use reedline::{
    DefaultCompleter, DefaultPrompt, DefaultPromptSegment, FileBackedHistory, Reedline, Signal,
};
use sgfs::{
    disk::init::{perform_disk_initialization, BootProgress, InitRequest, MountedFs},
    fs::error::FileSystemError,
};
use std::{
    io::{self, stdout},
    path::{Path, PathBuf},
    sync::mpsc,
    thread,
};

const COMMANDS: [&str; 16] = [
    "help", "info", "df", "check", "ialloc", "ifree", "stat", "balloc", "bfree", "map", "bmap",
    "truncate", "format", "sync", "exit", "quit",
];

/// 交互期间的状态：镜像路径和当前挂载的文件系统
pub struct ShellState {
    pub image: PathBuf,
    pub fs: Option<MountedFs>,
}

pub fn start_shell(image: PathBuf) {
    let fs = boot(&image);
    let mut state = ShellState { image, fs };

    let username = whoami::username();
    let hostname = whoami::fallible::hostname().unwrap_or_else(|_| "localhost".to_string());

    println!(
        "{}",
        "Type 'help' for available commands. Use ↑↓ for history, Tab for auto-completion.\n"
            .bright_black()
    );

    let history_path = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".sgfs_history");

    let mut line_editor = Reedline::create();
    match FileBackedHistory::with_file(100, history_path) {
        Ok(history) => line_editor = line_editor.with_history(Box::new(history)),
        Err(e) => println!("{} {}", "⚠️  History disabled:".yellow(), e),
    }

    let completer = DefaultCompleter::new_with_wordlen(
        COMMANDS.iter().map(|c| c.to_string()).collect(),
        2,
    );
    line_editor = line_editor.with_completer(Box::new(completer));

    loop {
        let image_name = state
            .image
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let left = format!(
            "{}:{}",
            format!("{}@{}", username, hostname).green(),
            image_name.blue()
        );
        let right = if state.fs.is_some() { "SGFS" } else { "unmounted" };
        let prompt = DefaultPrompt::new(
            DefaultPromptSegment::Basic(left),
            DefaultPromptSegment::Basic(right.bright_blue().bold().to_string()),
        );

        match line_editor.read_line(&prompt) {
            Ok(Signal::Success(buffer)) => {
                let trimmed = buffer.trim();
                if trimmed.is_empty() {
                    continue;
                }

                match parse_command(trimmed) {
                    Some(cmd) => {
                        if let Err(e) = execute_command(&cmd, &mut state) {
                            println!("{} {}", "❌ Error:".red().bold(), e);
                        }
                        if matches!(cmd, command::Command::Exit) {
                            break;
                        }
                    }
                    None => println!(
                        "{}",
                        "⚠️  Unknown command or bad arguments. Type 'help' for command list."
                            .yellow()
                    ),
                }
            }
            Ok(Signal::CtrlC) => {
                println!();
                continue;
            }
            Ok(Signal::CtrlD) => {
                println!("{}", "Exiting SGFS...".yellow());
                break;
            }
            #[allow(unreachable_patterns)]
            Ok(_) => continue,
            Err(e) => {
                println!("Error reading line: {}", e);
                break;
            }
        }
    }

    // 退出前把位图和计数器落盘
    if let Some(fs) = state.fs.take() {
        if let Err(e) = fs.unmount() {
            println!("{} {}", "❌ Unmount failed:".red().bold(), e);
        }
    }
    println!("{}", "GoodBye!".bright_yellow());
}

/// 在后台线程里初始化磁盘，前台用进度条展示过程
pub(crate) fn run_initialization(
    image: &Path,
    request: InitRequest,
) -> Result<MountedFs, FileSystemError> {
    let (tx, rx) = mpsc::channel();
    let path = image.to_path_buf();
    let worker = thread::spawn(move || perform_disk_initialization(&path, &request, tx));

    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::with_template("[{bar:40.cyan/blue}] {pos:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );

    let mut outcome = None;
    // 发送端随工作线程结束而关闭
    for msg in rx {
        match msg {
            BootProgress::Step(step) => {
                pb.println(step);
                pb.set_message(step);
            }
            BootProgress::Progress(pos) => pb.set_position(pos),
            BootProgress::Finished(result) => outcome = Some(result),
        }
    }
    let _ = worker.join();

    match outcome {
        Some(Ok(fs)) => {
            pb.finish_with_message("✅ Ready!");
            Ok(fs)
        }
        Some(Err(e)) => {
            pb.abandon_with_message("❌ Failed");
            Err(e)
        }
        None => {
            pb.abandon_with_message("❌ Failed");
            Err(io::Error::other("initialization thread exited without a result").into())
        }
    }
}

/// 启动画面，随后挂载镜像；失败时仍进入 shell，以便重新 format
fn boot(image: &Path) -> Option<MountedFs> {
    let mut stdout = stdout();

    let _ = execute!(stdout, Clear(ClearType::All), cursor::MoveTo(0, 0));
    println!("{}", "[SGFS Booting...]".bright_yellow().bold());
    println!("{} {}", "💽 Image:".bright_black(), image.display());

    let fs = match run_initialization(image, InitRequest::default()) {
        Ok(fs) => Some(fs),
        Err(e) => {
            println!("{} {}", "❌ Mount failed:".red().bold(), e);
            println!("{}", "Run 'format' to re-initialize the image.".bright_black());
            return None;
        }
    };

    let _ = execute!(
        stdout,
        SetForegroundColor(Color::Cyan),
        Print(format!("Welcome to SGFS v{}\n", env!("CARGO_PKG_VERSION"))),
        ResetColor
    );
    fs
}
