use std::{env, path::PathBuf};

use sgfs::disk::DEFAULT_IMAGE_PATH;

use crate::shell::start_shell;

mod shell;

fn main() {
    let image = env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_IMAGE_PATH));
    start_shell(image);
}
