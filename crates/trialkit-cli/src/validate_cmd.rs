//! `trialkit validate` command: parse task files without running them.

use std::path::PathBuf;

use crate::task_file::load_task_file;

/// Run the validate command. Returns whether every file parsed.
pub fn run_validate(files: &[PathBuf]) -> bool {
    let mut ok = 0usize;
    for path in files {
        match load_task_file(path) {
            Ok(task) => {
                ok += 1;
                println!(
                    "ok    {} -- {} ({}, {} trial(s))",
                    path.display(),
                    task.name(),
                    task.kind(),
                    task.trials()
                );
            }
            Err(e) => println!("error {} -- {e:#}", path.display()),
        }
    }
    println!();
    println!("{ok}/{} task file(s) valid", files.len());
    ok == files.len()
}
