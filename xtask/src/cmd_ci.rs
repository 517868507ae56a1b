use crate::error::{Result, XtaskError};
use crate::paths;
use crate::runner::Runner;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Library crates whose non-test code must propagate errors instead of panicking.
const LIBRARY_CRATES: &[&str] = &["crates/uvm-hwref", "crates/uvm-core"];

const FORBIDDEN: &[&str] = &[".unwrap()", ".expect("];

#[derive(Debug)]
struct PanickingCall {
    path: PathBuf,
    line: usize,
    pattern: &'static str,
}

fn collect_rs_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    let entries = fs::read_dir(dir).map_err(|e| {
        XtaskError::Message(format!(
            "ci: failed to read dir {}: {e}",
            paths::display_rel_path(dir)
        ))
    })?;
    for entry in entries {
        let entry = entry.map_err(|e| {
            XtaskError::Message(format!(
                "ci: failed to read dir entry in {}: {e}",
                paths::display_rel_path(dir)
            ))
        })?;
        let path = entry.path();
        if path.is_dir() {
            collect_rs_files(&path, out)?;
            continue;
        }
        // `foo/tests.rs` holds the `#[cfg(test)] mod tests;` body of `foo.rs`.
        if path.extension() == Some(OsStr::new("rs")) && path.file_name() != Some(OsStr::new("tests.rs")) {
            out.push(path);
        }
    }
    Ok(())
}

/// Returns `(line, pattern)` for every panicking call before the file's first `#[cfg(test)]`.
pub fn panicking_calls(contents: &str) -> Vec<(usize, &'static str)> {
    let mut hits = Vec::new();
    for (idx, line) in contents.lines().enumerate() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("#[cfg(test)]") {
            break;
        }
        if trimmed.starts_with("//") {
            continue;
        }
        for &needle in FORBIDDEN {
            if line.contains(needle) {
                hits.push((idx + 1, needle));
            }
        }
    }
    hits
}

fn check_library_sources(repo_root: &Path) -> Result<()> {
    let mut files = Vec::new();
    for krate in LIBRARY_CRATES {
        let src_dir = repo_root.join(krate).join("src");
        if !src_dir.is_dir() {
            return Err(XtaskError::Message(format!(
                "ci: expected directory missing: {}",
                paths::display_rel_path(&src_dir)
            )));
        }
        collect_rs_files(&src_dir, &mut files)?;
    }
    files.sort();

    let mut hits = Vec::new();
    for file in files {
        let contents = fs::read_to_string(&file).map_err(|e| {
            XtaskError::Message(format!(
                "ci: failed to read {}: {e}",
                paths::display_rel_path(&file)
            ))
        })?;
        for (line, pattern) in panicking_calls(&contents) {
            hits.push(PanickingCall {
                path: file.clone(),
                line,
                pattern,
            });
        }
    }

    if hits.is_empty() {
        return Ok(());
    }
    let mut msg = String::from("ci: panicking calls in library code:\n");
    for hit in hits {
        msg.push_str(&format!(
            "- {}:{}: `{}`\n",
            paths::display_rel_path(&hit.path),
            hit.line,
            hit.pattern
        ));
    }
    msg.push_str("\nPropagate a `UvmError` with `?` instead.\n");
    Err(XtaskError::Message(msg))
}

pub fn print_help() {
    println!(
        "\
Build, lint and test the whole workspace the way CI does.

Usage:
  cargo xtask ci [--locked] [--no-fmt]

Steps:
  - library sources: no unwrap()/expect() outside #[cfg(test)]
  - cargo fmt --all --check (skipped with --no-fmt)
  - cargo check --workspace --all-targets
  - cargo test --workspace
"
    );
}

pub fn cmd(args: Vec<String>) -> Result<()> {
    if args.iter().any(|a| a == "-h" || a == "--help") {
        print_help();
        return Ok(());
    }
    let mut force_locked = false;
    let mut fmt = true;
    for arg in args {
        match arg.as_str() {
            "--locked" => force_locked = true,
            "--no-fmt" => fmt = false,
            other => {
                return Err(XtaskError::Message(format!(
                    "unexpected argument for `ci`: `{other}` (run `cargo xtask ci --help`)"
                )));
            }
        }
    }

    let repo_root = paths::repo_root()?;
    let runner = Runner::new();

    check_library_sources(&repo_root)?;

    if fmt {
        let mut cmd = Command::new("cargo");
        cmd.current_dir(&repo_root).args(["fmt", "--all", "--check"]);
        runner.run_step("Rust: cargo fmt --check", &mut cmd)?;
    }

    let cargo_locked = force_locked || repo_root.join("Cargo.lock").is_file();
    for (desc, args) in [
        ("Rust: cargo check (all targets)", &["check", "--workspace", "--all-targets"][..]),
        ("Rust: cargo test", &["test", "--workspace"][..]),
    ] {
        let mut cmd = Command::new("cargo");
        cmd.current_dir(&repo_root).args(args);
        if cargo_locked {
            cmd.arg("--locked");
        }
        runner.run_step(desc, &mut cmd)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calls_after_the_test_module_are_allowed() {
        let src = "fn a() -> u32 {\n    x.unwrap_or(1)\n}\n\n#[cfg(test)]\nmod tests {\n    fn b() { y.unwrap(); }\n}\n";
        assert!(panicking_calls(src).is_empty());
    }

    #[test]
    fn calls_in_library_code_are_reported() {
        let src = "fn a() {\n    // z.unwrap() in a comment\n    x.unwrap();\n    y.expect(\"set\");\n}\n";
        assert_eq!(panicking_calls(src), vec![(3, ".unwrap()"), (4, ".expect(")]);
    }
}
