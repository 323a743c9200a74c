//! Command-line argument parsing.
//!
//! Usage:
//!   luainvoke [switches] [--] [<script> [<args>…]]
//!   luainvoke [switches] -e <code> [-e <code>…] [<args>…]
//!
//! Switches are described in [`crate::config`].  The first non-switch
//! argument is the script; everything after it belongs to the script.
//! With neither a script nor `-e`, the script is read from stdin.

use std::path::PathBuf;

use crate::config::InvokerConfig;
use crate::configure::path_separator;

/// Environment variable holding extra library directories.
pub const LIB_ENV: &str = "LUAINVOKE_LIB";

pub const USAGE: &str = "\
Usage: luainvoke [-napldw] [-W#] [-F<re>] [-I<dir>] [-r<lib>] [-D<k>=<v>] [-f<file>] [--] [<script> [<args>...]]
       luainvoke [switches] -e <code> [<args>...]";

// ── Public types ──────────────────────────────────────────────────────────────

/// Where the script text comes from.
#[derive(Debug, Default, PartialEq, Eq)]
pub enum ScriptArg {
    /// No script argument, or `-`.
    #[default]
    Stdin,
    File(PathBuf),
    /// `-e` lines joined with newlines.
    Inline(String),
}

/// Parsed command-line arguments.
#[derive(Debug, Default)]
pub struct CliArgs {
    pub config: InvokerConfig,
    pub script: ScriptArg,
    /// Arguments passed through to the script's `ARGV`.
    pub args: Vec<String>,
    /// `-h` / `--help`.
    pub help: bool,
    /// `--version`.
    pub version: bool,
}

// ── Parsing ───────────────────────────────────────────────────────────────────

/// Parse `std::env::args()` and return [`CliArgs`] or an error message.
pub fn parse_args() -> Result<CliArgs, String> {
    let raw: Vec<String> = std::env::args().collect();
    parse_argv(raw.get(1..).unwrap_or_default())
}

/// Parse a slice of argument strings (exposed for testing).
pub fn parse_argv(argv: &[String]) -> Result<CliArgs, String> {
    let mut args = CliArgs::default();
    let mut positional: Vec<String> = Vec::new();
    let mut i = 0;

    while i < argv.len() {
        let arg = argv[i].as_str();

        // `--` ends switch processing.
        if arg == "--" {
            positional.extend(argv[i + 1..].iter().cloned());
            break;
        }

        match arg {
            "-h" | "--help" => args.help = true,
            "--version" => args.version = true,
            // The script name: it and everything after it are positional.
            _ if !arg.starts_with('-') || arg == "-" => {
                positional.extend(argv[i..].iter().cloned());
                break;
            }
            _ if arg.starts_with("--") => return Err(format!("unknown option: {arg}")),
            _ => args.config.apply_switch(argv, &mut i)?,
        }
        i += 1;
    }

    if !args.config.inline.is_empty() {
        args.script = ScriptArg::Inline(args.config.inline.join("\n"));
        args.args = positional;
    } else if !positional.is_empty() {
        let script = positional.remove(0);
        args.script = if script == "-" { ScriptArg::Stdin } else { ScriptArg::File(PathBuf::from(script)) };
        args.args = positional;
    }

    Ok(args)
}

// ── Path helpers ──────────────────────────────────────────────────────────────

/// Library search directories, in priority order.
///
/// `-I` dirs → `LUAINVOKE_LIB` (a path-separator list) → the per-user data
/// directory's `lib/`, if it exists.
pub fn resolve_libdirs(cli_dirs: &[String]) -> Vec<String> {
    let mut dirs: Vec<String> = cli_dirs.to_vec();
    if let Ok(env) = std::env::var(LIB_ENV) {
        dirs.extend(
            env.split(path_separator())
                .filter(|d| !d.is_empty())
                .map(str::to_owned),
        );
    }
    if let Some(user) = user_libdir() {
        if user.is_dir() {
            dirs.push(user.display().to_string());
        }
    }
    dirs
}

/// `<data dir>/lib`, e.g. `~/.local/share/luainvoke/lib` on Linux.
pub fn user_libdir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "luainvoke").map(|p| p.data_dir().join("lib"))
}

/// Display name for a script argument (used in diagnostics).
pub fn script_label(script: &ScriptArg) -> String {
    match script {
        ScriptArg::Stdin => "-".to_owned(),
        ScriptArg::File(p) => p.display().to_string(),
        ScriptArg::Inline(_) => "-e".to_owned(),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
