//! Switch parsing and options files.
//!
//! [`InvokerConfig`] collects everything a host can set with switches and
//! transfers it onto a [`ScriptInvoker`] with [`InvokerConfig::apply_to`].
//!
//! Switches (combinable, values attached or in the next token):
//!
//! | Switch        | Effect                                    |
//! |---------------|-------------------------------------------|
//! | `-n` `-p` `-a` `-l` | loop switches                        |
//! | `-d`          | debug                                     |
//! | `-w`, `-W[#]` | warning level (`-w` and bare `-W` are 2)  |
//! | `-F<re>`      | field separator for `-a`                  |
//! | `-I<dir>`     | library path                              |
//! | `-r<lib>`     | required library                          |
//! | `-D<k>=<v>`   | input binding                             |
//! | `-e<code>`    | inline script line                        |
//! | `-f<file>`    | options file                              |
//!
//! Options files hold one directive per line:
//!
//! | Line                          | Action                        |
//! |-------------------------------|-------------------------------|
//! | `# …` or `; …`                | comment, ignored              |
//! | `-n -I lib …`                 | switches, as on the command line |
//! | `input <name>=<value>` or `input <name> <value>` | input binding |
//! | anything else                 | silently skipped              |

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use thiserror::Error;

use crate::configure::Switches;
use crate::invoker::ScriptInvoker;
use crate::value::ScriptValue;

/// Environment variable holding extra switches.
pub const OPT_ENV: &str = "LUAINVOKE_OPT";

// ── Public API ────────────────────────────────────────────────────────────────

/// A non-fatal error encountered while loading an options file.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {message}")]
pub struct ConfigError {
    pub line: usize,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InvokerConfig {
    pub switches: Switches,
    pub lib_paths: Vec<String>,
    pub req_libs: Vec<String>,
    pub inputs: IndexMap<String, String>,
    /// `-e` lines, in order.
    pub inline: Vec<String>,
    pub options_file: Option<PathBuf>,
}

impl InvokerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply the switch token `argv[*i]`, advancing `*i` past any value
    /// token it consumes.
    pub fn apply_switch(&mut self, argv: &[String], i: &mut usize) -> Result<(), String> {
        let arg = argv[*i].as_str();
        let chars: Vec<char> = arg.strip_prefix('-').unwrap_or(arg).chars().collect();
        let mut j = 0;

        while j < chars.len() {
            match chars[j] {
                'n' => self.switches.assume_loop = true,
                'p' => self.switches.assume_print_loop = true,
                'a' => self.switches.auto_split = true,
                'l' => self.switches.process_line_ends = true,
                'd' => self.switches.debug = true,
                'w' => self.switches.warning = 2,

                // -W[level]
                'W' => {
                    let digits: String = chars[j + 1..].iter().take_while(|c| c.is_ascii_digit()).collect();
                    j += digits.len();
                    self.switches.warning = if digits.is_empty() {
                        2
                    } else {
                        digits.parse().map_err(|_| format!("invalid warning level: {digits}"))?
                    };
                }

                'F' => self.switches.field_separator = Some(take_value(&chars, &mut j, argv, i, 'F')?),
                'I' => self.lib_paths.push(take_value(&chars, &mut j, argv, i, 'I')?),
                'r' => self.req_libs.push(take_value(&chars, &mut j, argv, i, 'r')?),
                'e' => self.inline.push(take_value(&chars, &mut j, argv, i, 'e')?),
                'f' => self.options_file = Some(PathBuf::from(take_value(&chars, &mut j, argv, i, 'f')?)),

                // -D<key>=<value>
                'D' => {
                    let binding = take_value(&chars, &mut j, argv, i, 'D')?;
                    let (key, value) = binding
                        .split_once('=')
                        .ok_or_else(|| format!("-D expects <key>=<value>, got `{binding}`"))?;
                    if key.is_empty() {
                        return Err("-D: input name cannot be empty".to_owned());
                    }
                    self.inputs.insert(key.to_owned(), value.to_owned());
                }

                c => return Err(format!("unknown option: -{c}")),
            }
            j += 1;
        }
        Ok(())
    }

    /// Apply a list made only of switch tokens.
    pub fn apply_switches(&mut self, tokens: &[String]) -> Result<(), String> {
        let mut i = 0;
        while i < tokens.len() {
            let tok = &tokens[i];
            if !tok.starts_with('-') || tok == "-" || tok == "--" {
                return Err(format!("expected a switch, got `{tok}`"));
            }
            self.apply_switch(tokens, &mut i)?;
            i += 1;
        }
        Ok(())
    }

    /// Parse an options file's text.
    ///
    /// Returns the config and a list of errors on recognised lines; the
    /// remaining lines still apply.
    pub fn load_str(s: &str) -> (Self, Vec<ConfigError>) {
        let mut config = InvokerConfig::new();
        let mut errors = Vec::new();

        for (i, raw) in s.lines().enumerate() {
            let lineno = i + 1;
            let line = raw.trim();

            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            if line.starts_with('-') {
                if let Err(message) = config.apply_switches(&split_args(line)) {
                    errors.push(ConfigError { line: lineno, message });
                }
                if config.options_file.take().is_some() {
                    errors.push(ConfigError { line: lineno, message: "nested options files are not supported".into() });
                }
                continue;
            }

            let (directive, rest) = line.split_once(|c: char| c.is_ascii_whitespace()).unwrap_or((line, ""));
            match directive {
                "input" => {
                    if let Err(message) = parse_input(&split_args(rest.trim()), &mut config.inputs) {
                        errors.push(ConfigError { line: lineno, message });
                    }
                }
                _ => tracing::debug!(line = lineno, directive, "options file: skipping unknown directive"),
            }
        }

        (config, errors)
    }

    pub fn load_file(path: &Path) -> std::io::Result<(Self, Vec<ConfigError>)> {
        let s = std::fs::read_to_string(path)?;
        Ok(Self::load_str(&s))
    }

    /// Switches from [`OPT_ENV`], or an empty config if it is unset.
    pub fn from_env() -> Result<Self, String> {
        let mut config = InvokerConfig::new();
        if let Ok(opts) = std::env::var(OPT_ENV) {
            config
                .apply_switches(&split_args(&opts))
                .map_err(|e| format!("{OPT_ENV}: {e}"))?;
        }
        Ok(config)
    }

    /// Layer `other` on top of `self`: flags accumulate, lists append,
    /// single values and inputs from `other` win.
    pub fn merge(&mut self, other: InvokerConfig) {
        let s = &mut self.switches;
        let o = other.switches;
        s.assume_loop |= o.assume_loop;
        s.assume_print_loop |= o.assume_print_loop;
        s.auto_split |= o.auto_split;
        s.process_line_ends |= o.process_line_ends;
        s.debug |= o.debug;
        if o.warning != -1 {
            s.warning = o.warning;
        }
        if o.field_separator.is_some() {
            s.field_separator = o.field_separator;
        }
        self.lib_paths.extend(other.lib_paths);
        self.req_libs.extend(other.req_libs);
        self.inputs.extend(other.inputs);
        self.inline.extend(other.inline);
        if other.options_file.is_some() {
            self.options_file = other.options_file;
        }
    }

    /// Transfer every setting onto `invoker`.  Inputs are bound as strings.
    pub fn apply_to(&self, invoker: &mut ScriptInvoker) {
        let s = &self.switches;
        invoker.set_assume_loop(s.assume_loop);
        invoker.set_assume_print_loop(s.assume_print_loop);
        invoker.set_auto_split(s.auto_split);
        invoker.set_process_line_ends(s.process_line_ends);
        invoker.set_debug(s.debug);
        invoker.set_warning(s.warning);
        if let Some(sep) = &s.field_separator {
            invoker.set_field_separator(sep.clone());
        }
        for path in &self.lib_paths {
            invoker.add_lib_path(path.clone());
        }
        for lib in &self.req_libs {
            invoker.add_req_lib(lib.clone());
        }
        for (key, value) in &self.inputs {
            invoker.input_value(key.clone(), ScriptValue::Str(value.clone()));
        }
    }
}

fn take_value(chars: &[char], j: &mut usize, argv: &[String], i: &mut usize, switch: char) -> Result<String, String> {
    if *j + 1 < chars.len() {
        let value: String = chars[*j + 1..].iter().collect();
        *j = chars.len();
        Ok(value)
    } else if *i + 1 < argv.len() {
        *i += 1;
        Ok(argv[*i].clone())
    } else {
        Err(format!("-{switch} requires an argument"))
    }
}

// ── Argument tokenizer ────────────────────────────────────────────────────────

/// Split `s` into whitespace-delimited tokens, honouring double-quoted strings
/// and `\"` escapes within them.
pub fn split_args(s: &str) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();
    let mut cur = String::new();
    let mut in_quotes = false;
    let mut quoted = false;
    let mut chars = s.chars();

    while let Some(ch) = chars.next() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                quoted = true;
            }
            '\\' if in_quotes => {
                if let Some(escaped) = chars.next() {
                    cur.push(escaped);
                }
            }
            c if c.is_ascii_whitespace() && !in_quotes => {
                if !cur.is_empty() || quoted {
                    args.push(std::mem::take(&mut cur));
                }
                quoted = false;
            }
            c => cur.push(c),
        }
    }
    if !cur.is_empty() || quoted {
        args.push(cur);
    }
    args
}

// ── input ─────────────────────────────────────────────────────────────────────

/// Parse `input <name>=<value>` or `input <name> <value>`.
fn parse_input(tokens: &[String], inputs: &mut IndexMap<String, String>) -> Result<(), String> {
    if tokens.is_empty() {
        return Err("input: requires an argument".into());
    }

    let (name, value) = if let Some((name, value)) = tokens[0].split_once('=') {
        (name.to_owned(), value.to_owned())
    } else if tokens.len() >= 2 {
        (tokens[0].clone(), tokens[1..].join(" "))
    } else {
        return Err(format!("input: missing value for '{}'", tokens[0]));
    };

    if name.is_empty() {
        return Err("input: name cannot be empty".into());
    }

    inputs.insert(name, value);
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(args: &[&str]) -> Vec<String> {
        args.iter().map(|&s| s.to_owned()).collect()
    }

    // -- split_args -----------------------------------------------------------

    #[test]
    fn split_simple() {
        assert_eq!(split_args("-n -I lib"), ["-n", "-I", "lib"]);
    }

    #[test]
    fn split_quoted_spaces() {
        assert_eq!(split_args(r#"-e "print('a b')" -d"#), ["-e", "print('a b')", "-d"]);
    }

    #[test]
    fn split_keeps_empty_quoted_token() {
        assert_eq!(split_args(r#"-F "" -a"#), ["-F", "", "-a"]);
    }

    // -- switches -------------------------------------------------------------

    #[test]
    fn combined_flags() {
        let mut c = InvokerConfig::new();
        c.apply_switches(&toks(&["-nlad"])).unwrap();
        let s = &c.switches;
        assert!(s.assume_loop && s.process_line_ends && s.auto_split && s.debug);
        assert!(!s.assume_print_loop);
    }

    #[test]
    fn value_switches_attached_and_separate() {
        let mut c = InvokerConfig::new();
        c.apply_switches(&toks(&["-Ilib", "-I", "vendor", "-rfmt.lua", "-F,", "-Dname=x=y"])).unwrap();
        assert_eq!(c.lib_paths, ["lib", "vendor"]);
        assert_eq!(c.req_libs, ["fmt.lua"]);
        assert_eq!(c.switches.field_separator.as_deref(), Some(","));
        assert_eq!(c.inputs.get("name").map(String::as_str), Some("x=y"));
    }

    #[test]
    fn flag_then_value_in_one_token() {
        let mut c = InvokerConfig::new();
        c.apply_switches(&toks(&["-ne", "print(LINE)"])).unwrap();
        assert!(c.switches.assume_loop);
        assert_eq!(c.inline, ["print(LINE)"]);
    }

    #[test]
    fn warning_levels() {
        let level = |args: &[&str]| {
            let mut c = InvokerConfig::new();
            c.apply_switches(&toks(args)).unwrap();
            c.switches.warning
        };
        assert_eq!(level(&[]), -1);
        assert_eq!(level(&["-w"]), 2);
        assert_eq!(level(&["-W"]), 2);
        assert_eq!(level(&["-W0"]), 0);
        assert_eq!(level(&["-W1n"]), 1);
    }

    #[test]
    fn switch_errors() {
        let mut c = InvokerConfig::new();
        assert!(c.apply_switches(&toks(&["-z"])).is_err());
        assert!(c.apply_switches(&toks(&["-I"])).is_err());
        assert!(c.apply_switches(&toks(&["-Dnovalue"])).is_err());
        assert!(c.apply_switches(&toks(&["script.lua"])).is_err());
    }

    // -- options files --------------------------------------------------------

    #[test]
    fn options_file_lines() {
        let src = "\
# loop over input\n\
-n -l\n\
; libraries\n\
-I \"my libs\" -r fmt.lua\n\
input greeting hello world\n\
input count=3\n\
banner whatever\n\
";
        let (cfg, errs) = InvokerConfig::load_str(src);
        assert!(errs.is_empty(), "{errs:?}");
        assert!(cfg.switches.assume_loop && cfg.switches.process_line_ends);
        assert_eq!(cfg.lib_paths, ["my libs"]);
        assert_eq!(cfg.req_libs, ["fmt.lua"]);
        assert_eq!(cfg.inputs.get("greeting").map(String::as_str), Some("hello world"));
        assert_eq!(cfg.inputs.get("count").map(String::as_str), Some("3"));
    }

    #[test]
    fn options_file_errors_are_non_fatal() {
        let (cfg, errs) = InvokerConfig::load_str("-q\ninput\n-f other.opts\n-d");
        assert_eq!(errs.iter().map(|e| e.line).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(errs[0].to_string(), "line 1: unknown option: -q");
        assert!(cfg.switches.debug);
        assert!(cfg.options_file.is_none());
    }

    #[test]
    fn load_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.opts");
        std::fs::write(&path, "-p\n").unwrap();
        let (cfg, errs) = InvokerConfig::load_file(&path).unwrap();
        assert!(errs.is_empty());
        assert!(cfg.switches.assume_print_loop);
    }

    // -- merge / apply_to -----------------------------------------------------

    #[test]
    fn merge_layers() {
        let mut base = InvokerConfig::new();
        base.apply_switches(&toks(&["-n", "-W0", "-Ia", "-Dk=base"])).unwrap();
        let mut top = InvokerConfig::new();
        top.apply_switches(&toks(&["-p", "-Ib", "-Dk=top"])).unwrap();
        base.merge(top);
        assert!(base.switches.assume_loop && base.switches.assume_print_loop);
        assert_eq!(base.switches.warning, 0);
        assert_eq!(base.lib_paths, ["a", "b"]);
        assert_eq!(base.inputs.get("k").map(String::as_str), Some("top"));
    }

    #[test]
    fn apply_to_invoker() {
        let mut c = InvokerConfig::new();
        c.apply_switches(&toks(&["-na", "-Ilib", "-rx.lua", "-Dk=v"])).unwrap();
        let mut inv = ScriptInvoker::from_source("");
        c.apply_to(&mut inv);
        assert!(inv.switches().assume_loop && inv.switches().auto_split);
        assert_eq!(inv.lib_paths(), ["lib"]);
        assert_eq!(inv.req_libs(), ["x.lua"]);
        assert_eq!(inv.inputs().get("k"), Some(&ScriptValue::Str("v".into())));
    }
}
