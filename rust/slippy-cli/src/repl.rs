//! Interactive read-eval-print loop.
//!
//! One [`Machine`] lives for the whole session, so definitions made on one
//! line stay visible on the next. Input keeps accumulating while its
//! parentheses are unbalanced.

use crate::colors::{bold, cyan, gray, green, red, yellow};
use crate::config::SlippyConfig;
use rustyline::completion::{Completer, Pair};
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::Validator;
use rustyline::{Context, Editor, Helper};
use slippy_compiler::compiler::emit::emit_text;
use slippy_compiler::{compile_src, generate_src};
use slippy_vm::{primitives, EvalError, Machine, MachineConfig, MachineStats, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Environment variable used to override REPL history location.
pub const REPL_HISTORY_PATH_ENV: &str = "SLIPPY_REPL_HISTORY_PATH";

const COMMANDS: &[&str] = &[":help", ":quit", ":reset", ":compile", ":emit", ":stats"];

const SPECIAL_FORMS: &[&str] = &["define", "lambda", "if", "set!", "begin", "let", "quote"];

/// Completes commands at the start of a line and names everywhere else.
struct SlippyCompleter;

impl Completer for SlippyCompleter {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        let start = line[..pos]
            .rfind(|c: char| c.is_whitespace() || c == '(' || c == '\'')
            .map(|i| i + 1)
            .unwrap_or(0);
        let word = &line[start..pos];
        if word.is_empty() {
            return Ok((start, Vec::new()));
        }

        let candidates: Vec<Pair> = if line.trim_start() == word && word.starts_with(':') {
            COMMANDS
                .iter()
                .copied()
                .filter(|cmd| cmd.starts_with(word))
                .map(pair)
                .collect()
        } else {
            SPECIAL_FORMS
                .iter()
                .copied()
                .chain(primitives::names())
                .filter(|name| name.starts_with(word))
                .map(pair)
                .collect()
        };
        Ok((start, candidates))
    }
}

fn pair(name: &str) -> Pair {
    Pair { display: name.to_string(), replacement: name.to_string() }
}

impl Hinter for SlippyCompleter {
    type Hint = String;
}

impl Highlighter for SlippyCompleter {}

impl Validator for SlippyCompleter {}

impl Helper for SlippyCompleter {}

#[derive(Debug, PartialEq, Eq)]
enum ReplCommand<'a> {
    Quit,
    Help,
    Reset,
    Stats,
    Compile(&'a str),
    Emit(&'a str),
}

#[derive(Debug, PartialEq, Eq)]
enum ParsedCommand<'a> {
    NotACommand,
    UnknownCommand,
    InvalidUsage(&'static str),
    Command(ReplCommand<'a>),
}

fn parse_repl_command(line: &str) -> ParsedCommand<'_> {
    let trimmed = line.trim();
    if trimmed == "(exit)" {
        return ParsedCommand::Command(ReplCommand::Quit);
    }
    if !trimmed.starts_with(':') {
        return ParsedCommand::NotACommand;
    }

    let mut parts = trimmed.splitn(2, char::is_whitespace);
    let cmd = parts.next().unwrap_or("");
    let arg = parts.next().map(str::trim).filter(|value| !value.is_empty());

    match cmd {
        ":quit" | ":q" => ParsedCommand::Command(ReplCommand::Quit),
        ":help" | ":h" => ParsedCommand::Command(ReplCommand::Help),
        ":reset" | ":r" => ParsedCommand::Command(ReplCommand::Reset),
        ":stats" => ParsedCommand::Command(ReplCommand::Stats),
        ":compile" | ":c" => match arg {
            Some(expr) => ParsedCommand::Command(ReplCommand::Compile(expr)),
            None => ParsedCommand::InvalidUsage("Usage: :compile <expr>"),
        },
        ":emit" | ":e" => match arg {
            Some(expr) => ParsedCommand::Command(ReplCommand::Emit(expr)),
            None => ParsedCommand::InvalidUsage("Usage: :emit <expr>"),
        },
        _ => ParsedCommand::UnknownCommand,
    }
}

/// True while `input` has more `(` than `)` outside strings and comments.
fn needs_more_input(input: &str) -> bool {
    let mut depth: i32 = 0;
    let mut chars = input.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '(' => depth += 1,
            ')' => depth -= 1,
            ';' => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        break;
                    }
                }
            }
            '"' => {
                let mut closed = false;
                while let Some(c) = chars.next() {
                    match c {
                        '\\' => {
                            chars.next();
                        }
                        '"' => {
                            closed = true;
                            break;
                        }
                        _ => {}
                    }
                }
                if !closed {
                    return true;
                }
            }
            _ => {}
        }
    }
    depth > 0
}

/// Evaluation state that survives between lines.
pub struct Session {
    machine: Machine,
    show_timing: bool,
}

impl Session {
    pub fn new(config: &SlippyConfig) -> Self {
        let machine = Machine::new(MachineConfig { max_steps: config.machine.max_steps });
        Self { machine, show_timing: config.repl.show_timing }
    }

    pub fn eval(&mut self, input: &str) -> Result<Value, EvalError> {
        self.machine.eval(input)
    }

    pub fn reset(&mut self) {
        self.machine.reset();
    }

    pub fn stats(&self) -> MachineStats {
        self.machine.stats()
    }
}

pub fn run_repl(config: &SlippyConfig) {
    println!("{}", bold(&cyan(&format!("Slippy REPL v{}", env!("CARGO_PKG_VERSION")))));
    println!("{}", gray("Type :help for commands, (exit) or :quit to leave"));
    println!();

    let rl_config = rustyline::Config::builder().auto_add_history(true).build();
    let mut rl: Editor<SlippyCompleter, rustyline::history::DefaultHistory> =
        match Editor::with_config(rl_config) {
            Ok(rl) => rl,
            Err(err) => {
                eprintln!("{} failed to start line editor: {}", red("Error:"), err);
                return;
            }
        };
    rl.set_helper(Some(SlippyCompleter));

    let history_path = get_history_path(config.repl.history_path.as_deref());
    if let Some(ref path) = history_path {
        if path.exists() {
            if let Err(err) = rl.load_history(path) {
                eprintln!(
                    "{} failed to load history from {}: {}",
                    red("Warning:"),
                    path.display(),
                    err
                );
            }
        }
    }

    let mut session = Session::new(config);
    let mut multiline_buffer = String::new();

    loop {
        let prompt = if multiline_buffer.is_empty() {
            format!("{} ", green("slippy>"))
        } else {
            format!("{} ", gray("..."))
        };

        match rl.readline(&prompt) {
            Ok(line) => {
                if multiline_buffer.is_empty() {
                    if line.trim().is_empty() {
                        continue;
                    }
                    if let Some(keep_going) = handle_command(&line, &mut session) {
                        if keep_going {
                            continue;
                        }
                        break;
                    }
                }

                if !multiline_buffer.is_empty() {
                    multiline_buffer.push('\n');
                }
                multiline_buffer.push_str(&line);
                if needs_more_input(&multiline_buffer) {
                    continue;
                }

                let input = std::mem::take(&mut multiline_buffer);
                if parse_repl_command(&input) == ParsedCommand::Command(ReplCommand::Quit) {
                    break;
                }
                eval_input(&input, &mut session);
            }
            Err(ReadlineError::Interrupted) => {
                multiline_buffer.clear();
                println!("{}", gray("(Ctrl-C to exit)"));
            }
            Err(ReadlineError::Eof) => {
                break;
            }
            Err(err) => {
                eprintln!("{} {:?}", red("Error:"), err);
                break;
            }
        }
    }

    if let Some(ref path) = history_path {
        if let Some(parent) = path.parent() {
            if let Err(err) = fs::create_dir_all(parent) {
                eprintln!(
                    "{} failed to create history directory {}: {}",
                    red("Warning:"),
                    parent.display(),
                    err
                );
            }
        }
        if let Err(err) = rl.save_history(path) {
            eprintln!(
                "{} failed to save history to {}: {}",
                red("Warning:"),
                path.display(),
                err
            );
        }
    }

    println!("\n{}", cyan("Goodbye!"));
}

fn eval_input(input: &str, session: &mut Session) {
    let start = Instant::now();
    let result = session.eval(input);
    let elapsed = start.elapsed();
    match result {
        Ok(Value::Unspecified) => {}
        Ok(value) => println!("{}", value),
        Err(err) => eprintln!("{} {}", red("Error:"), err),
    }
    if session.show_timing {
        println!("{}", gray(&format_elapsed(elapsed)));
    }
}

fn format_elapsed(elapsed: Duration) -> String {
    let micros = elapsed.as_micros();
    if micros < 1_000 {
        format!("({}µs)", micros)
    } else {
        format!("({:.2}ms)", elapsed.as_secs_f64() * 1_000.0)
    }
}

/// Handle REPL commands. Returns Some(true) to continue, Some(false) to quit,
/// None if not a command.
fn handle_command(line: &str, session: &mut Session) -> Option<bool> {
    match parse_repl_command(line) {
        ParsedCommand::NotACommand => None,
        ParsedCommand::UnknownCommand => {
            eprintln!("{} unknown command. Type :help for usage.", red("Error:"));
            Some(true)
        }
        ParsedCommand::InvalidUsage(usage) => {
            eprintln!("{} {}", red("Error:"), usage);
            Some(true)
        }
        ParsedCommand::Command(ReplCommand::Quit) => Some(false),
        ParsedCommand::Command(ReplCommand::Help) => {
            print_help();
            Some(true)
        }
        ParsedCommand::Command(ReplCommand::Reset) => {
            session.reset();
            println!("{}", gray("Machine reset."));
            Some(true)
        }
        ParsedCommand::Command(ReplCommand::Stats) => {
            print_stats(&session.stats());
            Some(true)
        }
        ParsedCommand::Command(ReplCommand::Compile(expr)) => {
            match compile_src(expr) {
                Ok(text) => print!("{}", text),
                Err(err) => eprintln!("{} {}", red("Error:"), err),
            }
            Some(true)
        }
        ParsedCommand::Command(ReplCommand::Emit(expr)) => {
            match generate_src(expr) {
                Ok(program) => print!("{}", emit_text(&program)),
                Err(err) => eprintln!("{} {}", red("Error:"), err),
            }
            Some(true)
        }
    }
}

fn print_stats(stats: &MachineStats) {
    println!("{} {}", yellow("steps:"), stats.steps);
    println!("{} {}", yellow("bounces:"), stats.bounces);
    println!("{} {}", yellow("max stack depth:"), stats.max_stack_depth);
}

/// Resolve the path to the history file.
///
/// Rules, first match wins:
/// - `SLIPPY_REPL_HISTORY_PATH`, then `[repl] history_path` from `slippy.toml`.
/// - `~` and `~/...` resolve under HOME; other relative paths resolve under HOME.
/// - Otherwise: `${HOME}/.slippy/repl_history`.
fn resolve_history_path(
    home: Option<&Path>,
    override_path: Option<&str>,
    configured: Option<&str>,
) -> Option<PathBuf> {
    let home_path = || home.map(Path::to_path_buf);

    let chosen = override_path
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .or_else(|| configured.map(str::trim).filter(|value| !value.is_empty()));

    if let Some(raw) = chosen {
        if raw == "~" {
            return home_path();
        }
        if let Some(rest) = raw.strip_prefix("~/") {
            let mut path = home_path()?;
            path.push(rest);
            return Some(path);
        }
        let path = PathBuf::from(raw);
        if path.is_relative() {
            let mut base = home_path()?;
            base.push(path);
            return Some(base);
        }
        return Some(path);
    }

    let mut default_path = home_path()?;
    default_path.push(".slippy");
    default_path.push("repl_history");
    Some(default_path)
}

fn get_history_path(configured: Option<&str>) -> Option<PathBuf> {
    let home = dirs::home_dir();
    let override_path = std::env::var(REPL_HISTORY_PATH_ENV).ok();
    resolve_history_path(home.as_deref(), override_path.as_deref(), configured)
}

fn print_help() {
    println!("{}", bold("Commands:"));
    println!("  {}  {}", cyan(":help, :h"), gray("Show this help"));
    println!("  {}  {}", cyan(":quit, :q, (exit)"), gray("Exit the REPL"));
    println!("  {}  {}", cyan(":reset, :r"), gray("Start over with a fresh machine"));
    println!(
        "  {}  {}",
        cyan(":compile <expr>, :c <expr>"),
        gray("Show the instruction sequence for an expression")
    );
    println!(
        "  {}  {}",
        cyan(":emit <expr>, :e <expr>"),
        gray("Show the generated blocks for an expression")
    );
    println!("  {}  {}", cyan(":stats"), gray("Show counters for the last evaluation"));
    println!();
    println!("{}", gray("Input continues on the next line while parentheses are open."));
    println!(
        "{}",
        gray(&format!("History file can be set with ${}.", REPL_HISTORY_PATH_ENV))
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_repl_command() {
        assert_eq!(parse_repl_command(":q"), ParsedCommand::Command(ReplCommand::Quit));
        assert_eq!(parse_repl_command("  (exit)  "), ParsedCommand::Command(ReplCommand::Quit));
        assert_eq!(parse_repl_command(":stats"), ParsedCommand::Command(ReplCommand::Stats));
        assert_eq!(
            parse_repl_command(":compile (f x)"),
            ParsedCommand::Command(ReplCommand::Compile("(f x)"))
        );
        assert_eq!(
            parse_repl_command(":e   42 "),
            ParsedCommand::Command(ReplCommand::Emit("42"))
        );
        assert_eq!(
            parse_repl_command(":compile"),
            ParsedCommand::InvalidUsage("Usage: :compile <expr>")
        );
        assert_eq!(parse_repl_command(":frobnicate"), ParsedCommand::UnknownCommand);
        assert_eq!(parse_repl_command("(+ 1 2)"), ParsedCommand::NotACommand);
    }

    #[test]
    fn test_needs_more_input_parens() {
        assert!(needs_more_input("(define (f x)"));
        assert!(needs_more_input("(let ((x 1))\n  (+ x"));
        assert!(!needs_more_input("(define (f x) x)"));
        assert!(!needs_more_input("42"));
        assert!(!needs_more_input(")"));
    }

    #[test]
    fn test_needs_more_input_ignores_strings_and_comments() {
        assert!(!needs_more_input("(display \"(\")"));
        assert!(!needs_more_input("(f 1) ; (unclosed"));
        assert!(needs_more_input("(f ; )\n"));
        assert!(needs_more_input("\"open string"));
        assert!(!needs_more_input("\"esc \\\" (\""));
    }

    #[test]
    fn test_resolve_history_path() {
        let home = Path::new("/home/tester");

        assert_eq!(
            resolve_history_path(Some(home), None, None),
            Some(PathBuf::from("/home/tester/.slippy/repl_history"))
        );
        assert_eq!(
            resolve_history_path(Some(home), Some("repl/history.log"), None),
            Some(PathBuf::from("/home/tester/repl/history.log"))
        );
        assert_eq!(
            resolve_history_path(Some(home), Some("~/h"), Some("/etc/ignored")),
            Some(PathBuf::from("/home/tester/h"))
        );
        assert_eq!(
            resolve_history_path(Some(home), Some("  "), Some("/var/slippy/history")),
            Some(PathBuf::from("/var/slippy/history"))
        );
        assert_eq!(resolve_history_path(None, None, Some("~/h")), None);
        assert_eq!(
            resolve_history_path(None, Some("/abs/history"), None),
            Some(PathBuf::from("/abs/history"))
        );
    }

    #[test]
    fn test_session_keeps_definitions() {
        let mut session = Session::new(&SlippyConfig::default());
        session.eval("(define (sq x) (* x x))").unwrap();
        assert_eq!(session.eval("(sq 9)").unwrap(), Value::Int(81));
        assert!(session.stats().steps > 0);

        session.reset();
        assert!(session.eval("(sq 9)").is_err());
    }

    #[test]
    fn test_session_honors_step_limit() {
        let mut config = SlippyConfig::default();
        config.machine.max_steps = Some(100);
        let mut session = Session::new(&config);
        let err = session.eval("(define (spin) (spin)) (spin)").unwrap_err();
        assert!(err.to_string().contains("step limit"), "{}", err);
    }

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(Duration::from_micros(250)), "(250µs)");
        assert_eq!(format_elapsed(Duration::from_micros(1_500)), "(1.50ms)");
    }
}
