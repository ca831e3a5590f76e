//! Command execution.

use crate::config::{Config, OutputFormat};
use crate::Commands;
use colored::Colorize;
use convfsm_core::{dot, Automaton, Compiler, Protocol, RepeatMode, Trace, TransitionLabel};
use std::fmt::Write;
use std::io::Read;
use std::path::Path;

/// Executes a command and returns the formatted output.
pub fn execute(cmd: Commands, config: &Config) -> Result<String, Box<dyn std::error::Error>> {
    match cmd {
        Commands::Compile {
            file,
            format,
            repeat,
            trace,
        } => {
            let protocol = load_protocol(&file)?;
            let format = format.unwrap_or(config.output.format);
            let trace = trace || config.output.trace;
            let (fsm, events) = compile(&protocol, repeat.unwrap_or(config.compiler.repeat), trace)?;

            if let Some(events) = events {
                eprintln!("{}", format_trace(&events));
            }

            match format {
                OutputFormat::Text => format_automaton(&fsm),
                OutputFormat::Json => Ok(serde_json::to_string_pretty(&fsm.to_json()?)?),
                OutputFormat::Dot => Ok(dot::render(&fsm)),
            }
        }

        Commands::Inspect { file, repeat } => {
            let protocol = load_protocol(&file)?;
            let (fsm, _) = compile(&protocol, repeat.unwrap_or(config.compiler.repeat), false)?;
            format_summary(&fsm)
        }

        Commands::Config => Ok(config.to_yaml()?),
    }
}

/// Reads a protocol from a JSON file, or from stdin when `path` is "-".
fn load_protocol(path: &Path) -> Result<Protocol, Box<dyn std::error::Error>> {
    let content = if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read '{}': {}", path.display(), e))?
    };
    let protocol = Protocol::from_json_str(&content)
        .map_err(|e| format!("invalid protocol '{}': {}", path.display(), e))?;
    tracing::debug!(protocol = %protocol.name, path = %path.display(), "protocol loaded");
    Ok(protocol)
}

fn compile(
    protocol: &Protocol,
    repeat: RepeatMode,
    traced: bool,
) -> Result<(Automaton, Option<Trace>), Box<dyn std::error::Error>> {
    let compiler = Compiler::new(convfsm_core::CompileOptions::default().with_repeat(repeat));
    let result = if traced {
        let mut trace = Trace::new();
        compiler
            .compile_traced(protocol, &mut trace)
            .map(|fsm| (fsm, Some(trace)))
    } else {
        compiler.compile(protocol).map(|fsm| (fsm, None))
    };

    result.map_err(|e| format!("[{}] {}", e.error_code(), e).into())
}

fn format_trace(trace: &Trace) -> String {
    trace
        .lines()
        .iter()
        .enumerate()
        .map(|(i, line)| format!("{} {}", format!("{:>4}", i).dimmed(), line))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Human-readable listing of the automaton and its parallel regions.
fn format_automaton(fsm: &Automaton) -> Result<String, Box<dyn std::error::Error>> {
    let mut out = String::new();
    writeln!(
        out,
        "{}",
        format!("Protocol {}", fsm.name().unwrap_or("?").cyan()).bold()
    )?;
    write_automaton(&mut out, fsm, fsm, 1)?;
    Ok(out.trim_end().to_string())
}

fn write_automaton(
    out: &mut String,
    fsm: &Automaton,
    root: &Automaton,
    depth: usize,
) -> std::fmt::Result {
    let indent = "  ".repeat(depth);
    let name = |s| root.display_name(s);

    writeln!(out, "{}initial: {}", indent, name(fsm.initial_state()).cyan())?;
    let finals: Vec<String> = fsm.final_states().iter().map(|s| name(*s)).collect();
    writeln!(out, "{}final: {}", indent, finals.join(", ").cyan())?;

    for t in fsm.transitions() {
        let label = match &t.label {
            TransitionLabel::Message(_) => t.label.to_string().green(),
            _ => t.label.to_string().dimmed(),
        };
        write!(out, "{}{} -> {}  {}", indent, name(t.from), name(t.to), label)?;
        if let Some(values) = &t.payload {
            let values: Vec<String> = values.iter().map(ToString::to_string).collect();
            write!(out, "({})", values.join(", "))?;
        }
        if let Some(guard) = &t.guard {
            write!(out, " {}", guard)?;
        }
        if fsm.interrupts().iter().any(|i| &i.transition == t) {
            write!(out, " {}", "[interrupt]".yellow())?;
        }
        writeln!(out)?;
    }

    for &state in fsm.states() {
        for entry in fsm.dispatch_table(state) {
            writeln!(
                out,
                "{}dispatch {} {} -> {}",
                indent,
                name(state),
                entry.key,
                name(entry.target)
            )?;
        }
    }

    for (anchor, children) in fsm.nested() {
        for (index, child) in children.iter().enumerate() {
            writeln!(
                out,
                "{}{} at {} branch {}:",
                indent,
                "parallel".bold(),
                name(*anchor),
                index
            )?;
            write_automaton(out, child, root, depth + 1)?;
        }
    }

    Ok(())
}

fn count_regions(fsm: &Automaton) -> usize {
    fsm.nested().len()
        + fsm
            .nested()
            .values()
            .flatten()
            .map(count_regions)
            .sum::<usize>()
}

/// Structural summary of a compiled protocol.
fn format_summary(fsm: &Automaton) -> Result<String, Box<dyn std::error::Error>> {
    let roles: Vec<&str> = fsm.roles().iter().map(|r| r.as_str()).collect();
    let dispatch_states = fsm
        .states()
        .iter()
        .filter(|s| !fsm.dispatch_table(**s).is_empty())
        .count();

    let mut out = String::new();
    writeln!(
        out,
        "{}",
        format!("Protocol {}", fsm.name().unwrap_or("?").cyan()).bold()
    )?;
    writeln!(out, "  checksum:      {}", fsm.checksum().unwrap_or("-"))?;
    writeln!(out, "  roles:         {}", roles.join(", "))?;
    writeln!(
        out,
        "  states:        {} ({} including parallel regions)",
        fsm.state_count(),
        fsm.total_state_count()
    )?;
    writeln!(out, "  transitions:   {}", fsm.transition_count())?;
    writeln!(out, "  epsilon:       {}", fsm.epsilon_count())?;
    writeln!(out, "  final states:  {}", fsm.final_states().len())?;
    writeln!(out, "  parallel:      {}", count_regions(fsm))?;
    writeln!(out, "  interrupts:    {}", fsm.interrupts().len())?;
    write!(out, "  dispatch:      {}", dispatch_states)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const BUYER: &str = r#"{
        "name": "BuyerSeller",
        "at": "Seller",
        "roles": ["Buyer", "Seller"],
        "activities": [
            {"interaction": {"direction": "receive", "label": "item",
                             "payload": [{"name": "item", "type": "string"}],
                             "partner": "Buyer"}},
            {"choice": {"branches": [
                [{"interaction": {"direction": "send", "label": "price",
                                  "payload": [{"name": "price", "type": "int"}],
                                  "partner": "Buyer"}}],
                [{"interaction": {"direction": "send", "label": "reject", "partner": "Buyer"}}]
            ]}}
        ]
    }"#;

    fn write_protocol(dir: &tempfile::TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("protocol.json");
        std::fs::write(&path, content).unwrap();
        path
    }

    fn compile_cmd(file: PathBuf, format: OutputFormat) -> Commands {
        Commands::Compile {
            file,
            format: Some(format),
            repeat: None,
            trace: false,
        }
    }

    #[test]
    fn test_compile_text() {
        colored::control::set_override(false);
        let dir = tempfile::tempdir().unwrap();
        let file = write_protocol(&dir, BUYER);

        let out = execute(compile_cmd(file, OutputFormat::Text), &Config::default()).unwrap();
        assert!(out.starts_with("Protocol BuyerSeller"));
        assert!(out.contains("  initial: s0"));
        assert!(out.contains("  final: s3"));
        assert!(out.contains("  s0 -> s1  Buyer?item(item:string)"));
        assert!(out.contains("  s4 -> s3  ε"));
    }

    #[test]
    fn test_compile_json() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_protocol(&dir, BUYER);

        let out = execute(compile_cmd(file, OutputFormat::Json), &Config::default()).unwrap();
        let fsm = Automaton::from_json(&serde_json::from_str(&out).unwrap()).unwrap();
        assert_eq!(fsm.state_count(), 5);
        assert_eq!(fsm.transition_count(), 5);
        assert_eq!(fsm.name(), Some("BuyerSeller"));
    }

    #[test]
    fn test_compile_dot() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_protocol(&dir, BUYER);

        let out = execute(compile_cmd(file, OutputFormat::Dot), &Config::default()).unwrap();
        assert!(out.starts_with("digraph \"BuyerSeller\" {"));
    }

    #[test]
    fn test_inspect_summary() {
        colored::control::set_override(false);
        let dir = tempfile::tempdir().unwrap();
        let file = write_protocol(&dir, BUYER);

        let out = execute(
            Commands::Inspect {
                file,
                repeat: None,
            },
            &Config::default(),
        )
        .unwrap();
        assert!(out.contains("roles:         Seller, Buyer"));
        assert!(out.contains("states:        5 (5 including parallel regions)"));
        assert!(out.contains("epsilon:       2"));
        assert!(out.contains("parallel:      0"));
    }

    #[test]
    fn test_build_error_reported_with_code() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_protocol(
            &dir,
            r#"{"name": "Bad", "activities": [{"recursion_call": {"label": "x"}}]}"#,
        );

        let err = execute(compile_cmd(file, OutputFormat::Text), &Config::default()).unwrap_err();
        assert!(err.to_string().starts_with("[UNDEFINED_RECURSION_LABEL]"));
    }

    #[test]
    fn test_missing_file() {
        let err = execute(
            compile_cmd(PathBuf::from("/nonexistent/protocol.json"), OutputFormat::Text),
            &Config::default(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("failed to read"));
    }

    #[test]
    fn test_repeat_mode_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_protocol(
            &dir,
            r#"{"name": "R", "activities": [{"repeat": {"body": [
                {"interaction": {"direction": "send", "label": "tick", "partner": "A"}}
            ]}}]}"#,
        );
        let mut config = Config::default();
        config.compiler.repeat = RepeatMode::Once;

        let out = execute(compile_cmd(file.clone(), OutputFormat::Json), &config).unwrap();
        let once = Automaton::from_json(&serde_json::from_str(&out).unwrap()).unwrap();
        assert_eq!(once.epsilon_count(), 0);

        let cmd = Commands::Compile {
            file,
            format: Some(OutputFormat::Json),
            repeat: Some(RepeatMode::Loop),
            trace: true,
        };
        let out = execute(cmd, &config).unwrap();
        let looped = Automaton::from_json(&serde_json::from_str(&out).unwrap()).unwrap();
        assert_eq!(looped.epsilon_count(), 2);
    }

    #[test]
    fn test_config_command() {
        let out = execute(Commands::Config, &Config::default()).unwrap();
        assert!(out.contains("repeat: loop"));
        assert!(out.contains("format: text"));
    }
}
