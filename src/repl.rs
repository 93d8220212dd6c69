//! Interactive shell.

use crate::render;
use colored::Colorize;
use exectree_runtime::Tree;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{Config, Editor};
use std::time::Duration;

const HELP_TEXT: &str = r#"
Available commands:
  help                          Show this help
  status                        Show every node's state
  fsm [node]                    Show a node's resolved transitions (default: root)

  send <trigger> [node]         Queue a command (default: root)
  wait [seconds]                Wait for the next report
  include <node>                Include a node in its parent's fan-outs
  exclude <node>                Exclude a node from its parent's fan-outs

  quit, exit                    Stop the tree and exit
"#;

pub fn run(tree: &Tree, timeout: Duration) -> Result<(), ReadlineError> {
    println!("{} {}", "exectree shell:".bold().cyan(), tree.root());

    let config = Config::builder()
        .history_ignore_space(true)
        .auto_add_history(true)
        .build();
    let mut rl: Editor<(), DefaultHistory> = Editor::with_config(config)?;

    // Load history
    let history_path = std::env::var("HOME")
        .map(|h| std::path::PathBuf::from(h).join(".exectree_history"))
        .unwrap_or_else(|_| ".exectree_history".into());
    let _ = rl.load_history(&history_path);

    println!("Type 'help' for available commands.\n");

    loop {
        while let Some(report) = tree.next_report(Duration::ZERO) {
            println!("{}", render::report_line(&report));
        }

        let prompt = format!("{} ", "exectree>".cyan());
        match rl.readline(&prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                match execute(tree, line, timeout) {
                    Ok(Some(output)) => println!("{}\n", output),
                    Ok(None) => break,
                    Err(e) => println!("{}: {}\n", "Error".red(), e),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("^D");
                break;
            }
            Err(err) => {
                println!("{}: {:?}", "Error".red(), err);
                break;
            }
        }
    }

    let _ = rl.save_history(&history_path);
    println!("{}", "Stopping tree...".dimmed());
    tree.shutdown();
    Ok(())
}

fn execute(
    tree: &Tree,
    line: &str,
    timeout: Duration,
) -> Result<Option<String>, Box<dyn std::error::Error>> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.is_empty() {
        return Ok(Some(String::new()));
    }

    let cmd = parts[0].to_lowercase();
    let args = &parts[1..];

    match cmd.as_str() {
        "help" | "?" => Ok(Some(HELP_TEXT.to_string())),

        "quit" | "exit" | "q" => Ok(None),

        "status" | "s" => Ok(Some(render::status_table(&tree.status()))),

        "fsm" => {
            let node = args.first().copied().unwrap_or(tree.root());
            let config = tree.config(node)?;
            Ok(Some(render::fsm_table(&config, 0)))
        }

        "send" => {
            let Some(trigger) = args.first() else {
                return Ok(Some("Usage: send <trigger> [node]".to_string()));
            };
            let node = args.get(1).copied().unwrap_or(tree.root());
            tree.enqueue(node, trigger)?;
            Ok(Some(format!("{} '{}' on {}", "Queued".green(), trigger, node.cyan())))
        }

        "wait" | "w" => {
            let timeout = match args.first() {
                Some(secs) => Duration::from_secs(secs.parse()?),
                None => timeout,
            };
            match tree.next_report(timeout) {
                Some(report) => Ok(Some(render::report_line(&report))),
                None => Ok(Some("No report".yellow().to_string())),
            }
        }

        "include" | "exclude" => {
            let Some(node) = args.first() else {
                return Ok(Some(format!("Usage: {} <node>", cmd)));
            };
            tree.set_included(node, cmd == "include")?;
            Ok(Some(format!("{} {}d", node.cyan(), cmd)))
        }

        _ => Ok(Some(format!(
            "Unknown command: {}. Type 'help' for available commands.",
            cmd
        ))),
    }
}
