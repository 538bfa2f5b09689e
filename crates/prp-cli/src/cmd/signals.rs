use crate::output::{print_json, print_table};
use anyhow::Context;
use prp_core::config::Config;
use prp_core::signal::{extract_unique_signals, ParseResult, SignalParser};
use std::io::Read;
use std::path::{Path, PathBuf};

const CONTEXT_WIDTH: usize = 48;

/// Parse `files` (stdin when empty) and list every signal found.
pub fn run(config_path: &Path, files: &[PathBuf], json: bool) -> anyhow::Result<()> {
    let config = Config::load(config_path).context("failed to load config")?;
    let parser = SignalParser::new(config.parser.context_radius);

    let result = if files.is_empty() {
        let mut content = String::new();
        std::io::stdin()
            .read_to_string(&mut content)
            .context("failed to read stdin")?;
        parser.parse_sources(&[("<stdin>", content.as_str())])
    } else {
        parser.parse_from_files(files)
    };

    if json {
        let value = serde_json::json!({
            "signals": result.signals,
            "totalCount": result.total_count,
            "byType": result.by_type,
            "unique": extract_unique_signals(&result),
        });
        print_json(&value)?;
        return Ok(());
    }

    if result.signals.is_empty() {
        println!("No signals found.");
        return Ok(());
    }
    print_signals(&result);
    println!();
    println!("{} signal(s), {} distinct", result.total_count, result.by_type.len());
    for (code, n) in &result.by_type {
        println!("  [{code}] {n}");
    }
    Ok(())
}

fn print_signals(result: &ParseResult) {
    let rows = result
        .signals
        .iter()
        .map(|s| {
            vec![
                s.source.clone().unwrap_or_default(),
                format!("{}:{}", s.line, s.column),
                format!("[{}]", s.code),
                s.state.to_string(),
                truncate(&s.context, CONTEXT_WIDTH),
            ]
        })
        .collect();
    print_table(&["SOURCE", "POS", "SIGNAL", "STATE", "CONTEXT"], rows);
}

fn truncate(text: &str, width: usize) -> String {
    let flat = text.replace('\n', " ");
    if flat.chars().count() <= width {
        return flat;
    }
    let mut out: String = flat.chars().take(width.saturating_sub(1)).collect();
    out.push('…');
    out
}
