//! Output rendering
//!
//! Turns a probe result tree into the CLI's output formats: the default
//! colorized tree, `--flat` path listing, JSON (pretty or `--compact`), YAML,
//! and JUnit XML for CI ingestion. Quiet levels progressively suppress
//! output: healthy leaves, then everything but a summary line, then all of it.

use std::io::IsTerminal;
use std::time::Duration;

use ansi_term::Colour;

use crate::core::types::{ProbeResult, Status};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Json,
    Yaml,
    Junit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ColorMode {
    #[default]
    Auto,
    Always,
    Never,
}

#[derive(Debug, Clone, Default)]
pub struct RenderOptions {
    /// None renders the human tree
    pub format: Option<OutputFormat>,
    pub flat: bool,
    pub compact: bool,
    /// 0 = everything, 1 = hide healthy leaves, 2 = summary only, 3+ = silent
    pub quiet: u8,
    pub color: ColorMode,
}

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("json encoding failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("yaml encoding failed: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub fn render(result: &ProbeResult, options: &RenderOptions) -> Result<String, RenderError> {
    if options.quiet >= 3 {
        return Ok(String::new());
    }

    match options.format {
        Some(OutputFormat::Json) if options.compact => Ok(serde_json::to_string(result)?),
        Some(OutputFormat::Json) => Ok(serde_json::to_string_pretty(result)?),
        Some(OutputFormat::Yaml) => Ok(serde_yaml::to_string(result)?),
        Some(OutputFormat::Junit) => Ok(render_junit(result)),
        None => Ok(render_human(result, options)),
    }
}

fn use_color(mode: ColorMode) -> bool {
    match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => std::io::stdout().is_terminal(),
    }
}

fn glyph(status: Status, color: bool) -> String {
    let (symbol, colour) = match status {
        Status::Healthy => ("✔", Colour::Green),
        Status::Unhealthy => ("✘", Colour::Red),
        Status::LoopDetected => ("↻", Colour::Purple),
        Status::Unknown => ("?", Colour::Yellow),
    };
    if color {
        colour.paint(symbol).to_string()
    } else {
        symbol.to_string()
    }
}

fn format_duration_short(duration: Duration) -> String {
    if duration >= Duration::from_secs(1) {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}

fn render_human(result: &ProbeResult, options: &RenderOptions) -> String {
    let color = use_color(options.color);

    if options.quiet == 2 {
        let flat = result.flatten();
        let failing = flat
            .iter()
            .filter(|(_, leaf)| leaf.status != Status::Healthy)
            .count();
        return format!(
            "{} {}: {} ({} of {} components unhealthy)\n",
            glyph(result.status, color),
            result.name,
            result.status,
            failing,
            flat.len(),
        );
    }

    let mut out = String::new();
    if options.flat {
        for (path, leaf) in result.flatten() {
            if options.quiet >= 1 && leaf.status == Status::Healthy {
                continue;
            }
            out.push_str(&format!(
                "{} {} ({}) {}\n",
                glyph(leaf.status, color),
                path,
                leaf.kind,
                format_duration_short(leaf.duration),
            ));
            for message in &leaf.messages {
                out.push_str(&format!("    - {message}\n"));
            }
        }
    } else {
        render_node(result, 0, options.quiet, color, &mut out);
    }
    out
}

fn render_node(node: &ProbeResult, depth: usize, quiet: u8, color: bool, out: &mut String) {
    let hide = quiet >= 1 && node.status == Status::Healthy && node.components.is_empty() && depth > 0;
    if hide {
        return;
    }

    let indent = "  ".repeat(depth);
    out.push_str(&format!(
        "{indent}{} {} ({}) {}\n",
        glyph(node.status, color),
        node.name,
        node.kind,
        format_duration_short(node.duration),
    ));
    for message in &node.messages {
        out.push_str(&format!("{indent}    - {message}\n"));
    }
    for child in &node.components {
        render_node(child, depth + 1, quiet, color, out);
    }
}

fn render_junit(result: &ProbeResult) -> String {
    let flat = result.flatten();
    let failures = flat
        .iter()
        .filter(|(_, leaf)| leaf.status != Status::Healthy)
        .count();

    let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    out.push_str(&format!(
        "<testsuite name=\"platform-health\" tests=\"{}\" failures=\"{}\" time=\"{:.3}\">\n",
        flat.len(),
        failures,
        result.duration.as_secs_f64(),
    ));
    for (path, leaf) in &flat {
        out.push_str(&format!(
            "  <testcase name=\"{}\" classname=\"{}\" time=\"{:.3}\"",
            xml_escape(path),
            xml_escape(&leaf.kind),
            leaf.duration.as_secs_f64(),
        ));
        if leaf.status == Status::Healthy {
            out.push_str("/>\n");
        } else {
            out.push_str(">\n");
            out.push_str(&format!(
                "    <failure message=\"{}\">{}</failure>\n",
                xml_escape(&leaf.status.to_string()),
                xml_escape(&leaf.messages.join("\n")),
            ));
            out.push_str("  </testcase>\n");
        }
    }
    out.push_str("</testsuite>\n");
    out
}

fn xml_escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
