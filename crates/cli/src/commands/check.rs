use std::path::Path;
use std::process;

use edc_core::{lint_form, Diagnostic, DiagnosticSeverity};
use edc_eval::EngineConfig;

use crate::{exit_with_error, input, print_json, OutputFormat};

pub(crate) fn cmd_check(form_path: &Path, config: &EngineConfig, output: OutputFormat, quiet: bool) {
    let form = input::load_form(form_path).unwrap_or_else(|m| exit_with_error(&m, output, quiet));

    let diagnostics = lint_form(&form, &config.limits);
    let errors = diagnostics
        .iter()
        .filter(|d| d.severity == DiagnosticSeverity::Error)
        .count();
    tracing::info!(
        form = %form.form_id,
        diagnostics = diagnostics.len(),
        errors,
        "form checked"
    );

    if !quiet {
        match output {
            OutputFormat::Json => print_json(&serde_json::json!({
                "formId": form.form_id,
                "version": form.version,
                "diagnostics": diagnostics,
            })),
            OutputFormat::Text => {
                println!("Form Check: {} (version {})", form.form_id, form.version);
                println!("==========");
                if diagnostics.is_empty() {
                    println!("  No findings.");
                }
                for d in &diagnostics {
                    println!("  {}", format_diagnostic(d));
                }
                println!();
                println!(
                    "  {} error(s), {} warning(s)",
                    errors,
                    diagnostics.len() - errors
                );
            }
        }
    }

    if errors > 0 {
        process::exit(1);
    }
}

fn format_diagnostic(d: &Diagnostic) -> String {
    let level = match d.severity {
        DiagnosticSeverity::Error => "error",
        DiagnosticSeverity::Warning => "warning",
    };
    let mut location = String::new();
    if let Some(field) = &d.field {
        location.push_str(field);
    }
    if let Some(rule) = &d.rule {
        if !location.is_empty() {
            location.push('/');
        }
        location.push_str(rule);
    }
    if location.is_empty() {
        format!("[{}] {}", level, d.message)
    } else {
        format!("[{}] {}: {}", level, location, d.message)
    }
}
