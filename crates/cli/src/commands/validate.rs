use std::path::Path;
use std::process;

use edc_core::QueryPriority;
use edc_eval::{Engine, EngineConfig, Message, ValidationResult};

use crate::{exit_with_error, input, print_json, OutputFormat, EXIT_INVALID};

pub(crate) fn cmd_validate(
    form_path: &Path,
    values_path: &Path,
    config: EngineConfig,
    output: OutputFormat,
    quiet: bool,
) {
    let form = input::load_form(form_path).unwrap_or_else(|m| exit_with_error(&m, output, quiet));
    let values =
        input::load_values(values_path).unwrap_or_else(|m| exit_with_error(&m, output, quiet));
    let engine = Engine::with_config(config)
        .unwrap_or_else(|e| exit_with_error(&format!("error: {}", e), output, quiet));

    let result = engine.validate_form(&form, &values);

    if !quiet {
        match output {
            OutputFormat::Json => print_json(&result),
            OutputFormat::Text => print_text(&form.form_id, &form.version, &result),
        }
    }

    if !result.valid {
        process::exit(EXIT_INVALID);
    }
}

fn print_text(form_id: &str, version: &str, result: &ValidationResult) {
    let status = if result.valid { "VALID" } else { "INVALID" };
    println!("Form {} (version {}): {}", form_id, version, status);
    println!(
        "  {} error(s), {} warning(s), {} query(ies)",
        result.error_count(),
        result.warning_count(),
        result.triggered_queries.len()
    );

    let c = &result.completion;
    println!(
        "  Completion: {}/{} fields ({}%), required {}/{}",
        c.completed_fields,
        c.total_fields,
        c.percent(),
        c.required_completed,
        c.required_fields
    );

    for (field, messages) in &result.field_errors {
        for m in messages {
            print_message(field, m);
        }
    }
    for (field, messages) in &result.field_warnings {
        for m in messages {
            print_message(field, m);
        }
    }

    if !result.derived_values.is_empty() {
        println!("Derived values:");
        for (field, value) in &result.derived_values {
            println!("  {} = {}", field, value);
        }
    }

    for q in &result.triggered_queries {
        println!(
            "  [query:{}] {}: {} ({})",
            priority_label(q.priority),
            q.field_id,
            q.query_text,
            q.rule_id
        );
    }

    for cycle in &result.derivation_cycles {
        println!("  [cycle] {}", cycle);
    }
}

fn print_message(field: &str, m: &Message) {
    match &m.rule_id {
        Some(rule) => println!("  [{}] {}: {} ({})", m.severity.as_str(), field, m.text, rule),
        None => println!("  [{}] {}: {}", m.severity.as_str(), field, m.text),
    }
}

fn priority_label(p: QueryPriority) -> &'static str {
    match p {
        QueryPriority::Low => "low",
        QueryPriority::Medium => "medium",
        QueryPriority::High => "high",
    }
}
