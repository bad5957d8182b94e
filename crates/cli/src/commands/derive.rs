use std::path::Path;

use edc_eval::{Engine, EngineConfig};

use crate::{exit_with_error, input, print_json, OutputFormat};

pub(crate) fn cmd_derive(
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

    let outcome = engine.resolve_derived(&form, &values);

    if quiet {
        return;
    }
    match output {
        OutputFormat::Json => print_json(&outcome),
        OutputFormat::Text => {
            for (field, value) in outcome.context.iter() {
                let marker = if outcome.derived.contains_key(field) { "*" } else { " " };
                println!("{} {} = {}", marker, field, value);
            }
            for failure in &outcome.failures {
                println!("  [failed] {}: {}", failure.field_id, failure.error);
            }
            for cycle in &outcome.cycle_errors {
                println!("  [cycle] {}", cycle);
            }
        }
    }
}
