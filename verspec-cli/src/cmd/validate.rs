use std::path::Path;

use serde::Serialize;
use verspec_core::parse_spec_file;

use crate::exit_codes;
use crate::output::{print_error, print_result, OutputFormat};
use crate::GlobalArgs;

#[derive(Serialize)]
struct ValidateResult {
    valid: bool,
    blocks: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    errors: Vec<String>,
}

pub fn validate_cmd(global: &GlobalArgs, path: &Path) -> i32 {
    let out = &global.output;
    let content = match std::fs::read_to_string(path) {
        Ok(v) => v,
        Err(e) => {
            print_error(
                out.format,
                out.quiet,
                &format!("failed to read {}: {e}", path.display()),
            );
            return exit_codes::FAILED;
        }
    };

    match parse_spec_file(&path.display().to_string(), &content) {
        Ok(spec) => {
            if out.format == OutputFormat::Text && !out.quiet {
                println!("ok: {} block(s)", spec.blocks.len());
            } else {
                let result = ValidateResult {
                    valid: true,
                    blocks: spec.blocks.len(),
                    errors: vec![],
                };
                print_result(out.format, out.quiet, &result);
            }
            exit_codes::SUCCESS
        }
        Err(err) => {
            if out.format == OutputFormat::Text {
                print_error(out.format, out.quiet, &err.to_string());
            } else {
                let result = ValidateResult {
                    valid: false,
                    blocks: 0,
                    errors: vec![err.to_string()],
                };
                print_result(out.format, out.quiet, &result);
            }
            exit_codes::FAILED
        }
    }
}
