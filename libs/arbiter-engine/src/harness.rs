/// Driver Harness - adapts bare-function submissions into runnable programs
///
/// Python and JavaScript submissions are often a single function rather than
/// a program. For those the harness appends a small driver that calls the
/// function with the test input spliced in as call arguments and prints the
/// JSON-encoded return value. Everything else (Java, C++, or any submission
/// that already talks to stdin) is passed through untouched and fed the test
/// input on stdin instead.
///
/// Input convention: the test input is a comma-separated list of literals in
/// the target language's own syntax, e.g. `[2,7,11,15], 9`.
///
/// Entry point: the last top-level function declared in the submission.
/// Helpers are usually written before the function that uses them.

use crate::registry::RuntimeProfile;
use arbiter_common::types::Language;

/// Markers that mean the submission is already a stdin/stdout program
const PYTHON_PROGRAM_MARKERS: &[&str] = &["input(", "sys.stdin", "if __name__"];
const JS_PROGRAM_MARKERS: &[&str] = &["process.stdin", "readline", "require('fs')", "require(\"fs\")"];

/// Find the function the driver should call. Best-effort scan; `None` means
/// "run as a full program", never an error.
pub fn locate_entry_point(code: &str, language: Language) -> Option<String> {
    match language {
        Language::Python => locate_python_entry(code),
        Language::JavaScript => locate_js_entry(code),
        Language::Java | Language::Cpp => None,
    }
}

/// Produce the source text to execute for one test case.
pub fn prepare(code: &str, input: &str, profile: &RuntimeProfile) -> String {
    let markers = match profile.language {
        Language::Python => PYTHON_PROGRAM_MARKERS,
        Language::JavaScript => JS_PROGRAM_MARKERS,
        Language::Java | Language::Cpp => return code.to_string(),
    };

    if markers.iter().any(|m| code.contains(m)) {
        return code.to_string();
    }

    match locate_entry_point(code, profile.language) {
        Some(entry) => match profile.language {
            Language::Python => python_driver(code, &entry, input),
            Language::JavaScript => js_driver(code, &entry, input),
            Language::Java | Language::Cpp => code.to_string(),
        },
        None => code.to_string(),
    }
}

/// Standard input for the run step. Driver-wrapped programs get their
/// arguments inline, so stdin stays empty for them.
pub fn stdin_for(prepared: &str, code: &str, input: &str) -> String {
    if prepared == code {
        input.to_string()
    } else {
        String::new()
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

fn take_identifier(rest: &str) -> Option<&str> {
    let end = rest
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '$'))
        .unwrap_or(rest.len());
    let name = &rest[..end];
    is_identifier(name).then_some(name)
}

fn locate_python_entry(code: &str) -> Option<String> {
    code.lines()
        // top-level only: methods and nested helpers are indented
        .filter_map(|line| line.strip_prefix("def "))
        .filter_map(|rest| take_identifier(rest.trim_start()))
        .filter(|name| !name.starts_with('_'))
        .last()
        .map(str::to_string)
}

fn locate_js_entry(code: &str) -> Option<String> {
    let mut entry = None;
    let mut offset = 0;

    for raw in code.split_inclusive('\n') {
        let line_start = offset;
        offset += raw.len();

        let line = raw.trim_end_matches(['\r', '\n']);
        if line.starts_with(char::is_whitespace) {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        let line = line.strip_prefix("async ").unwrap_or(line);

        if let Some(rest) = line.strip_prefix("function") {
            if !rest.starts_with(|c: char| c.is_whitespace() || c == '*') {
                continue;
            }
            let rest = rest.trim_start_matches('*').trim_start();
            if let Some(name) = take_identifier(rest) {
                entry = Some(name);
            }
            continue;
        }

        for keyword in ["const ", "let ", "var "] {
            let Some(rest) = line.strip_prefix(keyword) else {
                continue;
            };
            let Some(name) = take_identifier(rest.trim_start()) else {
                continue;
            };
            let after = rest.trim_start()[name.len()..].trim_start();
            let Some(value) = after.strip_prefix('=') else {
                continue;
            };
            let value = value.trim_start();
            let value = value.strip_prefix("async").map(str::trim_start).unwrap_or(value);
            // `value` is a suffix of `line`; parameter lists may continue past it
            let remaining = &code[line_start + line_len(raw) - value.len()..];
            if value.starts_with("function")
                || is_parenthesized_arrow(remaining)
                || looks_like_arrow(value)
            {
                entry = Some(name);
            }
        }
    }
    entry.map(str::to_string)
}

fn line_len(raw: &str) -> usize {
    raw.trim_end_matches(['\r', '\n']).len()
}

/// `(a, b) => ...`, as opposed to a parenthesized value like `(1e9 + 7)`
fn is_parenthesized_arrow(value: &str) -> bool {
    if !value.starts_with('(') {
        return false;
    }
    let mut depth = 0usize;
    for (idx, c) in value.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return value[idx + 1..].trim_start().starts_with("=>");
                }
            }
            _ => {}
        }
    }
    false
}

/// `x => ...` single-parameter arrow without parentheses
fn looks_like_arrow(value: &str) -> bool {
    match take_identifier(value) {
        Some(param) => value[param.len()..].trim_start().starts_with("=>"),
        None => false,
    }
}

fn python_driver(code: &str, entry: &str, input: &str) -> String {
    format!(
        r#"{code}


if True:
    import json as __arbiter_json
    import sys as __arbiter_sys
    try:
        __arbiter_result = {entry}({args})
        print(__arbiter_json.dumps(__arbiter_result, separators=(",", ":")))
    except BaseException as __arbiter_error:
        print(f"{{type(__arbiter_error).__name__}}: {{__arbiter_error}}", file=__arbiter_sys.stderr)
        __arbiter_sys.exit(1)
"#,
        code = code.trim_end(),
        entry = entry,
        args = input.trim(),
    )
}

fn js_driver(code: &str, entry: &str, input: &str) -> String {
    format!(
        r#"{code}

;(function () {{
  Promise.resolve()
    .then(() => {entry}({args}))
    .then((result) => {{
      const encoded = JSON.stringify(result === undefined ? null : result);
      process.stdout.write(encoded + "\n");
    }})
    .catch((error) => {{
      process.stderr.write(String(error && error.stack ? error.stack : error) + "\n");
      process.exit(1);
    }});
}})();
"#,
        code = code.trim_end(),
        entry = entry,
        args = input.trim(),
    )
}
