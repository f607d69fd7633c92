//! Stub and sandbox-module emission.
//!
//! Emission is span-based text surgery on the original source: the collector
//! hands over byte ranges, and this module splices replacement text into
//! them. Replacements never overlap; a nested record whose range sits inside
//! an already-stubbed outer range is skipped on the host side (its body
//! travels to the VM inside the outer function) while still being exported
//! from the generated module.

use oxc_span::Span;

use crate::collect::{FnShape, SandboxFn};
use crate::error::{Error, Result};

struct Edit {
    start: u32,
    end: u32,
    replacement: String,
}

fn splice(source: &str, mut edits: Vec<Edit>) -> Result<String> {
    edits.sort_by_key(|e| (e.start, e.end));
    let mut out = String::with_capacity(source.len());
    let mut cursor = 0u32;
    for edit in &edits {
        if edit.start < cursor {
            return Err(Error::OverlappingEdits { offset: edit.start });
        }
        out.push_str(&source[cursor as usize..edit.start as usize]);
        out.push_str(&edit.replacement);
        cursor = edit.end;
    }
    out.push_str(&source[cursor as usize..]);
    Ok(out)
}

/// The forwarded call every stub makes.
fn call_expr(record: &SandboxFn) -> String {
    let args = record.forward_args.join(", ");
    if record.closure_vars.is_empty() {
        format!(
            "__runSandboxFn({{ fnId: \"{}\", args: [{args}] }})",
            record.fn_id
        )
    } else {
        let captured = record.closure_vars.join(", ");
        format!(
            "__runSandboxFn({{ fnId: \"{}\", args: [{args}], closureVars: {{ {captured} }} }})",
            record.fn_id
        )
    }
}

fn stub_text(record: &SandboxFn) -> String {
    let call = call_expr(record);
    if record.nested {
        // Nested functions are rewritten to arrows so the stub stays an
        // expression with the captured names still in scope.
        let arrow = format!("async ({}) => {call}", record.params_src);
        if record.shape == FnShape::Declaration {
            format!("const {} = {arrow};", record.original_name)
        } else {
            arrow
        }
    } else if record.shape == FnShape::Arrow {
        call
    } else {
        format!("{{\n  return {call};\n}}")
    }
}

pub(crate) fn emit_stubbed_source(
    source: &str,
    records: &[SandboxFn],
    runtime_package: &str,
) -> Result<String> {
    let mut edits = vec![Edit {
        start: 0,
        end: 0,
        replacement: format!("import {{ __runSandboxFn }} from \"{runtime_package}/internal\";\n"),
    }];

    let mut covered: Vec<Span> = Vec::new();
    for record in records {
        let span = record.stub_span;
        if covered
            .iter()
            .any(|outer| outer.start <= span.start && span.end <= outer.end)
        {
            continue;
        }
        covered.push(span);
        edits.push(Edit {
            start: span.start,
            end: span.end,
            replacement: stub_text(record),
        });
    }

    splice(source, edits)
}

pub(crate) fn emit_sandbox_module(
    source: &str,
    rel_path: &str,
    records: &[SandboxFn],
    import_lines: &[String],
) -> Result<String> {
    let mut out = String::new();
    out.push_str(&format!("// Sandbox module generated from {rel_path}.\n"));
    for line in import_lines {
        out.push_str(line);
        out.push('\n');
    }
    out.push('\n');

    for record in records {
        let inner_end = record.body_span.end.saturating_sub(1);
        if record.content_start > inner_end {
            return Err(Error::OverlappingEdits {
                offset: record.content_start,
            });
        }
        let body = &source[record.content_start as usize..inner_end as usize];
        if record.closure_vars.is_empty() {
            out.push_str(&format!(
                "export async function {}({}) {{{body}}}\n\n",
                record.fn_id, record.params_src
            ));
        } else {
            let captured = record.closure_vars.join(", ");
            let params = if record.params_src.is_empty() {
                "__closure".to_owned()
            } else {
                format!("__closure, {}", record.params_src)
            };
            out.push_str(&format!(
                "export async function {}({params}) {{\n  const {{ {captured} }} = __closure;{body}}}\n\n",
                record.fn_id
            ));
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splice_applies_sorted_edits() {
        let out = splice(
            "abcdef",
            vec![
                Edit {
                    start: 4,
                    end: 6,
                    replacement: "Z".into(),
                },
                Edit {
                    start: 0,
                    end: 1,
                    replacement: "X".into(),
                },
            ],
        )
        .unwrap();
        assert_eq!(out, "XbcdZ");
    }

    #[test]
    fn splice_rejects_overlap() {
        let err = splice(
            "abcdef",
            vec![
                Edit {
                    start: 0,
                    end: 3,
                    replacement: "X".into(),
                },
                Edit {
                    start: 2,
                    end: 4,
                    replacement: "Y".into(),
                },
            ],
        )
        .unwrap_err();
        assert!(matches!(err, Error::OverlappingEdits { .. }));
    }
}
