//! Import filtering for generated sandbox modules.
//!
//! The generated module re-imports what the extracted bodies might
//! reference, with three cases: type-only imports are dropped (nothing to
//! execute), imports of the runtime package are reduced to the shell helper
//! on its runtime-free subpath (the host-only symbols must not pull the
//! provisioner client into the bundle), and everything else passes through
//! verbatim. Unused re-imports are left for the bundler's tree-shaking.

use oxc_ast::ast::{ImportDeclarationSpecifier, ImportOrExportKind, Program, Statement};

/// Local name of the shell template helper re-exported on the runtime-free
/// subpath.
const SHELL_HELPER: &str = "$";

pub(crate) fn sandbox_imports(
    program: &Program<'_>,
    source: &str,
    runtime_package: &str,
) -> Vec<String> {
    let mut lines = Vec::new();
    for stmt in &program.body {
        let Statement::ImportDeclaration(import) = stmt else {
            continue;
        };
        if matches!(import.import_kind, ImportOrExportKind::Type) {
            continue;
        }

        if import.source.value.as_str() == runtime_package {
            let wants_shell = import.specifiers.as_ref().is_some_and(|specs| {
                specs.iter().any(|spec| {
                    matches!(
                        spec,
                        ImportDeclarationSpecifier::ImportSpecifier(named)
                            if named.local.name.as_str() == SHELL_HELPER
                    )
                })
            });
            if wants_shell {
                lines.push(format!(
                    "import {{ {SHELL_HELPER} }} from \"{runtime_package}/shell\";"
                ));
            }
            continue;
        }

        let all_type_only = import.specifiers.as_ref().is_some_and(|specs| {
            !specs.is_empty()
                && specs.iter().all(|spec| {
                    matches!(
                        spec,
                        ImportDeclarationSpecifier::ImportSpecifier(named)
                            if matches!(named.import_kind, ImportOrExportKind::Type)
                    )
                })
        });
        if all_type_only {
            continue;
        }

        lines.push(import.span.source_text(source).to_owned());
    }
    lines
}
