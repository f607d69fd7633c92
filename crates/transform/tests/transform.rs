use exclave_transform::{TransformOptions, fn_id, transform, transform_or_original};

fn options() -> TransformOptions {
    TransformOptions::new("app/api/x.ts", "app")
}

fn id(scope: &[&str]) -> String {
    let path: Vec<String> = scope.iter().map(|s| (*s).to_owned()).collect();
    fn_id("api/x.ts", &path)
}

#[test]
fn top_level_stub_preserves_signature_and_export() {
    let src = "export async function readFile(path) { \"use sandbox\"; return path.length; }\n";
    let out = transform(src, &options()).unwrap();

    let fn_id = id(&["readFile"]);
    assert!(out.code.starts_with("import { __runSandboxFn } from \"exclave/internal\";\n"));
    assert!(out.code.contains("export async function readFile(path) {"));
    assert!(
        out.code
            .contains(&format!("return __runSandboxFn({{ fnId: \"{fn_id}\", args: [path] }});"))
    );
    assert!(!out.code.contains("use sandbox"));

    let module = out.module.unwrap();
    assert_eq!(module.source_path, "api/x.ts");
    assert_eq!(module.file_name, "api_x.ts");
    assert!(
        module
            .content
            .contains(&format!("export async function {fn_id}(path) {{ return path.length; }}"))
    );
}

#[test]
fn fn_id_is_stable_across_body_edits() {
    let before = transform(
        "export async function foo(a) { \"use sandbox\"; return a * 2; }\n",
        &options(),
    )
    .unwrap();
    let after = transform(
        "export async function foo(a) { \"use sandbox\"; return 7; }\n",
        &options(),
    )
    .unwrap();
    assert_eq!(before.functions[0].fn_id, after.functions[0].fn_id);
    assert_eq!(before.functions[0].fn_id, id(&["foo"]));
}

#[test]
fn nested_function_declaration_becomes_arrow_stub() {
    let src = "async function outer(prefix) { async function inner(x) { \"use sandbox\"; return prefix + x; } return inner(\"y\"); }\n";
    let out = transform(src, &options()).unwrap();

    let fn_id = id(&["outer", "inner"]);
    assert!(out.code.contains(&format!(
        "const inner = async (x) => __runSandboxFn({{ fnId: \"{fn_id}\", args: [x], closureVars: {{ prefix }} }});"
    )));

    let module = out.module.unwrap();
    assert!(module.content.contains(&format!(
        "export async function {fn_id}(__closure, x) {{\n  const {{ prefix }} = __closure; return prefix + x; }}"
    )));
}

#[test]
fn top_level_arrow_keeps_expression_stub() {
    let src = "export const fetchData = async (url) => { \"use sandbox\"; return url; };\n";
    let out = transform(src, &options()).unwrap();
    let fn_id = id(&["fetchData"]);
    assert!(out.code.contains(&format!(
        "export const fetchData = async (url) => __runSandboxFn({{ fnId: \"{fn_id}\", args: [url] }});"
    )));
}

#[test]
fn transform_is_idempotent() {
    let src = "export async function foo() { \"use sandbox\"; return 1; }\n";
    let once = transform(src, &options()).unwrap();
    let twice = transform(&once.code, &options()).unwrap();
    assert_eq!(once.code, twice.code);
    assert!(twice.module.is_none());
}

#[test]
fn no_directive_is_byte_identical() {
    let src = "export async function foo() { return 1; }\nconst x = \"plain\";\n";
    let out = transform(src, &options()).unwrap();
    assert_eq!(out.code, src);
}

#[test]
fn destructured_and_defaulted_params_are_preserved() {
    let src = "export async function job({ id, retries = 3 } = {}, ...extra) { \"use sandbox\"; return id; }\n";
    let out = transform(src, &options()).unwrap();

    assert!(
        out.code
            .contains("export async function job({ id, retries = 3 } = {}, ...extra) {")
    );
    assert!(out.code.contains("args: [{ id, retries }, ...extra]"));

    let module = out.module.unwrap();
    assert!(
        module
            .content
            .contains("({ id, retries = 3 } = {}, ...extra) {")
    );
}

#[test]
fn zero_parameter_function_serialises_empty_args() {
    let src = "export async function ping() { \"use sandbox\"; return \"pong\"; }\n";
    let out = transform(src, &options()).unwrap();
    assert!(out.code.contains("args: [] }"));
}

#[test]
fn generated_module_filters_imports() {
    let src = "import { z } from \"zod\";\nimport type { Config } from \"./config\";\nimport { createSandbox, $ } from \"exclave\";\n\nexport async function run(cmd) { \"use sandbox\"; const parsed = z.string().parse(cmd); await $`echo ${parsed}`; return parsed; }\n";
    let out = transform(src, &options()).unwrap();
    let module = out.module.unwrap();

    assert!(module.content.contains("import { z } from \"zod\";"));
    assert!(module.content.contains("import { $ } from \"exclave/shell\";"));
    assert!(!module.content.contains("createSandbox"));
    assert!(!module.content.contains("./config"));
}

#[test]
fn parse_failure_falls_back_to_original() {
    let src = "export async function broken( { \"use sandbox\";\n";
    let out = transform_or_original(src, &options());
    assert_eq!(out.code, src);
    assert!(out.module.is_none());
}

#[test]
fn annotated_function_inside_annotated_outer_is_collected_once_stubbed() {
    let src = "export async function outer(a) { \"use sandbox\"; async function inner(b) { \"use sandbox\"; return a + b; } return inner(1); }\n";
    let out = transform(src, &options()).unwrap();

    assert_eq!(out.functions.len(), 2);
    // Host side: only the outer stub appears; the inner range lives inside it.
    assert_eq!(out.code.matches("__runSandboxFn({").count(), 1);
    let module = out.module.unwrap();
    assert!(module.content.contains(&id(&["outer"])));
    assert!(module.content.contains(&id(&["outer", "inner"])));
}
