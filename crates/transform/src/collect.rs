//! Sandbox-function collection and closure detection.
//!
//! A statement-driven walk finds every annotated function in the positions
//! the transform supports: async function declarations, arrow and function
//! expressions bound to variables, default-exported functions, and the same
//! shapes nested inside other functions. The walk keeps a function-granular
//! scope stack so nested functions can resolve their free identifiers
//! against enclosing scopes.

use std::collections::HashSet;

use oxc_ast::Visit;
use oxc_ast::ast::{
    ArrowFunctionExpression, BindingIdentifier, BindingPattern, BindingPatternKind, Declaration,
    ExportDefaultDeclarationKind, Expression, ForStatementInit, ForStatementLeft,
    FormalParameters, Function, FunctionBody, IdentifierReference, ImportDeclarationSpecifier,
    Program, PropertyKey, Statement, TSTypeAnnotation, TSTypeParameterInstantiation,
    VariableDeclaration,
};
use oxc_span::Span;

use crate::error::{Error, Result};
use crate::globals;
use crate::idgen;
use crate::scope::ScopeStack;

/// Syntactic shape of an annotated function; drives stub emission.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum FnShape {
    /// `async function f() {}` (possibly exported or default-exported).
    Declaration,
    /// `const f = async function () {}`.
    Expression,
    /// `const f = async () => {}`.
    Arrow,
}

/// One annotated function found during transformation.
#[derive(Clone, Debug)]
pub struct SandboxFn {
    /// Stable identifier; the generated module exports under this name.
    pub fn_id: String,
    /// Name the function is bound to in the source.
    pub original_name: String,
    /// Enclosing function names, innermost last; `len() == 1` at top level.
    pub scope_path: Vec<String>,
    /// Verbatim parameter list, without the surrounding parentheses.
    pub params_src: String,
    /// One argument-forwarding expression per parameter, in order.
    pub forward_args: Vec<String>,
    /// Captured free identifiers, sorted; empty for top-level functions.
    pub closure_vars: Vec<String>,
    pub(crate) shape: FnShape,
    pub(crate) nested: bool,
    /// Host-side range the stub replaces.
    pub(crate) stub_span: Span,
    /// The function body block, braces included.
    pub(crate) body_span: Span,
    /// First byte after the directive (and its semicolon, if separate).
    pub(crate) content_start: u32,
}

pub(crate) fn collect(
    program: &Program<'_>,
    source: &str,
    rel_path: &str,
) -> Result<Vec<SandboxFn>> {
    let mut collector = Collector {
        source,
        rel_path,
        scopes: ScopeStack::new(),
        records: Vec::new(),
    };
    collector.declare_module(program);
    for stmt in &program.body {
        collector.statement(stmt)?;
    }
    Ok(collector.records)
}

enum FnRef<'b, 'a> {
    Func(&'b Function<'a>),
    Arrow(&'b ArrowFunctionExpression<'a>),
}

impl<'b, 'a> FnRef<'b, 'a> {
    fn params(&self) -> &'b FormalParameters<'a> {
        match self {
            Self::Func(f) => &f.params,
            Self::Arrow(a) => &a.params,
        }
    }

    fn body(&self) -> Option<&'b FunctionBody<'a>> {
        match self {
            Self::Func(f) => f.body.as_deref(),
            Self::Arrow(a) => Some(&a.body),
        }
    }

    fn is_async(&self) -> bool {
        match self {
            Self::Func(f) => f.r#async,
            Self::Arrow(a) => a.r#async,
        }
    }

    fn span(&self) -> Span {
        match self {
            Self::Func(f) => f.span,
            Self::Arrow(a) => a.span,
        }
    }

    /// Non-block arrow bodies contribute no scope and cannot be annotated.
    fn has_block_body(&self) -> bool {
        match self {
            Self::Func(_) => true,
            Self::Arrow(a) => !a.expression,
        }
    }

    fn is_annotated(&self) -> bool {
        self.has_block_body()
            && self.body().is_some_and(|body| {
                body.directives
                    .first()
                    .is_some_and(|d| d.directive.as_str() == crate::DIRECTIVE)
            })
    }
}

struct Collector<'s> {
    source: &'s str,
    rel_path: &'s str,
    scopes: ScopeStack,
    records: Vec<SandboxFn>,
}

impl Collector<'_> {
    // ---- declaration pass (hoisting) ----

    fn declare_module(&mut self, program: &Program<'_>) {
        for stmt in &program.body {
            match stmt {
                Statement::ImportDeclaration(import) => {
                    if let Some(specifiers) = &import.specifiers {
                        for spec in specifiers {
                            let local = match spec {
                                ImportDeclarationSpecifier::ImportSpecifier(s) => &s.local,
                                ImportDeclarationSpecifier::ImportDefaultSpecifier(s) => &s.local,
                                ImportDeclarationSpecifier::ImportNamespaceSpecifier(s) => {
                                    &s.local
                                }
                            };
                            self.scopes.declare_import(local.name.as_str());
                        }
                    }
                }
                Statement::ExportNamedDeclaration(export) => {
                    if let Some(decl) = &export.declaration {
                        self.declare_declaration(decl);
                    }
                }
                Statement::ExportDefaultDeclaration(export) => {
                    if let ExportDefaultDeclarationKind::FunctionDeclaration(func) =
                        &export.declaration
                        && let Some(id) = &func.id
                    {
                        self.scopes.declare(id.name.as_str());
                    }
                }
                other => self.declare_statement(other),
            }
        }
    }

    fn declare_declaration(&mut self, decl: &Declaration<'_>) {
        match decl {
            Declaration::VariableDeclaration(var) => self.declare_variables(var),
            Declaration::FunctionDeclaration(func) => {
                if let Some(id) = &func.id {
                    self.scopes.declare(id.name.as_str());
                }
            }
            Declaration::ClassDeclaration(class) => {
                if let Some(id) = &class.id {
                    self.scopes.declare(id.name.as_str());
                }
            }
            _ => {}
        }
    }

    /// Register every name `stmt` declares into the current frame, without
    /// entering nested function bodies. Scopes are function-granular, so
    /// block-scoped bindings land in the enclosing function frame.
    fn declare_statement(&mut self, stmt: &Statement<'_>) {
        match stmt {
            Statement::VariableDeclaration(var) => self.declare_variables(var),
            Statement::FunctionDeclaration(func) => {
                if let Some(id) = &func.id {
                    self.scopes.declare(id.name.as_str());
                }
            }
            Statement::ClassDeclaration(class) => {
                if let Some(id) = &class.id {
                    self.scopes.declare(id.name.as_str());
                }
            }
            Statement::BlockStatement(block) => {
                for s in &block.body {
                    self.declare_statement(s);
                }
            }
            Statement::IfStatement(s) => {
                self.declare_statement(&s.consequent);
                if let Some(alternate) = &s.alternate {
                    self.declare_statement(alternate);
                }
            }
            Statement::ForStatement(s) => {
                if let Some(ForStatementInit::VariableDeclaration(var)) = &s.init {
                    self.declare_variables(var);
                }
                self.declare_statement(&s.body);
            }
            Statement::ForInStatement(s) => {
                if let ForStatementLeft::VariableDeclaration(var) = &s.left {
                    self.declare_variables(var);
                }
                self.declare_statement(&s.body);
            }
            Statement::ForOfStatement(s) => {
                if let ForStatementLeft::VariableDeclaration(var) = &s.left {
                    self.declare_variables(var);
                }
                self.declare_statement(&s.body);
            }
            Statement::WhileStatement(s) => self.declare_statement(&s.body),
            Statement::DoWhileStatement(s) => self.declare_statement(&s.body),
            Statement::LabeledStatement(s) => self.declare_statement(&s.body),
            Statement::TryStatement(s) => {
                for inner in &s.block.body {
                    self.declare_statement(inner);
                }
                if let Some(handler) = &s.handler {
                    if let Some(param) = &handler.param {
                        self.declare_binding(&param.pattern);
                    }
                    for inner in &handler.body.body {
                        self.declare_statement(inner);
                    }
                }
                if let Some(finalizer) = &s.finalizer {
                    for inner in &finalizer.body {
                        self.declare_statement(inner);
                    }
                }
            }
            Statement::SwitchStatement(s) => {
                for case in &s.cases {
                    for inner in &case.consequent {
                        self.declare_statement(inner);
                    }
                }
            }
            _ => {}
        }
    }

    fn declare_variables(&mut self, decl: &VariableDeclaration<'_>) {
        for declarator in &decl.declarations {
            self.declare_binding(&declarator.id);
        }
    }

    fn declare_binding(&mut self, pattern: &BindingPattern<'_>) {
        match &pattern.kind {
            BindingPatternKind::BindingIdentifier(ident) => {
                self.scopes.declare(ident.name.as_str());
            }
            BindingPatternKind::ObjectPattern(object) => {
                for prop in &object.properties {
                    self.declare_binding(&prop.value);
                }
                if let Some(rest) = &object.rest {
                    self.declare_binding(&rest.argument);
                }
            }
            BindingPatternKind::ArrayPattern(array) => {
                for element in array.elements.iter().flatten() {
                    self.declare_binding(element);
                }
                if let Some(rest) = &array.rest {
                    self.declare_binding(&rest.argument);
                }
            }
            BindingPatternKind::AssignmentPattern(assign) => self.declare_binding(&assign.left),
        }
    }

    // ---- find pass ----

    fn statement(&mut self, stmt: &Statement<'_>) -> Result<()> {
        match stmt {
            Statement::FunctionDeclaration(func) => {
                if let Some(id) = &func.id {
                    let name = id.name.to_string();
                    self.function_like(&name, &FnRef::Func(func), FnShape::Declaration)?;
                }
            }
            Statement::VariableDeclaration(var) => self.variable_declaration(var)?,
            Statement::ExportNamedDeclaration(export) => {
                if let Some(decl) = &export.declaration {
                    match decl {
                        Declaration::FunctionDeclaration(func) => {
                            if let Some(id) = &func.id {
                                let name = id.name.to_string();
                                self.function_like(
                                    &name,
                                    &FnRef::Func(func),
                                    FnShape::Declaration,
                                )?;
                            }
                        }
                        Declaration::VariableDeclaration(var) => {
                            self.variable_declaration(var)?;
                        }
                        _ => {}
                    }
                }
            }
            Statement::ExportDefaultDeclaration(export) => match &export.declaration {
                ExportDefaultDeclarationKind::FunctionDeclaration(func) => {
                    if let Some(id) = &func.id {
                        let name = id.name.to_string();
                        self.function_like(&name, &FnRef::Func(func), FnShape::Declaration)?;
                    } else {
                        self.anonymous_default(&FnRef::Func(func))?;
                    }
                }
                ExportDefaultDeclarationKind::ArrowFunctionExpression(arrow) => {
                    self.anonymous_default(&FnRef::Arrow(arrow))?;
                }
                _ => {}
            },
            Statement::BlockStatement(block) => {
                for s in &block.body {
                    self.statement(s)?;
                }
            }
            Statement::IfStatement(s) => {
                self.statement(&s.consequent)?;
                if let Some(alternate) = &s.alternate {
                    self.statement(alternate)?;
                }
            }
            Statement::ForStatement(s) => self.statement(&s.body)?,
            Statement::ForInStatement(s) => self.statement(&s.body)?,
            Statement::ForOfStatement(s) => self.statement(&s.body)?,
            Statement::WhileStatement(s) => self.statement(&s.body)?,
            Statement::DoWhileStatement(s) => self.statement(&s.body)?,
            Statement::LabeledStatement(s) => self.statement(&s.body)?,
            Statement::TryStatement(s) => {
                for inner in &s.block.body {
                    self.statement(inner)?;
                }
                if let Some(handler) = &s.handler {
                    for inner in &handler.body.body {
                        self.statement(inner)?;
                    }
                }
                if let Some(finalizer) = &s.finalizer {
                    for inner in &finalizer.body {
                        self.statement(inner)?;
                    }
                }
            }
            Statement::SwitchStatement(s) => {
                for case in &s.cases {
                    for inner in &case.consequent {
                        self.statement(inner)?;
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn variable_declaration(&mut self, decl: &VariableDeclaration<'_>) -> Result<()> {
        for declarator in &decl.declarations {
            let BindingPatternKind::BindingIdentifier(ident) = &declarator.id.kind else {
                continue;
            };
            let name = ident.name.to_string();
            match &declarator.init {
                Some(Expression::ArrowFunctionExpression(arrow)) => {
                    self.function_like(&name, &FnRef::Arrow(arrow), FnShape::Arrow)?;
                }
                Some(Expression::FunctionExpression(func)) => {
                    self.function_like(&name, &FnRef::Func(func), FnShape::Expression)?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn function_like(&mut self, name: &str, func: &FnRef<'_, '_>, shape: FnShape) -> Result<()> {
        self.maybe_record(name, func, shape)?;
        self.recurse_into(name, func)
    }

    /// Default exports without a name cannot receive a stable id. The export
    /// itself, or any annotated function nested under it, is refused rather
    /// than silently skipped or given a guessed name.
    fn anonymous_default(&mut self, func: &FnRef<'_, '_>) -> Result<()> {
        if func.is_annotated() {
            return Err(Error::AnonymousDefaultExport {
                path: self.rel_path.to_owned(),
            });
        }
        let before = self.records.len();
        self.recurse_into("default", func)?;
        if self.records.len() > before {
            return Err(Error::AnonymousDefaultExport {
                path: self.rel_path.to_owned(),
            });
        }
        Ok(())
    }

    fn maybe_record(&mut self, name: &str, func: &FnRef<'_, '_>, shape: FnShape) -> Result<()> {
        if !func.is_annotated() {
            return Ok(());
        }
        if !func.is_async() {
            tracing::warn!(
                path = self.rel_path,
                function = name,
                "directive on a synchronous function is ignored"
            );
            return Ok(());
        }
        let Some(body) = func.body() else {
            return Ok(());
        };
        let Some(directive) = body.directives.first() else {
            return Ok(());
        };

        let mut scope_path = self.scopes.path();
        scope_path.push(name.to_owned());
        let nested = self.scopes.in_function();

        let (refs, locals) = collect_refs(func.params(), body);
        let closure_vars = if nested {
            let mut vars: Vec<String> = refs
                .iter()
                .filter(|name| {
                    let name = name.as_str();
                    !locals.contains(name)
                        && !globals::is_builtin(name)
                        && self.scopes.is_declared(name)
                })
                .cloned()
                .collect();
            vars.sort_unstable();
            vars
        } else {
            Vec::new()
        };

        let forward_args = forward_args(name, func.params())?;
        let stub_span = if nested { func.span() } else { body.span };

        self.records.push(SandboxFn {
            fn_id: idgen::fn_id(self.rel_path, &scope_path),
            original_name: name.to_owned(),
            scope_path,
            params_src: params_source(self.source, func.params()),
            forward_args,
            closure_vars,
            shape,
            nested,
            stub_span,
            body_span: body.span,
            content_start: content_start(self.source, directive.span.end),
        });
        Ok(())
    }

    fn recurse_into(&mut self, name: &str, func: &FnRef<'_, '_>) -> Result<()> {
        if !func.has_block_body() {
            return Ok(());
        }
        let Some(body) = func.body() else {
            return Ok(());
        };
        self.scopes.push_function(name);
        for param in &func.params().items {
            self.declare_binding(&param.pattern);
        }
        if let Some(rest) = &func.params().rest {
            self.declare_binding(&rest.argument);
        }
        for stmt in &body.statements {
            self.declare_statement(stmt);
        }
        let mut result = Ok(());
        for stmt in &body.statements {
            if let Err(err) = self.statement(stmt) {
                result = Err(err);
                break;
            }
        }
        self.scopes.pop_function();
        result
    }
}

// ---- reference collection ----

#[derive(Default)]
struct RefCollector {
    refs: HashSet<String>,
    locals: HashSet<String>,
}

impl<'a> Visit<'a> for RefCollector {
    fn visit_identifier_reference(&mut self, it: &IdentifierReference<'a>) {
        self.refs.insert(it.name.to_string());
    }

    fn visit_binding_identifier(&mut self, it: &BindingIdentifier<'a>) {
        self.locals.insert(it.name.to_string());
    }

    // Type positions are erased at runtime and must not produce captures.
    fn visit_ts_type_annotation(&mut self, _it: &TSTypeAnnotation<'a>) {}

    fn visit_ts_type_parameter_instantiation(&mut self, _it: &TSTypeParameterInstantiation<'a>) {}
}

fn collect_refs(
    params: &FormalParameters<'_>,
    body: &FunctionBody<'_>,
) -> (HashSet<String>, HashSet<String>) {
    let mut collector = RefCollector::default();
    collector.visit_formal_parameters(params);
    collector.visit_function_body(body);
    (collector.refs, collector.locals)
}

// ---- parameter handling ----

fn params_source(source: &str, params: &FormalParameters<'_>) -> String {
    let text = params.span.source_text(source).trim();
    let inner = text
        .strip_prefix('(')
        .and_then(|t| t.strip_suffix(')'))
        .unwrap_or(text);
    inner.trim().to_owned()
}

fn forward_args(name: &str, params: &FormalParameters<'_>) -> Result<Vec<String>> {
    let mut args = Vec::with_capacity(params.items.len() + 1);
    for param in &params.items {
        args.push(forward_expr(name, &param.pattern)?);
    }
    if let Some(rest) = &params.rest {
        args.push(format!("...{}", forward_expr(name, &rest.argument)?));
    }
    Ok(args)
}

/// Rebuild a value expression from a binding pattern so the stub can forward
/// what the caller passed. Defaults are dropped: the generated module keeps
/// the original parameter list and re-applies them inside the VM.
fn forward_expr(name: &str, pattern: &BindingPattern<'_>) -> Result<String> {
    let unsupported = |reason: &str| Error::UnsupportedPattern {
        name: name.to_owned(),
        reason: reason.to_owned(),
    };
    match &pattern.kind {
        BindingPatternKind::BindingIdentifier(ident) => Ok(ident.name.to_string()),
        BindingPatternKind::AssignmentPattern(assign) => forward_expr(name, &assign.left),
        BindingPatternKind::ObjectPattern(object) => {
            let mut parts = Vec::with_capacity(object.properties.len() + 1);
            for prop in &object.properties {
                if prop.computed {
                    return Err(unsupported("computed key in destructured parameter"));
                }
                let key = match &prop.key {
                    PropertyKey::StaticIdentifier(ident) => ident.name.to_string(),
                    PropertyKey::StringLiteral(lit) => format!("\"{}\"", lit.value),
                    _ => return Err(unsupported("non-literal key in destructured parameter")),
                };
                let value = forward_expr(name, &prop.value)?;
                if prop.shorthand && key == value {
                    parts.push(key);
                } else {
                    parts.push(format!("{key}: {value}"));
                }
            }
            if let Some(rest) = &object.rest {
                parts.push(format!("...{}", forward_expr(name, &rest.argument)?));
            }
            Ok(format!("{{ {} }}", parts.join(", ")))
        }
        BindingPatternKind::ArrayPattern(array) => {
            let mut parts = Vec::with_capacity(array.elements.len() + 1);
            for element in &array.elements {
                match element {
                    Some(p) => parts.push(forward_expr(name, p)?),
                    None => parts.push("undefined".to_owned()),
                }
            }
            if let Some(rest) = &array.rest {
                parts.push(format!("...{}", forward_expr(name, &rest.argument)?));
            }
            Ok(format!("[{}]", parts.join(", ")))
        }
    }
}

fn content_start(source: &str, directive_end: u32) -> u32 {
    let bytes = source.as_bytes();
    let mut idx = directive_end as usize;
    if idx < bytes.len() && bytes[idx] == b';' {
        idx += 1;
    }
    u32::try_from(idx).unwrap_or(directive_end)
}
