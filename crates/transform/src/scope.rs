//! Lexical scope tracking for the collector.
//!
//! Scopes are function-granular: one frame per enclosing function body, with
//! the module as the root frame. Each frame records the names declared in it
//! (parameters, variable bindings, nested function and class names). Import
//! bindings live in a separate set on the module frame: they satisfy
//! references through re-imports in the generated module and are never
//! treated as closure captures.

use std::collections::HashSet;

#[derive(Debug, Default)]
struct Frame {
    /// Function name, absent for the module frame.
    name: Option<String>,
    declared: HashSet<String>,
}

#[derive(Debug)]
pub struct ScopeStack {
    frames: Vec<Frame>,
    imports: HashSet<String>,
}

impl ScopeStack {
    pub fn new() -> Self {
        Self {
            frames: vec![Frame::default()],
            imports: HashSet::new(),
        }
    }

    pub fn push_function(&mut self, name: &str) {
        self.frames.push(Frame {
            name: Some(name.to_owned()),
            declared: HashSet::new(),
        });
    }

    pub fn pop_function(&mut self) {
        debug_assert!(self.frames.len() > 1, "cannot pop the module frame");
        self.frames.pop();
    }

    pub fn declare(&mut self, name: &str) {
        if let Some(frame) = self.frames.last_mut() {
            frame.declared.insert(name.to_owned());
        }
    }

    pub fn declare_import(&mut self, name: &str) {
        self.imports.insert(name.to_owned());
    }

    /// Function-name path from the outermost enclosing function inward.
    /// Empty at module scope.
    pub fn path(&self) -> Vec<String> {
        self.frames
            .iter()
            .filter_map(|frame| frame.name.clone())
            .collect()
    }

    /// Whether the collector is currently inside a function body.
    pub fn in_function(&self) -> bool {
        self.frames.len() > 1
    }

    /// Whether `name` is declared in any live frame, module scope included.
    /// Import bindings do not count.
    pub fn is_declared(&self, name: &str) -> bool {
        self.frames
            .iter()
            .any(|frame| frame.declared.contains(name))
    }
}
