//! Lexical environments: chains of mutable frames.

use crate::values::{Arity, Value};
use crate::vm::VmError;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

pub type EnvRef = Rc<Environment>;

/// One frame of bindings plus the enclosing frame.
///
/// Frames are shared by every closure and activation that captured them.
#[derive(Default)]
pub struct Environment {
    bindings: RefCell<HashMap<String, Value>>,
    parent: Option<EnvRef>,
}

impl Environment {
    /// An empty root frame.
    pub fn global() -> EnvRef {
        Rc::new(Environment::default())
    }

    pub fn parent(&self) -> Option<&EnvRef> {
        self.parent.as_ref()
    }

    /// Number of frames from this one to the root, inclusive.
    pub fn depth(&self) -> usize {
        let mut depth = 1;
        let mut frame = self;
        while let Some(parent) = &frame.parent {
            depth += 1;
            frame = &**parent;
        }
        depth
    }

    pub fn lookup(&self, name: &str) -> Result<Value, VmError> {
        let mut frame = self;
        loop {
            if let Some(value) = frame.bindings.borrow().get(name) {
                return Ok(value.clone());
            }
            match &frame.parent {
                Some(parent) => frame = &**parent,
                None => return Err(VmError::UnboundVariable(name.to_string())),
            }
        }
    }

    pub fn is_bound(&self, name: &str) -> bool {
        self.lookup(name).is_ok()
    }

    /// Bind in this frame, shadowing any outer binding.
    pub fn define(&self, name: &str, value: Value) {
        self.bindings.borrow_mut().insert(name.to_string(), value);
    }

    /// Overwrite the nearest existing binding.
    pub fn set(&self, name: &str, value: Value) -> Result<(), VmError> {
        let mut frame = self;
        loop {
            if let Some(slot) = frame.bindings.borrow_mut().get_mut(name) {
                *slot = value;
                return Ok(());
            }
            match &frame.parent {
                Some(parent) => frame = &**parent,
                None => return Err(VmError::UnboundVariable(name.to_string())),
            }
        }
    }

    /// A fresh frame under `parent` binding `formals` to the elements of the
    /// argument list `args`, in order.
    pub fn extend(parent: &EnvRef, formals: &[String], args: &Value) -> Result<EnvRef, VmError> {
        let values = args.list_to_vec().ok_or_else(|| VmError::TypeError {
            procedure: "extend-environment".into(),
            expected: "argument list".into(),
            got: args.type_name().into(),
        })?;
        if values.len() != formals.len() {
            return Err(VmError::ArityMismatch { expected: Arity::Exact(formals.len()), got: values.len() });
        }
        let bindings = formals.iter().cloned().zip(values).collect();
        Ok(Rc::new(Environment { bindings: RefCell::new(bindings), parent: Some(Rc::clone(parent)) }))
    }
}

// Closures hold their environment and environments hold closures, so the
// derived impl would recurse forever.
impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<String> = self.bindings.borrow().keys().cloned().collect();
        names.sort();
        f.debug_struct("Environment")
            .field("names", &names)
            .field("depth", &self.depth())
            .finish()
    }
}
