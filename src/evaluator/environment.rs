//! Lexical environments.
//!
//! Frames are reference counted and their bindings are interior-mutable, so a
//! closure holding a frame sees every later `set!` made through any other
//! holder. Frames form a tree rooted at the single global frame of an
//! [`Interpreter`](crate::evaluator::Interpreter).

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::Error;
use crate::ast::{Symbol, Value};

/// Shared handle to an environment frame.
pub type Env = Rc<Environment>;

/// One frame of variable bindings plus a link to the enclosing frame.
#[derive(Default)]
pub struct Environment {
    bindings: RefCell<HashMap<Symbol, Value>>,
    parent: Option<Env>,
}

impl Environment {
    /// Create a root frame.
    pub fn global() -> Env {
        Rc::new(Environment::default())
    }

    /// Create an empty child frame of `self`.
    pub fn extend(self: &Rc<Self>) -> Env {
        Rc::new(Environment {
            bindings: RefCell::new(HashMap::new()),
            parent: Some(Rc::clone(self)),
        })
    }

    /// Create a child frame holding all of `bindings` at once.
    pub fn extend_with(self: &Rc<Self>, bindings: impl IntoIterator<Item = (Symbol, Value)>) -> Env {
        Rc::new(Environment {
            bindings: RefCell::new(bindings.into_iter().collect()),
            parent: Some(Rc::clone(self)),
        })
    }

    /// Shallow copy of this frame's bindings, sharing the parent.
    pub fn clone_frame(&self) -> Env {
        Rc::new(Environment {
            bindings: RefCell::new(self.bindings.borrow().clone()),
            parent: self.parent.clone(),
        })
    }

    pub fn parent(&self) -> Option<&Env> {
        self.parent.as_ref()
    }

    pub fn is_global(&self) -> bool {
        self.parent.is_none()
    }

    /// Look a name up in this frame only.
    pub fn lookup_local(&self, name: &Symbol) -> Option<Value> {
        self.bindings.borrow().get(name).cloned()
    }

    /// Look a name up in this frame and then outward.
    ///
    /// Finding a `letrec` placeholder is an error at the moment of the read.
    pub fn lookup_chain(&self, name: &Symbol) -> Result<Option<Value>, Error> {
        let mut frame = self;
        loop {
            if let Some(value) = frame.lookup_local(name) {
                if let Value::Uninitialized(binding) = &value {
                    return Err(Error::LetrecOrderError(binding.to_string()));
                }
                return Ok(Some(value));
            }
            match &frame.parent {
                Some(parent) => frame = &**parent,
                None => return Ok(None),
            }
        }
    }

    /// Bind or overwrite a name in this frame.
    pub fn assign_local(&self, name: Symbol, value: Value) {
        self.bindings.borrow_mut().insert(name, value);
    }

    /// Mutate the nearest existing binding of `name`. When no frame binds it,
    /// install the binding in the global frame, never in an intermediate one.
    pub fn assign_chain(&self, name: Symbol, value: Value) {
        let mut frame = self;
        loop {
            if let Some(slot) = frame.bindings.borrow_mut().get_mut(&name) {
                *slot = value;
                return;
            }
            match &frame.parent {
                Some(parent) => frame = &**parent,
                None => break,
            }
        }
        frame.assign_local(name, value);
    }

    /// Names bound in this frame and its ancestors with their visible values,
    /// sorted by name. Inner bindings hide outer ones.
    pub fn get_all_bindings(&self) -> Vec<(Symbol, Value)> {
        let mut visible: HashMap<Symbol, Value> = HashMap::new();
        let mut frame = Some(self);
        while let Some(current) = frame {
            for (name, value) in current.bindings.borrow().iter() {
                visible.entry(name.clone()).or_insert_with(|| value.clone());
            }
            frame = current.parent.as_deref();
        }
        let mut result: Vec<_> = visible.into_iter().collect();
        result.sort_by(|a, b| a.0.cmp(&b.0));
        result
    }
}

// Bindings routinely contain closures over this very frame, so only names are shown.
impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<String> = self
            .bindings
            .borrow()
            .keys()
            .map(ToString::to_string)
            .collect();
        names.sort();
        f.debug_struct("Environment")
            .field("names", &names)
            .field("global", &self.is_global())
            .finish()
    }
}
