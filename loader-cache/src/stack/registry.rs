// Stack Registry
// Named, raw (unresolved) loader stacks with union-append registration

use crate::error::{LoaderError, LoaderResult};
use crate::stack::models::StepRef;

use std::collections::HashMap;

/// Result of a pass-through lookup
#[derive(Debug, Clone, Copy)]
pub enum Lookup<'a> {
    /// The reference named a registered stack
    Stack(&'a [StepRef]),
    /// Not a registered name; the reference itself is returned unchanged
    Passthrough(&'a StepRef),
}

/// Registry of named stacks for a single loader kind
#[derive(Debug, Clone, Default)]
pub struct Registry {
    stacks: HashMap<String, Vec<StepRef>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `refs` to the stack stored under `name`.
    ///
    /// The top level of `refs` is spliced in; nested names are stored as-is and
    /// only expanded at resolution time. Entries already present (by identity)
    /// are skipped. Returns the new stack length.
    pub fn set(&mut self, name: &str, refs: impl Into<StepRef>) -> LoaderResult<usize> {
        validate_name(name)?;

        let stack = self.stacks.entry(name.to_string()).or_default();
        for entry in refs.into().into_entries() {
            if !stack.iter().any(|existing| existing.is_same(&entry)) {
                stack.push(entry);
            }
        }
        Ok(stack.len())
    }

    /// Raw stack stored under `name`
    pub fn get(&self, name: &str) -> Option<&[StepRef]> {
        self.stacks.get(name).map(Vec::as_slice)
    }

    /// Pass-through lookup: a registered name yields its stack, anything else
    /// comes back unchanged
    pub fn lookup<'a>(&'a self, reference: &'a StepRef) -> Lookup<'a> {
        match reference {
            StepRef::Name(name) => match self.get(name) {
                Some(stack) => Lookup::Stack(stack),
                None => Lookup::Passthrough(reference),
            },
            other => Lookup::Passthrough(other),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.stacks.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.stacks.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.stacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stacks.is_empty()
    }
}

/// Stack names must be non-empty and free of surrounding whitespace
pub fn validate_name(name: &str) -> LoaderResult<()> {
    if name.is_empty() || name.trim() != name {
        return Err(LoaderError::InvalidName(name.to_string()));
    }
    Ok(())
}
