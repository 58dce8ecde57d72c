// Stack Resolver
// Flattens names and nested lists into an ordered list of concrete loaders

use crate::error::{LoaderError, LoaderResult};
use crate::stack::models::{ResolvedStep, StepRef};
use crate::stack::registry::{Lookup, Registry};

/// Depth-first, left-to-right expansion of step references against a registry.
///
/// Unknown names do not fail here; they become [`ResolvedStep::Missing`] and
/// fail when executed. A name that re-enters itself along the current
/// expansion path is reported as [`LoaderError::Cycle`]; the same name reached
/// through two different parents expands both times.
pub struct Resolver<'a> {
    registry: &'a Registry,
}

impl<'a> Resolver<'a> {
    pub fn new(registry: &'a Registry) -> Self {
        Self { registry }
    }

    /// Resolve a single reference (names, loaders, or nested lists)
    pub fn resolve(&self, input: &StepRef) -> LoaderResult<Vec<ResolvedStep>> {
        let mut out = Vec::new();
        let mut path = Vec::new();
        self.expand(input, &mut path, &mut out)?;
        Ok(out)
    }

    /// Resolve several references in order, concatenating the results
    pub fn resolve_all<'r>(
        &self,
        inputs: impl IntoIterator<Item = &'r StepRef>,
    ) -> LoaderResult<Vec<ResolvedStep>> {
        let mut out = Vec::new();
        let mut path = Vec::new();
        for input in inputs {
            self.expand(input, &mut path, &mut out)?;
        }
        Ok(out)
    }

    fn expand(
        &self,
        reference: &StepRef,
        path: &mut Vec<String>,
        out: &mut Vec<ResolvedStep>,
    ) -> LoaderResult<()> {
        match self.registry.lookup(reference) {
            Lookup::Stack(stack) => {
                // Only names produce `Lookup::Stack`
                let name = reference.name().unwrap_or_default().to_string();
                if path.contains(&name) {
                    let mut cycle = path.clone();
                    cycle.push(name);
                    return Err(LoaderError::Cycle(cycle));
                }

                path.push(name);
                for entry in stack {
                    self.expand(entry, path, out)?;
                }
                path.pop();
            }
            Lookup::Passthrough(StepRef::List(items)) => {
                for item in items {
                    self.expand(item, path, out)?;
                }
            }
            Lookup::Passthrough(StepRef::Loader(loader)) => {
                out.push(ResolvedStep::Loader(loader.clone()));
            }
            Lookup::Passthrough(StepRef::Name(name)) => {
                tracing::trace!(name = %name, "unregistered loader name left unresolved");
                out.push(ResolvedStep::Missing(name.clone()));
            }
        }
        Ok(())
    }
}
