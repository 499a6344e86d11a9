use std::collections::HashMap;
use std::sync::Arc;

use crate::Step;

/// Named steps available for submission.
#[derive(Clone, Default)]
pub struct StepRegistry {
  steps: HashMap<String, Arc<dyn Step>>,
}

impl StepRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a step under `name`, replacing any previous one.
  pub fn register(&mut self, name: impl Into<String>, step: impl Step + 'static) -> &mut Self {
    self.steps.insert(name.into(), Arc::new(step));
    self
  }

  /// Builder form of [`StepRegistry::register`].
  pub fn with(mut self, name: impl Into<String>, step: impl Step + 'static) -> Self {
    self.register(name, step);
    self
  }

  pub fn get(&self, name: &str) -> Option<Arc<dyn Step>> {
    self.steps.get(name).cloned()
  }

  pub fn contains(&self, name: &str) -> bool {
    self.steps.contains_key(name)
  }

  /// Registered names, sorted.
  pub fn names(&self) -> Vec<&str> {
    let mut names: Vec<&str> = self.steps.keys().map(String::as_str).collect();
    names.sort_unstable();
    names
  }
}
