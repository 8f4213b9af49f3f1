//! Test registration. Discovery appends modules to a [`RegistryBuilder`]; execution only
//! ever sees the frozen [`TestRegistry`] produced by [`RegistryBuilder::build`].

use crate::types::{TestCase, TestModule};
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct RegistryBuilder {
    modules: Vec<TestModule>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn module(&mut self, module: TestModule) -> &mut Self {
        self.modules.push(module);
        self
    }

    /// Append a test to the trailing ungrouped module, opening one if needed.
    pub fn test(&mut self, case: TestCase) -> &mut Self {
        match self.modules.last_mut() {
            Some(m) if m.name.is_none() && m.init.is_none() => m.tests.push(Arc::new(case)),
            _ => self.modules.push(TestModule::ungrouped().test(case)),
        }
        self
    }

    pub fn build(self) -> TestRegistry {
        TestRegistry {
            modules: self.modules.into(),
        }
    }
}

/// Read-only snapshot of every registered module.
#[derive(Debug, Clone, Default)]
pub struct TestRegistry {
    modules: Arc<[TestModule]>,
}

/// One test in overall registration order.
#[derive(Debug, Clone, Copy)]
pub struct Entry<'a> {
    /// 1-based.
    pub sequence: usize,
    pub module: &'a TestModule,
    pub test: &'a Arc<TestCase>,
}

impl TestRegistry {
    pub fn modules(&self) -> &[TestModule] {
        &self.modules
    }

    pub fn len(&self) -> usize {
        self.modules.iter().map(|m| m.tests.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Module order, then test order within each module.
    pub fn entries(&self) -> impl Iterator<Item = Entry<'_>> {
        self.modules
            .iter()
            .flat_map(|module| module.tests.iter().map(move |test| (module, test)))
            .enumerate()
            .map(|(idx, (module, test))| Entry {
                sequence: idx + 1,
                module,
                test,
            })
    }

    pub fn entry(&self, sequence: usize) -> Option<Entry<'_>> {
        self.entries().find(|e| e.sequence == sequence)
    }
}
