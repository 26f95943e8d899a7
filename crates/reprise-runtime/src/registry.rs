//! Loaded procedures, by name and by class version.

use std::sync::Arc;

use dashmap::DashMap;
use reprise_ir::{DEFAULT_METHOD, Fingerprint, ProcedureId};
use reprise_passes::{AnalysisError, DescriptorCache, PrepareOptions, PreparedProcedure};

/// Maps class names to their most recently loaded version, and every loaded
/// version to its prepared code.
///
/// Chains suspended under an older class version keep running that version
/// after a newer one is loaded.
#[derive(Debug, Default)]
pub struct ProcedureRegistry {
    cache: DescriptorCache,
    options: PrepareOptions,
    by_name: DashMap<String, Arc<PreparedProcedure>>,
    by_version: DashMap<(Fingerprint, String), Arc<PreparedProcedure>>,
}

impl ProcedureRegistry {
    pub fn new(options: PrepareOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    /// Prepare the resumable method of a class and make it startable by name.
    pub fn load(&self, bytes: &[u8]) -> Result<Arc<PreparedProcedure>, AnalysisError> {
        let prepared = self.cache.prepare_with(bytes, DEFAULT_METHOD, &self.options)?;
        let id = &prepared.descriptor.id;
        self.by_version.insert(
            (prepared.descriptor.fingerprint, id.method.clone()),
            Arc::clone(&prepared),
        );
        if let Some(previous) = self.by_name.insert(id.class.clone(), Arc::clone(&prepared))
            && previous.descriptor.fingerprint != prepared.descriptor.fingerprint
        {
            tracing::debug!(
                "{id}: replaced version {} with {}",
                previous.descriptor.fingerprint,
                prepared.descriptor.fingerprint
            );
        }
        Ok(prepared)
    }

    /// Latest version of a class.
    pub fn get(&self, class: &str) -> Option<Arc<PreparedProcedure>> {
        self.by_name.get(class).map(|item| Arc::clone(item.value()))
    }

    /// The exact version a descriptor was prepared from.
    pub fn version(
        &self,
        fingerprint: Fingerprint,
        procedure: &ProcedureId,
    ) -> Option<Arc<PreparedProcedure>> {
        self.by_version
            .get(&(fingerprint, procedure.method.clone()))
            .map(|item| Arc::clone(item.value()))
    }

    /// Names of loaded classes, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.by_name.iter().map(|item| item.key().clone()).collect();
        names.sort();
        names
    }

    pub fn cache(&self) -> &DescriptorCache {
        &self.cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reprise_ir::{ClassFile, CodeBuilder};

    fn class_bytes(greeting: &str) -> Vec<u8> {
        let mut b = CodeBuilder::new();
        b.print_str(greeting).pause().ret();
        ClassFile::new("Greeter")
            .with_method(b.build(DEFAULT_METHOD).unwrap())
            .encode()
    }

    #[test]
    fn newer_versions_replace_the_name_but_keep_old_versions() {
        let registry = ProcedureRegistry::default();
        let v1 = registry.load(&class_bytes("hello")).unwrap();
        let v2 = registry.load(&class_bytes("hi")).unwrap();

        let latest = registry.get("Greeter").unwrap();
        assert!(Arc::ptr_eq(&latest, &v2));
        let old = registry
            .version(v1.descriptor.fingerprint, &v1.descriptor.id)
            .unwrap();
        assert!(Arc::ptr_eq(&old, &v1));
        assert_eq!(registry.names(), vec!["Greeter".to_owned()]);
    }

    #[test]
    fn reloading_identical_bytes_reuses_the_preparation() {
        let registry = ProcedureRegistry::default();
        registry.load(&class_bytes("hello")).unwrap();
        registry.load(&class_bytes("hello")).unwrap();
        assert_eq!(registry.cache().analysis_runs(), 1);
    }

    #[test]
    fn clone_requirement_comes_from_options() {
        let registry = ProcedureRegistry::new(PrepareOptions::require_cloneable(["Greeter"]));
        assert!(matches!(
            registry.load(&class_bytes("hello")),
            Err(AnalysisError::CloneRequired { .. })
        ));
        assert!(registry.get("Greeter").is_none());
    }
}
