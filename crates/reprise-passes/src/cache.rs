//! Process-wide cache of prepared procedures.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use reprise_ir::{ClassFile, Fingerprint};

use crate::analysis::{analyze, verify_body};
use crate::descriptor::ProcedureDescriptor;
use crate::error::AnalysisError;
use crate::transform::{InstrumentedMethod, transform};

/// A procedure ready to run: its descriptor, instrumented code, and the
/// class it was prepared from.
#[derive(Debug)]
pub struct PreparedProcedure {
    pub descriptor: Arc<ProcedureDescriptor>,
    pub code: InstrumentedMethod,
    pub class: Arc<ClassFile>,
}

#[derive(Debug, Clone, Default)]
pub struct PrepareOptions {
    /// Classes that must be cloneable. Preparing one that is not fails with
    /// [`AnalysisError::CloneRequired`].
    pub require_cloneable: BTreeSet<String>,
}

impl PrepareOptions {
    pub fn require_cloneable<I, S>(classes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            require_cloneable: classes.into_iter().map(Into::into).collect(),
        }
    }
}

type CacheKey = (Fingerprint, String);

/// Caches analysis results by `(fingerprint, method)`.
///
/// Failures are cached too, so a broken class version fails the same way on
/// every attempt without being analyzed again.
#[derive(Debug, Default)]
pub struct DescriptorCache {
    entries: DashMap<CacheKey, Result<Arc<PreparedProcedure>, AnalysisError>>,
    analysis_runs: AtomicUsize,
}

impl DescriptorCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prepare(
        &self,
        bytes: &[u8],
        method: &str,
    ) -> Result<Arc<PreparedProcedure>, AnalysisError> {
        self.prepare_with(bytes, method, &PrepareOptions::default())
    }

    pub fn prepare_with(
        &self,
        bytes: &[u8],
        method: &str,
        options: &PrepareOptions,
    ) -> Result<Arc<PreparedProcedure>, AnalysisError> {
        let fingerprint = Fingerprint::of(bytes);
        let prepared = self
            .entries
            .entry((fingerprint, method.to_owned()))
            .or_insert_with(|| {
                self.analysis_runs.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("preparing {method} from class {fingerprint}");
                Self::build(bytes, method, fingerprint)
            })
            .clone()?;

        let class = &prepared.descriptor.id.class;
        if !prepared.descriptor.cloneable && options.require_cloneable.contains(class) {
            return Err(AnalysisError::CloneRequired {
                class: class.clone(),
            });
        }
        Ok(prepared)
    }

    fn build(
        bytes: &[u8],
        method: &str,
        fingerprint: Fingerprint,
    ) -> Result<Arc<PreparedProcedure>, AnalysisError> {
        let class = ClassFile::decode(bytes)?;
        let descriptor = analyze(&class, method, fingerprint)?;
        let code = transform(&class, method, &descriptor)?;
        verify_body(&class, &code.method)?;
        Ok(Arc::new(PreparedProcedure {
            descriptor: Arc::new(descriptor),
            code,
            class: Arc::new(class),
        }))
    }

    /// Number of times analysis actually ran.
    pub fn analysis_runs(&self) -> usize {
        self.analysis_runs.load(Ordering::Relaxed)
    }

    /// Drop every cached result for `fingerprint`.
    pub fn invalidate(&self, fingerprint: Fingerprint) {
        self.entries.retain(|(fp, _), _| *fp != fingerprint);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reprise_ir::{CodeBuilder, SlotType};

    fn class_bytes(cloneable: bool, pause_with_stack: bool) -> Vec<u8> {
        let mut b = CodeBuilder::new();
        if pause_with_stack {
            b.const_int(1).pause().print();
        } else {
            b.const_int(1).store(0, SlotType::Int).pause();
        }
        b.ret();
        ClassFile::new("Wizard")
            .cloneable(cloneable)
            .with_method(b.build("process").unwrap())
            .encode()
    }

    #[test]
    fn repeated_preparation_reuses_the_analysis() {
        let cache = DescriptorCache::new();
        let bytes = class_bytes(false, false);
        let first = cache.prepare(&bytes, "process").unwrap();
        let second = cache.prepare(&bytes, "process").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.analysis_runs(), 1);
    }

    #[test]
    fn failures_are_cached() {
        let cache = DescriptorCache::new();
        let bytes = class_bytes(false, true);
        let first = cache.prepare(&bytes, "process").unwrap_err();
        let second = cache.prepare(&bytes, "process").unwrap_err();
        assert_eq!(first, second);
        assert_eq!(cache.analysis_runs(), 1);
    }

    #[test]
    fn new_fingerprint_is_analyzed_separately() {
        let cache = DescriptorCache::new();
        cache.prepare(&class_bytes(false, false), "process").unwrap();
        cache.prepare(&class_bytes(true, false), "process").unwrap();
        assert_eq!(cache.analysis_runs(), 2);

        cache.invalidate(Fingerprint::of(&class_bytes(true, false)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn clone_requirement_is_checked() {
        let cache = DescriptorCache::new();
        let options = PrepareOptions::require_cloneable(["Wizard"]);
        let err = cache
            .prepare_with(&class_bytes(false, false), "process", &options)
            .unwrap_err();
        assert_eq!(
            err,
            AnalysisError::CloneRequired {
                class: "Wizard".to_owned()
            }
        );
        assert!(
            cache
                .prepare_with(&class_bytes(true, false), "process", &options)
                .is_ok()
        );
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        let cache = DescriptorCache::new();
        assert!(matches!(
            cache.prepare(b"{", "process"),
            Err(AnalysisError::Decode(_))
        ));
    }

    #[test]
    fn prepared_code_passes_reverification() {
        let mut b = CodeBuilder::new();
        let (start, end, handler) = (b.label(), b.label(), b.label());
        b.const_str("ctx").store(0, SlotType::Ref);
        b.bind(start);
        b.call("Child", SlotType::Int).print();
        b.bind(end);
        b.ret();
        b.bind(handler);
        b.print().load(0, SlotType::Ref).print().ret();
        b.try_region(start, end, handler);
        let class = ClassFile::new("Parent").with_method(b.build("process").unwrap());

        let prepared = DescriptorCache::new()
            .prepare(&class.encode(), "process")
            .unwrap();
        assert_eq!(verify_body(&prepared.class, &prepared.code.method), Ok(()));
    }
}
