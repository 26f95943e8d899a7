//! The execution driver.
//!
//! Runs procedures from entry or from a continuation identifier, follows
//! call/answer chains, and turns every registry or procedure failure into a
//! [`RunOutcome`].

use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;

use reprise_ir::{ProcedureId, Value};
use reprise_passes::{AnalysisError, PrepareOptions, PreparedProcedure};

use crate::config::ManagerConfig;
use crate::context::ProcedureInstance;
use crate::error::{Fault, FaultKind, ManagerError, RunError};
use crate::id::ContinuationId;
use crate::interp::{Activation, Exit};
use crate::manager::{ContinuationManager, Lease};
use crate::registry::ProcedureRegistry;
use crate::sweeper::Sweeper;

/// Inbound request parameters, read by the `param` instruction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Request {
    params: BTreeMap<String, String>,
}

impl Request {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed(Option<Value>),
    Suspended(ContinuationId),
    Failed(RunError),
    Expired,
}

impl From<ManagerError> for RunOutcome {
    fn from(error: ManagerError) -> Self {
        match error {
            ManagerError::NotFound { .. } => RunOutcome::Expired,
            ManagerError::ConcurrentReentry { id } => {
                RunOutcome::Failed(RunError::ConcurrentReentry { id })
            }
            ManagerError::CapacityExceeded { limit } => {
                RunOutcome::Failed(RunError::CapacityExceeded { limit })
            }
            ManagerError::AwaitingAnswer { id } => {
                RunOutcome::Failed(RunError::AwaitingAnswer { id })
            }
            ManagerError::DuplicateId { id } => RunOutcome::Failed(RunError::DuplicateId { id }),
            ManagerError::NotCloneable { procedure } => RunOutcome::Failed(RunError::Fault(Fault {
                procedure,
                offset: 0,
                kind: FaultKind::corrupt("clone of a procedure without the capability"),
            })),
        }
    }
}

/// Result of one request: the outcome plus everything printed on the way.
#[derive(Debug, Clone, PartialEq)]
pub struct Run {
    pub outcome: RunOutcome,
    pub output: String,
}

/// Entry state of a run.
#[derive(Debug)]
enum Entry {
    Fresh(Arc<PreparedProcedure>),
    Resuming(Lease),
    Expired,
}

#[derive(Debug)]
pub struct Engine {
    manager: Arc<ContinuationManager>,
    procedures: ProcedureRegistry,
    sweeper: Option<Sweeper>,
}

impl Engine {
    pub fn new(config: ManagerConfig) -> Self {
        Self::with_parts(
            Arc::new(ContinuationManager::new(config)),
            ProcedureRegistry::default(),
        )
    }

    pub fn with_parts(manager: Arc<ContinuationManager>, procedures: ProcedureRegistry) -> Self {
        Self {
            manager,
            procedures,
            sweeper: None,
        }
    }

    /// Build an engine whose registry applies `options` when loading.
    pub fn with_options(config: ManagerConfig, options: PrepareOptions) -> Self {
        Self::with_parts(
            Arc::new(ContinuationManager::new(config)),
            ProcedureRegistry::new(options),
        )
    }

    /// Start sweeping expired continuations on a background thread.
    pub fn start_sweeper(&mut self) -> io::Result<()> {
        if self.sweeper.is_none() {
            self.sweeper = Some(Sweeper::spawn(Arc::clone(&self.manager))?);
        }
        Ok(())
    }

    pub fn manager(&self) -> &Arc<ContinuationManager> {
        &self.manager
    }

    pub fn procedures(&self) -> &ProcedureRegistry {
        &self.procedures
    }

    /// Load a class so that it can be started by name.
    pub fn load(&self, bytes: &[u8]) -> Result<ProcedureId, AnalysisError> {
        let prepared = self.procedures.load(bytes)?;
        Ok(prepared.descriptor.id.clone())
    }

    /// Run `class` from entry.
    pub fn start(&self, class: &str, request: &Request) -> Run {
        match self.procedures.get(class) {
            Some(prepared) => self.run(Entry::Fresh(prepared), request),
            None => Run {
                outcome: RunOutcome::Failed(RunError::UnknownProcedure {
                    name: class.to_owned(),
                }),
                output: String::new(),
            },
        }
    }

    /// Re-enter the chain suspended under `id`.
    pub fn resume(&self, id: &ContinuationId, request: &Request) -> Run {
        let entry = match self.manager.checkout(id) {
            Ok(lease) => Entry::Resuming(lease),
            Err(ManagerError::NotFound { .. }) => Entry::Expired,
            Err(error) => {
                return Run {
                    outcome: error.into(),
                    output: String::new(),
                };
            }
        };
        self.run(entry, request)
    }

    pub fn clone_continuation(&self, id: &ContinuationId) -> Result<ContinuationId, ManagerError> {
        self.manager.clone_continuation(id)
    }

    /// Dispose of a chain and the callers waiting on it. Returns whether it
    /// was registered.
    pub fn dispose(&self, id: &ContinuationId) -> bool {
        self.manager.remove_chain(id) > 0
    }

    pub fn sweep(&self) -> usize {
        self.manager.sweep()
    }

    fn run(&self, entry: Entry, request: &Request) -> Run {
        let mut output = String::new();
        let lease = match entry {
            Entry::Expired => {
                tracing::debug!("resume of an expired continuation");
                return Run {
                    outcome: RunOutcome::Expired,
                    output,
                };
            }
            Entry::Resuming(lease) => lease,
            Entry::Fresh(prepared) => {
                let instance = ProcedureInstance::new(&prepared.class);
                let checkout = self
                    .manager
                    .create(Arc::clone(&prepared.descriptor), instance)
                    .and_then(|id| self.manager.checkout(&id));
                match checkout {
                    Ok(lease) => lease,
                    Err(error) => {
                        return Run {
                            outcome: error.into(),
                            output,
                        };
                    }
                }
            }
        };
        let outcome = self.drive(lease, request, &mut output);
        Run { outcome, output }
    }

    /// Run a leased chain, following call/answer hand-offs until some chain
    /// suspends or the outermost one finishes.
    fn drive(&self, mut lease: Lease, request: &Request, output: &mut String) -> RunOutcome {
        let mut resume_value = None;
        loop {
            let context = lease.snapshot();
            let caller = context.caller;
            let descriptor = Arc::clone(&context.descriptor);
            let Some(procedure) = self
                .procedures
                .version(descriptor.fingerprint, &descriptor.id)
            else {
                self.discard_chain(lease.id(), caller);
                return RunOutcome::Failed(RunError::Fault(Fault {
                    procedure: descriptor.id.clone(),
                    offset: 0,
                    kind: FaultKind::corrupt("class version is no longer loaded"),
                }));
            };
            tracing::debug!(
                "{} entering {} at {}",
                lease.id(),
                descriptor.id,
                context.resume_point
            );

            let mut activation = Activation::new(&procedure, &self.manager, request, context)
                .with_resume_value(resume_value.take());
            let exit = activation.run(output);
            let current = activation.id();

            let answer = match exit {
                Err(error) => {
                    self.discard_chain(current, caller);
                    return error.into();
                }
                Ok(Exit::Faulted(fault)) => {
                    tracing::debug!("{current} failed: {fault}");
                    self.discard_chain(current, caller);
                    return RunOutcome::Failed(RunError::Fault(fault));
                }
                Ok(Exit::Suspended { id, call: None }) => {
                    tracing::debug!("{} suspended as {id}", descriptor.id);
                    return RunOutcome::Suspended(id);
                }
                Ok(Exit::Suspended {
                    id,
                    call: Some(target),
                }) => {
                    drop(lease);
                    let Some(child) = self.procedures.get(&target) else {
                        self.discard_chain(id, caller);
                        return RunOutcome::Failed(RunError::UnknownProcedure { name: target });
                    };
                    tracing::debug!("{id} calls {target}");
                    let instance = ProcedureInstance::new(&child.class);
                    let checkout = self
                        .manager
                        .create_child(Arc::clone(&child.descriptor), instance, id)
                        .and_then(|child_id| self.manager.checkout(&child_id));
                    lease = match checkout {
                        Ok(lease) => lease,
                        Err(error) => {
                            self.discard_chain(id, caller);
                            return error.into();
                        }
                    };
                    continue;
                }
                Ok(Exit::Returned(value)) => value,
                Ok(Exit::Answered(value)) => Some(value),
            };

            let Some(caller) = caller else {
                self.manager.remove(&current);
                tracing::debug!("{} completed", descriptor.id);
                return RunOutcome::Completed(answer);
            };
            tracing::debug!("{current} answers {caller}");
            // Hold the caller before letting go of the callee.
            let next = match self.manager.checkout_answer(&caller) {
                Ok(next) => next,
                Err(error) => {
                    self.discard_chain(current, Some(caller));
                    return error.into();
                }
            };
            self.manager.remove(&current);
            lease = next;
            resume_value = Some(answer.unwrap_or(Value::Null));
        }
    }

    /// Remove a failed chain together with every chain waiting on it.
    fn discard_chain(&self, id: ContinuationId, caller: Option<ContinuationId>) {
        if self.manager.remove_chain(&id) == 0
            && let Some(caller) = caller
        {
            self.manager.remove_chain(&caller);
        }
    }
}
