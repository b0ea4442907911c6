//! Procedure ordering
//!
//! Procedures in a group mutate shared remote and fixture state, so they
//! must run in one fixed sequence. The sequence is fixed by an ordinal the
//! author assigns at registration; names and registration order play no
//! part. Ordinals are unique within a group, so the order is total.

use std::fmt;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::time::Instant;
use tracing::{error, info};

use crate::errors::{HarnessError, HarnessResult};

/// Anything that carries an author-assigned ordinal
pub trait Ordered {
    fn ordinal(&self) -> u32;
    fn name(&self) -> &str;
}

/// Sort ascending by ordinal
pub fn order<P: Ordered>(mut procedures: Vec<P>) -> Vec<P> {
    procedures.sort_by_key(Ordered::ordinal);
    procedures
}

// ----------------------------------------------------------------------------
// Procedure Groups
// ----------------------------------------------------------------------------

type ProcedureBody<C> = Box<dyn for<'a> FnMut(&'a mut C) -> BoxFuture<'a, HarnessResult<()>> + Send>;

/// One step of an ordered run
pub struct Procedure<C> {
    ordinal: u32,
    name: String,
    body: ProcedureBody<C>,
}

impl<C> Ordered for Procedure<C> {
    fn ordinal(&self) -> u32 {
        self.ordinal
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl<C> fmt::Debug for Procedure<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Procedure")
            .field("ordinal", &self.ordinal)
            .field("name", &self.name)
            .finish()
    }
}

/// Named set of procedures over a shared context `C`
pub struct ProcedureGroup<C> {
    name: String,
    procedures: Vec<Procedure<C>>,
}

impl<C> ProcedureGroup<C> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            procedures: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register `body` at `ordinal`; a taken ordinal is rejected
    pub fn register<F>(&mut self, ordinal: u32, name: impl Into<String>, body: F) -> HarnessResult<()>
    where
        F: for<'a> FnMut(&'a mut C) -> BoxFuture<'a, HarnessResult<()>> + Send + 'static,
    {
        let name = name.into();
        if let Some(existing) = self.procedures.iter().find(|p| p.ordinal == ordinal) {
            return Err(HarnessError::DuplicateOrdinal {
                ordinal,
                existing: existing.name.clone(),
                name,
            });
        }

        self.procedures.push(Procedure {
            ordinal,
            name,
            body: Box::new(body),
        });
        self.procedures = order(std::mem::take(&mut self.procedures));
        Ok(())
    }

    /// Procedures in execution order
    pub fn procedures(&self) -> &[Procedure<C>] {
        &self.procedures
    }

    pub fn names(&self) -> Vec<&str> {
        self.procedures.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.procedures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.procedures.is_empty()
    }
}

// ----------------------------------------------------------------------------
// Sequential Runner
// ----------------------------------------------------------------------------

/// Result of one procedure
#[derive(Debug)]
pub struct ProcedureOutcome {
    pub ordinal: u32,
    pub name: String,
    pub elapsed: Duration,
    pub result: HarnessResult<()>,
}

impl ProcedureOutcome {
    pub fn passed(&self) -> bool {
        self.result.is_ok()
    }
}

/// Results of one grouped run, in execution order
#[derive(Debug)]
pub struct RunReport {
    pub group: String,
    pub outcomes: Vec<ProcedureOutcome>,
}

impl RunReport {
    pub fn passed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.passed()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.passed()
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    pub fn failures(&self) -> impl Iterator<Item = &ProcedureOutcome> {
        self.outcomes.iter().filter(|o| !o.passed())
    }

    /// First failure, if any
    pub fn into_result(self) -> HarnessResult<()> {
        self.outcomes
            .into_iter()
            .map(|outcome| outcome.result)
            .find(Result::is_err)
            .unwrap_or(Ok(()))
    }
}

/// Runs a group's procedures strictly one after another
pub struct SequentialRunner;

impl SequentialRunner {
    /// Run every procedure of `group` against `context` in ordinal order.
    ///
    /// A failing procedure does not stop the run; later procedures are
    /// expected to fail on the state it left behind and say so themselves.
    pub async fn run<C: Send>(group: &mut ProcedureGroup<C>, context: &mut C) -> RunReport {
        info!("Running '{}' ({} procedures)", group.name, group.len());
        let mut outcomes = Vec::with_capacity(group.len());

        for procedure in group.procedures.iter_mut() {
            let start = Instant::now();
            let result = (procedure.body)(&mut *context).await;
            let elapsed = start.elapsed();

            match &result {
                Ok(()) => info!("[{}] {} passed in {:?}", procedure.ordinal, procedure.name, elapsed),
                Err(e) => error!("[{}] {} failed after {:?}: {}", procedure.ordinal, procedure.name, elapsed, e),
            }

            outcomes.push(ProcedureOutcome {
                ordinal: procedure.ordinal,
                name: procedure.name.clone(),
                elapsed,
                result,
            });
        }

        let report = RunReport {
            group: group.name.clone(),
            outcomes,
        };
        info!(
            "'{}' finished: {} passed, {} failed",
            report.group,
            report.passed(),
            report.failed()
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug)]
    struct Named {
        ordinal: u32,
        name: String,
    }

    impl Ordered for Named {
        fn ordinal(&self) -> u32 {
            self.ordinal
        }

        fn name(&self) -> &str {
            &self.name
        }
    }

    fn logging_group(ordinals: &[u32]) -> ProcedureGroup<Vec<u32>> {
        let mut group = ProcedureGroup::new("test");
        for &ordinal in ordinals {
            group
                .register(ordinal, format!("step_{}", ordinal), move |log: &mut Vec<u32>| {
                    Box::pin(async move {
                        log.push(ordinal);
                        Ok(())
                    })
                })
                .unwrap();
        }
        group
    }

    #[tokio::test]
    async fn test_runs_in_ordinal_order() {
        let mut group = logging_group(&[30, 10, 20]);
        let mut log = Vec::new();

        let report = SequentialRunner::run(&mut group, &mut log).await;

        assert_eq!(log, vec![10, 20, 30]);
        assert!(report.is_success());
        let names: Vec<&str> = report.outcomes.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["step_10", "step_20", "step_30"]);
    }

    #[test]
    fn test_duplicate_ordinal_is_rejected() {
        let mut group = logging_group(&[10]);
        let error = group
            .register(10, "again", |_: &mut Vec<u32>| Box::pin(async { Ok(()) }))
            .unwrap_err();

        assert!(matches!(
            error,
            HarnessError::DuplicateOrdinal { ordinal: 10, ref existing, .. } if existing == "step_10"
        ));
        assert_eq!(group.len(), 1);
    }

    #[tokio::test]
    async fn test_failure_is_recorded_and_run_continues() {
        let mut group = logging_group(&[10, 30]);
        group
            .register(20, "broken", |_: &mut Vec<u32>| {
                Box::pin(async { Err(HarnessError::assertion("broken", "lobby missing")) })
            })
            .unwrap();
        let mut log = Vec::new();

        let report = SequentialRunner::run(&mut group, &mut log).await;

        assert_eq!(log, vec![10, 30]);
        assert_eq!((report.passed(), report.failed()), (2, 1));
        assert_eq!(report.failures().next().map(|o| o.ordinal), Some(20));
        assert!(matches!(
            report.into_result(),
            Err(HarnessError::Assertion { .. })
        ));
    }

    proptest! {
        #[test]
        fn prop_order_ignores_names_and_declaration_order(
            ordinals in prop::collection::btree_set(any::<u32>(), 1..32)
                .prop_map(|set| set.into_iter().collect::<Vec<_>>())
                .prop_flat_map(|v| Just(v).prop_shuffle())
        ) {
            let procedures: Vec<Named> = ordinals
                .iter()
                .enumerate()
                .map(|(i, &ordinal)| Named {
                    ordinal,
                    // names sort opposite to declaration order
                    name: format!("{}", usize::MAX - i),
                })
                .collect();

            let ordered: Vec<u32> = order(procedures).iter().map(Ordered::ordinal).collect();

            let mut expected = ordinals.clone();
            expected.sort_unstable();
            prop_assert_eq!(ordered, expected);
        }
    }
}
