//! Re-entrant unit-of-work bookkeeping shared by the stores.

use super::sqlite::acquire_lock;
use crate::Result;
use std::sync::Mutex;
use std::thread::{self, ThreadId};
use tracing::warn;

/// Serializes units of work across threads and lets a unit started inside
/// another one (on the same thread) join it.
#[derive(Debug, Default)]
pub struct UnitOfWork {
    serial: Mutex<()>,
    owner: Mutex<Option<ThreadId>>,
}

impl UnitOfWork {
    /// Creates idle bookkeeping.
    pub fn new() -> Self {
        Self::default()
    }

    fn owned_by_current(&self) -> bool {
        *acquire_lock(&self.owner) == Some(thread::current().id())
    }

    /// Runs `work` between `begin` and `finish`.
    ///
    /// `finish(true)` commits, `finish(false)` rolls back. Nested calls run
    /// `work` directly and leave the outcome to the outermost unit. If `work`
    /// panics the unit is rolled back and released while unwinding.
    pub fn run(
        &self,
        work: &mut dyn FnMut() -> Result<()>,
        begin: impl FnOnce() -> Result<()>,
        finish: impl FnOnce(bool) -> Result<()>,
    ) -> Result<()> {
        if self.owned_by_current() {
            return work();
        }

        let _serial = acquire_lock(&self.serial);
        begin()?;
        *acquire_lock(&self.owner) = Some(thread::current().id());
        let active = ActiveUnit {
            unit: self,
            finish: Some(finish),
        };

        let outcome = work();
        let finished = active.complete(outcome.is_ok());

        match (outcome, finished) {
            (Ok(()), finished) => finished,
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(rollback)) => {
                warn!(error = %rollback, "Rollback failed after unit of work error");
                Err(e)
            },
        }
    }

    /// Runs a single write outside any unit of work, waiting for a unit
    /// open on another thread to finish first. Inside the current thread's
    /// own unit the write runs directly.
    pub fn exclusive<T>(&self, write: impl FnOnce() -> Result<T>) -> Result<T> {
        if self.owned_by_current() {
            return write();
        }
        let _serial = acquire_lock(&self.serial);
        write()
    }
}

/// An open unit. Dropping it without [`complete`](Self::complete) rolls
/// back; either way the owner is cleared.
struct ActiveUnit<'u, F: FnOnce(bool) -> Result<()>> {
    unit: &'u UnitOfWork,
    finish: Option<F>,
}

impl<F: FnOnce(bool) -> Result<()>> ActiveUnit<'_, F> {
    fn complete(mut self, commit: bool) -> Result<()> {
        self.finish.take().map_or(Ok(()), |finish| finish(commit))
    }
}

impl<F: FnOnce(bool) -> Result<()>> Drop for ActiveUnit<'_, F> {
    fn drop(&mut self) {
        if let Some(finish) = self.finish.take() {
            if let Err(e) = finish(false) {
                warn!(error = %e, "Rollback failed while unwinding unit of work");
            }
        }
        *acquire_lock(&self.unit.owner) = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use std::cell::RefCell;

    fn failure() -> Error {
        Error::OperationFailed {
            operation: "test".to_string(),
            cause: "boom".to_string(),
        }
    }

    #[test]
    fn test_commits_on_success() {
        let unit = UnitOfWork::new();
        let log = RefCell::new(Vec::new());
        unit.run(
            &mut || {
                log.borrow_mut().push("work");
                Ok(())
            },
            || {
                log.borrow_mut().push("begin");
                Ok(())
            },
            |commit| {
                log.borrow_mut().push(if commit { "commit" } else { "rollback" });
                Ok(())
            },
        )
        .unwrap();
        assert_eq!(*log.borrow(), vec!["begin", "work", "commit"]);
    }

    #[test]
    fn test_rolls_back_and_returns_work_error() {
        let unit = UnitOfWork::new();
        let log = RefCell::new(Vec::new());
        let result = unit.run(
            &mut || Err(failure()),
            || Ok(()),
            |commit| {
                log.borrow_mut().push(commit);
                Err(failure())
            },
        );
        assert!(result.is_err());
        assert_eq!(*log.borrow(), vec![false]);
    }

    #[test]
    fn test_nested_unit_joins_outer() {
        let unit = UnitOfWork::new();
        let begins = RefCell::new(0);
        unit.run(
            &mut || {
                unit.run(
                    &mut || Ok(()),
                    || {
                        *begins.borrow_mut() += 1;
                        Ok(())
                    },
                    |_| Ok(()),
                )
            },
            || {
                *begins.borrow_mut() += 1;
                Ok(())
            },
            |_| Ok(()),
        )
        .unwrap();
        assert_eq!(*begins.borrow(), 1);
    }

    #[test]
    #[allow(clippy::panic)]
    fn test_panicking_work_rolls_back_and_releases() {
        let unit = UnitOfWork::new();
        let log = RefCell::new(Vec::new());

        let unwound = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            unit.run(
                &mut || -> Result<()> { panic!("work failed") },
                || {
                    log.borrow_mut().push("begin");
                    Ok(())
                },
                |commit| {
                    log.borrow_mut().push(if commit { "commit" } else { "rollback" });
                    Ok(())
                },
            )
        }));
        assert!(unwound.is_err());

        unit.run(
            &mut || Ok(()),
            || {
                log.borrow_mut().push("begin");
                Ok(())
            },
            |commit| {
                log.borrow_mut().push(if commit { "commit" } else { "rollback" });
                Ok(())
            },
        )
        .unwrap();
        assert_eq!(
            *log.borrow(),
            vec!["begin", "rollback", "begin", "commit"]
        );
    }

    #[test]
    fn test_exclusive_runs_directly_inside_own_unit() {
        let unit = UnitOfWork::new();
        let value = std::cell::Cell::new(0);
        unit.run(
            &mut || {
                unit.exclusive(|| {
                    value.set(1);
                    Ok(())
                })
            },
            || Ok(()),
            |_| Ok(()),
        )
        .unwrap();
        assert_eq!(unit.exclusive(|| Ok(value.get() + 1)).unwrap(), 2);
    }
}
