//! Cooperative time-sliced driver.
//!
//! A [`SlicedEvaluation`] owns a saved register set. Each call to
//! [`SlicedEvaluation::run_slice`] swaps those registers into the
//! interpreter, steps until the work budget is spent, and swaps them back
//! out. The host decides when (and whether) to run the next slice, so a
//! long computation never blocks an event loop for longer than one budget.
//! Cancelling is simply not scheduling another slice.

use std::fmt;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::Error;
use crate::ast::Value;
use crate::evaluator::{Interpreter, Registers, StepOutcome};

/// Timing parameters for sliced evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceConfig {
    /// Wall-clock time one slice may run before yielding
    pub work_budget: Duration,
    /// Suggested pause before the next slice
    pub rest_interval: Duration,
    /// Steps between clock reads
    pub steps_per_check: usize,
}

impl Default for SliceConfig {
    fn default() -> Self {
        SliceConfig {
            work_budget: Duration::from_millis(200),
            rest_interval: Duration::from_millis(50),
            steps_per_check: 1024,
        }
    }
}

/// What the host should do after a slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceStatus {
    /// Work remains; call `run_slice` again after `rest`
    Yielded { rest: Duration },
    /// The completion callback has run
    Finished,
}

type Completion = Box<dyn FnOnce(Result<Value, Error>)>;

/// An evaluation in progress, resumable one slice at a time.
pub struct SlicedEvaluation {
    regs: Option<Registers>,
    config: SliceConfig,
    on_complete: Option<Completion>,
    slices: usize,
    steps: u64,
}

impl SlicedEvaluation {
    pub fn new(
        regs: Registers,
        config: SliceConfig,
        on_complete: impl FnOnce(Result<Value, Error>) + 'static,
    ) -> Self {
        SlicedEvaluation {
            regs: Some(regs),
            config,
            on_complete: Some(Box::new(on_complete)),
            slices: 0,
            steps: 0,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.regs.is_none()
    }

    /// Slices run so far.
    pub fn slices(&self) -> usize {
        self.slices
    }

    /// Steps run so far, across all slices.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Run one slice against `interp`.
    ///
    /// The interpreter's own registers are untouched on return, so the host
    /// may use it freely between slices. Once finished, further calls do
    /// nothing.
    pub fn run_slice(&mut self, interp: &mut Interpreter) -> SliceStatus {
        let Some(regs) = self.regs.take() else {
            return SliceStatus::Finished;
        };

        let started = Instant::now();
        let check_every = self.config.steps_per_check.max(1);
        let saved = interp.swap_registers(regs);

        let mut slice_steps = 0u64;
        let outcome = 'slice: loop {
            for _ in 0..check_every {
                slice_steps += 1;
                match interp.step() {
                    StepOutcome::Continue => {}
                    StepOutcome::Done(value) => break 'slice Some(Ok(value)),
                    StepOutcome::Failed(e) => break 'slice Some(Err(e)),
                }
            }
            if started.elapsed() >= self.config.work_budget {
                break None;
            }
        };

        let regs = interp.swap_registers(saved);
        self.slices += 1;
        self.steps += slice_steps;
        trace!(
            slice = self.slices,
            steps = slice_steps,
            elapsed = ?started.elapsed(),
            "slice ended"
        );

        match outcome {
            None => {
                self.regs = Some(regs);
                SliceStatus::Yielded {
                    rest: self.config.rest_interval,
                }
            }
            Some(result) => {
                debug!(
                    slices = self.slices,
                    steps = self.steps,
                    ok = result.is_ok(),
                    "sliced evaluation finished"
                );
                if let Some(on_complete) = self.on_complete.take() {
                    on_complete(result);
                }
                SliceStatus::Finished
            }
        }
    }

    /// Drive to completion on the current thread, sleeping for the rest
    /// interval between slices.
    pub fn run_blocking(mut self, interp: &mut Interpreter) {
        while let SliceStatus::Yielded { rest } = self.run_slice(interp) {
            if !rest.is_zero() {
                std::thread::sleep(rest);
            }
        }
    }
}

impl fmt::Debug for SlicedEvaluation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlicedEvaluation")
            .field("finished", &self.is_finished())
            .field("config", &self.config)
            .field("slices", &self.slices)
            .field("steps", &self.steps)
            .finish()
    }
}
