//! Fluent benchmark-definition surface.
//!
//! Every method here consumes and returns `Self` (or a `Result<Self, _>` so
//! the order lattice can reject a misplaced call at the call site rather
//! than at `build()`), and the "registry" is simply the `Spec` value
//! `build()` returns — there is no global state for a loader to clear.

use crate::error::{DescribeError, Phase};
use crate::runner::BenchOptions;
use crate::sampler::{Measured, TimedMeasured};

type Hook = Box<dyn FnMut() -> Result<(), String>>;
type SetupFn = Box<dyn FnMut() -> Result<(), String>>;
type RunFn = Box<dyn FnMut(bool) -> Result<(), String>>;
type RunWithTimerFn = Box<dyn FnMut(&mut crate::sampler::Timer) -> Result<(), String>>;
type TeardownFn = Box<dyn FnMut() -> Result<(), String>>;

/// Whether `setup` (run before every sampling pass) or `setup_once` (run
/// once, before the first pass) was registered.
pub enum Setup {
    /// Runs before the first sampling pass only.
    Once(SetupFn),
    /// Runs before every sampling pass, including the first.
    EveryPass(SetupFn),
}

/// Whether `run` (plain, host-timed) or `run_with_timer` (user-gated) was
/// registered.
pub enum RunBody {
    /// The Sampler times the whole closure call.
    Plain(RunFn),
    /// The closure gates its own timed region via [`crate::sampler::Timer`].
    WithTimer(RunWithTimerFn),
}

/// One named benchmark: its options, setup, measured body, and teardown.
pub struct Describe {
    name: String,
    options: BenchOptions,
    setup: Setup,
    run: RunBody,
    teardown: Option<TeardownFn>,
}

impl Describe {
    /// The benchmark's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The benchmark's validated options.
    pub fn options(&self) -> &BenchOptions {
        &self.options
    }

    /// The registered setup phase.
    pub fn setup(&mut self) -> &mut Setup {
        &mut self.setup
    }

    /// The registered measured body.
    pub fn run(&mut self) -> &mut RunBody {
        &mut self.run
    }

    /// Run the teardown hook, if one was registered.
    pub fn teardown(&mut self) -> Result<(), DescribeError> {
        if let Some(teardown) = self.teardown.as_mut() {
            teardown().map_err(|message| DescribeError::UserError {
                phase: Phase::Teardown,
                message,
            })?;
        }
        Ok(())
    }

    /// The registered teardown hook, if any, as a `FnMut` reference usable
    /// with [`crate::runner::BenchmarkRunner::run`]'s `teardown` parameter —
    /// the composed run loop drives it directly rather than this type
    /// invoking it standalone.
    pub fn teardown_fn(&mut self) -> Option<&mut dyn FnMut() -> Result<(), String>> {
        self.teardown.as_deref_mut()
    }

    /// Disjoint mutable access to `setup`, `run`, and `teardown` in one
    /// borrow, for callers (the composed [`crate::runner::BenchmarkRunner`]
    /// path) that need all three simultaneously — `setup()`/`run()`/
    /// `teardown_fn()` each take `&mut self` independently, which the
    /// borrow checker cannot reconcile if their results must stay alive
    /// together (as they do while a run is in flight).
    pub fn parts_mut(
        &mut self,
    ) -> (
        &mut Setup,
        &mut RunBody,
        Option<&mut dyn FnMut() -> Result<(), String>>,
    ) {
        (&mut self.setup, &mut self.run, self.teardown.as_deref_mut())
    }

    /// A `Measured` adapter over this describe's body, usable with
    /// [`crate::sampler::Sampler::run`]. Returns `None` if this describe
    /// was built with `run_with_timer` instead of `run`.
    pub fn as_measured(&mut self) -> Option<&mut dyn Measured> {
        match &mut self.run {
            RunBody::Plain(f) => Some(f as &mut dyn Measured),
            RunBody::WithTimer(_) => None,
        }
    }

    /// A `TimedMeasured` adapter over this describe's body. Returns `None`
    /// if this describe was built with plain `run`.
    pub fn as_timed_measured(&mut self) -> Option<&mut dyn TimedMeasured> {
        match &mut self.run {
            RunBody::WithTimer(f) => Some(f as &mut dyn TimedMeasured),
            RunBody::Plain(_) => None,
        }
    }
}

/// Internal progress marker enforcing the builder's order lattice:
/// `options` (optional, at most once) precedes `setup`/`setup_once`
/// (exactly one, required), which precedes `run`/`run_with_timer` (exactly
/// one, required), which precedes `teardown` (optional).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lattice {
    Start,
    OptionsSet,
    SetupSet,
    RunSet,
}

/// Builds one [`Describe`], rejecting out-of-order calls at the call site.
pub struct DescribeBuilder {
    name: String,
    options: BenchOptions,
    setup: Option<Setup>,
    run: Option<RunBody>,
    teardown: Option<TeardownFn>,
    phase: Lattice,
}

impl DescribeBuilder {
    /// Start building a describe named `name`.
    pub fn new(name: impl Into<String>) -> Self {
        DescribeBuilder {
            name: name.into(),
            options: BenchOptions::default(),
            setup: None,
            run: None,
            teardown: None,
            phase: Lattice::Start,
        }
    }

    /// Set this describe's options. Must precede `setup`/`setup_once`/
    /// `run`/`run_with_timer`, and may be called at most once.
    pub fn options(mut self, options: BenchOptions) -> Result<Self, DescribeError> {
        if self.phase != Lattice::Start {
            return Err(DescribeError::OptionsMisplaced);
        }
        self.options = options;
        self.phase = Lattice::OptionsSet;
        Ok(self)
    }

    /// Register a setup phase that runs once, before the first sampling
    /// pass. Exactly one of `setup`/`setup_once` is required.
    pub fn setup_once(
        mut self,
        f: impl FnMut() -> Result<(), String> + 'static,
    ) -> Result<Self, DescribeError> {
        self.place_setup(Setup::Once(Box::new(f)))
    }

    /// Register a setup phase that runs before every sampling pass,
    /// including the first. Exactly one of `setup`/`setup_once` is
    /// required.
    pub fn setup(
        mut self,
        f: impl FnMut() -> Result<(), String> + 'static,
    ) -> Result<Self, DescribeError> {
        self.place_setup(Setup::EveryPass(Box::new(f)))
    }

    fn place_setup(mut self, setup: Setup) -> Result<Self, DescribeError> {
        if !matches!(self.phase, Lattice::Start | Lattice::OptionsSet) || self.setup.is_some() {
            return Err(DescribeError::SetupArity);
        }
        self.setup = Some(setup);
        self.phase = Lattice::SetupSet;
        Ok(self)
    }

    /// Register the measured body; the Sampler times the whole call.
    /// Exactly one of `run`/`run_with_timer` is required, and must follow
    /// `setup`/`setup_once`.
    pub fn run(mut self, f: impl FnMut(bool) -> Result<(), String> + 'static) -> Result<Self, DescribeError> {
        self.place_run(RunBody::Plain(Box::new(f)), false)
    }

    /// Register a measured body that gates its own timed region via a
    /// [`crate::sampler::Timer`] handle. Incompatible with adaptive
    /// (RCIW-driven) resampling — see
    /// [`DescribeError::TimerIncompatibleWithResampling`].
    pub fn run_with_timer(
        mut self,
        f: impl FnMut(&mut crate::sampler::Timer) -> Result<(), String> + 'static,
    ) -> Result<Self, DescribeError> {
        self.place_run(RunBody::WithTimer(Box::new(f)), true)
    }

    fn place_run(mut self, run: RunBody, uses_timer: bool) -> Result<Self, DescribeError> {
        if self.phase != Lattice::SetupSet || self.run.is_some() {
            return Err(DescribeError::RunArity);
        }
        if uses_timer && self.options.adaptive_resampling {
            return Err(DescribeError::TimerIncompatibleWithResampling);
        }
        self.run = Some(run);
        self.phase = Lattice::RunSet;
        Ok(self)
    }

    /// Register a teardown hook. Must follow `run`/`run_with_timer`.
    pub fn teardown(mut self, f: impl FnMut() -> Result<(), String> + 'static) -> Result<Self, DescribeError> {
        if self.phase != Lattice::RunSet {
            return Err(DescribeError::TeardownMisplaced);
        }
        self.teardown = Some(Box::new(f));
        Ok(self)
    }

    /// Finish building. Fails if `setup`/`setup_once` or `run`/
    /// `run_with_timer` was never registered.
    pub fn build(self) -> Result<Describe, DescribeError> {
        let setup = self.setup.ok_or(DescribeError::SetupArity)?;
        let run = self.run.ok_or(DescribeError::RunArity)?;
        Ok(Describe {
            name: self.name,
            options: self.options,
            setup,
            run,
            teardown: self.teardown,
        })
    }
}

/// Lifecycle hooks shared across every describe in a [`Spec`].
#[derive(Default)]
pub struct Hooks {
    before_all: Option<Hook>,
    before_each: Option<Hook>,
    after_each: Option<Hook>,
    after_all: Option<Hook>,
}

impl Hooks {
    /// Run `before_all`, if registered.
    pub fn run_before_all(&mut self) -> Result<(), DescribeError> {
        Self::run_hook(&mut self.before_all, Phase::BeforeAll)
    }

    /// Run `before_each`, if registered.
    pub fn run_before_each(&mut self) -> Result<(), DescribeError> {
        Self::run_hook(&mut self.before_each, Phase::BeforeEach)
    }

    /// Run `after_each`, if registered.
    pub fn run_after_each(&mut self) -> Result<(), DescribeError> {
        Self::run_hook(&mut self.after_each, Phase::AfterEach)
    }

    /// Run `after_all`, if registered.
    pub fn run_after_all(&mut self) -> Result<(), DescribeError> {
        Self::run_hook(&mut self.after_all, Phase::AfterAll)
    }

    fn run_hook(hook: &mut Option<Hook>, phase: Phase) -> Result<(), DescribeError> {
        if let Some(f) = hook.as_mut() {
            f().map_err(|message| DescribeError::UserError { phase, message })?;
        }
        Ok(())
    }
}

/// Builds a [`Spec`]'s [`Hooks`].
#[derive(Default)]
pub struct HooksBuilder {
    hooks: Hooks,
}

impl HooksBuilder {
    /// Start building hooks.
    pub fn new() -> Self {
        HooksBuilder::default()
    }

    /// Register `before_all`.
    pub fn before_all(mut self, f: impl FnMut() -> Result<(), String> + 'static) -> Self {
        self.hooks.before_all = Some(Box::new(f));
        self
    }

    /// Register `before_each`.
    pub fn before_each(mut self, f: impl FnMut() -> Result<(), String> + 'static) -> Self {
        self.hooks.before_each = Some(Box::new(f));
        self
    }

    /// Register `after_each`.
    pub fn after_each(mut self, f: impl FnMut() -> Result<(), String> + 'static) -> Self {
        self.hooks.after_each = Some(Box::new(f));
        self
    }

    /// Register `after_all`.
    pub fn after_all(mut self, f: impl FnMut() -> Result<(), String> + 'static) -> Self {
        self.hooks.after_all = Some(Box::new(f));
        self
    }

    /// Finish building.
    pub fn build(self) -> Hooks {
        self.hooks
    }
}

/// A file's full set of describes plus lifecycle hooks, produced by loading
/// one benchmark file.
pub struct Spec {
    /// Lifecycle hooks shared across every describe.
    pub hooks: Hooks,
    /// Ordered list of describes, run in registration order.
    pub describes: Vec<Describe>,
}

/// Builds a [`Spec`].
#[derive(Default)]
pub struct SpecBuilder {
    hooks: Option<Hooks>,
    describes: Vec<Describe>,
}

impl SpecBuilder {
    /// Start building a spec with no hooks and no describes.
    pub fn new() -> Self {
        SpecBuilder::default()
    }

    /// Set this spec's hooks.
    pub fn hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = Some(hooks);
        self
    }

    /// Append one describe.
    pub fn describe(mut self, describe: Describe) -> Self {
        self.describes.push(describe);
        self
    }

    /// Finish building.
    pub fn build(self) -> Spec {
        Spec {
            hooks: self.hooks.unwrap_or_default(),
            describes: self.describes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_describe_builds() {
        let describe = DescribeBuilder::new("noop")
            .setup(|| Ok(()))
            .unwrap()
            .run(|_warmup| Ok(()))
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(describe.name(), "noop");
    }

    #[test]
    fn options_after_setup_is_rejected() {
        let err = DescribeBuilder::new("x")
            .setup(|| Ok(()))
            .unwrap()
            .options(BenchOptions::default())
            .unwrap_err();
        assert!(matches!(err, DescribeError::OptionsMisplaced));
    }

    #[test]
    fn two_setups_is_rejected() {
        let err = DescribeBuilder::new("x")
            .setup(|| Ok(()))
            .unwrap()
            .setup_once(|| Ok(()))
            .unwrap_err();
        assert!(matches!(err, DescribeError::SetupArity));
    }

    #[test]
    fn missing_setup_rejected_at_build() {
        let err = DescribeBuilder::new("x").build().unwrap_err();
        assert!(matches!(err, DescribeError::SetupArity));
    }

    #[test]
    fn teardown_before_run_is_rejected() {
        let err = DescribeBuilder::new("x")
            .setup(|| Ok(()))
            .unwrap()
            .teardown(|| Ok(()))
            .unwrap_err();
        assert!(matches!(err, DescribeError::TeardownMisplaced));
    }

    #[test]
    fn run_with_timer_rejects_default_adaptive_resampling() {
        let err = DescribeBuilder::new("x")
            .setup(|| Ok(()))
            .unwrap()
            .run_with_timer(|_timer| Ok(()))
            .unwrap_err();
        assert!(matches!(err, DescribeError::TimerIncompatibleWithResampling));
    }

    #[test]
    fn run_with_timer_allowed_when_resampling_disabled() {
        let options = BenchOptions {
            adaptive_resampling: false,
            ..BenchOptions::default()
        };
        let describe = DescribeBuilder::new("x")
            .options(options)
            .unwrap()
            .setup(|| Ok(()))
            .unwrap()
            .run_with_timer(|timer| {
                timer.start().map_err(|e| e.to_string())?;
                timer.stop().map_err(|e| e.to_string())
            })
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(describe.name(), "x");
    }

    #[test]
    fn parts_mut_exposes_setup_run_and_teardown_simultaneously() {
        use std::cell::Cell;
        use std::rc::Rc;
        let teardown_called = Rc::new(Cell::new(false));
        let teardown_called_inner = teardown_called.clone();
        let mut describe = DescribeBuilder::new("x")
            .setup(|| Ok(()))
            .unwrap()
            .run(|_warmup| Ok(()))
            .unwrap()
            .teardown(move || {
                teardown_called_inner.set(true);
                Ok(())
            })
            .unwrap()
            .build()
            .unwrap();

        let (setup, run, teardown) = describe.parts_mut();
        assert!(matches!(setup, Setup::EveryPass(_)));
        assert!(matches!(run, RunBody::Plain(_)));
        let teardown_fn = teardown.expect("teardown was registered");
        teardown_fn().unwrap();
        assert!(teardown_called.get());
    }

    #[test]
    fn hooks_builder_runs_registered_hooks() {
        use std::cell::Cell;
        use std::rc::Rc;
        let called = Rc::new(Cell::new(false));
        let called_inner = called.clone();
        let mut hooks = HooksBuilder::new()
            .before_all(move || {
                called_inner.set(true);
                Ok(())
            })
            .build();
        hooks.run_before_all().unwrap();
        // before_each was never registered; running it is a harmless no-op
        hooks.run_before_each().unwrap();
        assert!(called.get());
    }
}
