//! Running simulations with determinism checks.
use crate::config::SimConfig;
use crate::engine::{Engine, RunReport};
use crate::error::KernelError;
use crate::event::{Event, HashRecordingEventHandler, HashValidatingEventHandler};
use crate::event::{EventHandler, NoopEventHandler, RecordingEventHandler, ValidatingEventHandler};
use crate::platform::Platform;
use crate::time::SimTime;
use std::any::Any;
use std::mem;
use std::rc::Rc;
use std::sync::LazyLock;

/// Running simulations.
pub struct SimBuilder {
    config: SimConfig,
    determinism_check: DeterminismCheck,
}

/// Specifes the determinism checks performed for a simulation.
///
/// Can be set via [SimBuilder::with_determinism_check].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeterminismCheck {
    /// Run once with no determinism check
    None,
    /// Record the first run and compare all other runs for equality.
    Full {
        /// The total number of runs performed, including the first one.
        /// Must be at least 2.
        iterations: usize,
    },
    /// Record a hash of the first run and compare all other runs for equality.
    /// This gives less useful error messages than [Full](Self::Full), but uses less memory.
    Hash { iterations: usize },
}

/// The output of a simulation.
#[derive(Debug)]
#[must_use]
pub struct SimulationOutput {
    /// Simulated time at the end of the run.
    pub end_time: SimTime,
    /// How the run ended.
    pub result: Result<RunReport, KernelError>,
    pub(crate) events: Box<dyn Any>,
}

impl SimulationOutput {
    /// Unwrap the report of a run that ended normally.
    #[track_caller]
    pub fn unwrap(self) -> RunReport {
        match self.result {
            Ok(report) => report,
            Err(err) => panic!("simulation failed: {err}"),
        }
    }

    /// Events recorded during the first run, if the determinism check kept them.
    pub fn events(&self) -> Option<&[Event]> {
        self.events.downcast_ref::<Vec<Event>>().map(Vec::as_slice)
    }
}

impl Default for SimBuilder {
    fn default() -> Self {
        Self {
            config: SimConfig::default(),
            determinism_check: DeterminismCheck::Full { iterations: 2 },
        }
    }
}

impl SimBuilder {
    /// Construct a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: SimConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the determinism check behaviour.
    ///
    /// If you are planning to disable determinism checks to speed up tests, consider making it dependent on an environment variable.
    pub fn with_determinism_check(mut self, determinism_check: DeterminismCheck) -> Self {
        self.determinism_check = determinism_check;
        self
    }

    /// Run the simulation.
    ///
    /// For every iteration a fresh [`Engine`] is built on `platform` and handed to `setup`, which
    /// spawns the initial actors. The engine then runs to the end. Panics if two iterations
    /// produce different event sequences.
    pub fn run(&self, platform: &Platform, mut setup: impl FnMut(&mut Engine)) -> SimulationOutput {
        let mut run_with_events = |events| self.run_simulation(platform, &mut setup, events);
        match self.determinism_check {
            DeterminismCheck::None => run_with_events(Box::new(NoopEventHandler)),
            DeterminismCheck::Full { iterations } => {
                assert!(iterations > 1);
                let mut output = run_with_events(Box::new(RecordingEventHandler::new()));
                let events = Rc::new(
                    *mem::replace(&mut output.events, Box::new(()))
                        .downcast::<Vec<Event>>()
                        .unwrap(),
                );
                for _ in 1..iterations {
                    let _ = run_with_events(Box::new(ValidatingEventHandler::new(events.clone())));
                }
                output.events = Box::new(Rc::unwrap_or_clone(events));
                output
            }
            DeterminismCheck::Hash { iterations } => {
                assert!(iterations > 1);
                let mut output = run_with_events(Box::<HashRecordingEventHandler>::default());
                let event_hash = *mem::replace(&mut output.events, Box::new(()))
                    .downcast::<u64>()
                    .unwrap();
                for _ in 1..iterations {
                    let _ = run_with_events(Box::new(HashValidatingEventHandler::new(event_hash)));
                }
                output
            }
        }
    }

    #[doc(hidden)]
    // This is used to test simkernel
    pub fn new_test() -> Self {
        static ITERATIONS: LazyLock<usize> = LazyLock::new(|| {
            let x = std::env::var("SIMKERNEL_ITERATIONS")
                .ok()
                .map(|x| x.parse().unwrap())
                .unwrap_or(3);
            println!("running {x} iterations of all tests");
            x
        });
        Self::default().with_determinism_check(DeterminismCheck::Full {
            iterations: *ITERATIONS,
        })
    }

    fn run_simulation(
        &self,
        platform: &Platform,
        setup: &mut dyn FnMut(&mut Engine),
        event_handler: Box<dyn EventHandler>,
    ) -> SimulationOutput {
        let mut engine = Engine::with_event_handler(platform, self.config.clone(), event_handler);
        setup(&mut engine);
        let result = engine.run();
        let end_time = engine.now();
        SimulationOutput {
            end_time,
            result,
            events: engine.finish_events(),
        }
    }
}
