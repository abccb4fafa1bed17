pub mod accumulator;
pub mod aggregator;
pub mod combinator;
pub mod config;
pub mod error;
pub mod parallel;
pub mod params;
pub mod progress;
pub mod results;
pub mod runner;
pub mod stats;
pub mod storage;

pub use accumulator::{Accumulator, AccumulatorKind, ResultValue};
pub use aggregator::{ProgressAggregator, ProgressClient, ProgressTransport};
pub use config::{ProgressOutput, RunnerConfig};
pub use error::{SweepError, SweepResult};
pub use parallel::simulate_in_parallel;
pub use params::{Combination, PackIndexes, Parameter, ParameterSpace, Value};
pub use results::ResultsCollection;
pub use runner::{RunState, Simulation, SimulationRunner};
