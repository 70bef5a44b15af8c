// ABOUTME: Agent subprocess supervision - spawns the coding agent and streams its output as events

pub mod agent;
pub mod output;

pub use agent::{AgentRunner, RunOutcome, RunResult, RunnerError, RunnerState, StopHandle};
pub use output::{AgentOutput, ContentBlock};
