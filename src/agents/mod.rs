//! The three pipeline agents and per-phase model selection

pub mod actions;
pub mod parser;
pub mod solver;

use crate::config::LlmConfig;
use crate::llm::{AgentRunner, LlmClient, RunnerOptions};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Model class used by a phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelClass {
    Small,
    Large,
}

/// Requested analysis quality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Quality {
    #[default]
    Fast,
    FastPro,
    Exact,
    ExactPro,
}

/// Per-phase model classes for one quality level
#[derive(Debug, Clone, Copy)]
pub struct QualityProfile {
    pub parser: ModelClass,
    pub solver: ModelClass,
    pub actions: ModelClass,
}

impl Quality {
    /// The single table mapping quality to per-phase model classes
    pub fn profile(self) -> QualityProfile {
        use ModelClass::{Large, Small};
        match self {
            Quality::Fast => QualityProfile {
                parser: Small,
                solver: Small,
                actions: Small,
            },
            Quality::FastPro => QualityProfile {
                parser: Large,
                solver: Small,
                actions: Large,
            },
            Quality::Exact => QualityProfile {
                parser: Small,
                solver: Large,
                actions: Small,
            },
            Quality::ExactPro => QualityProfile {
                parser: Large,
                solver: Large,
                actions: Large,
            },
        }
    }
}

/// Runners for all three agents in both model classes
pub struct AgentSet {
    parser_small: AgentRunner,
    parser_large: AgentRunner,
    solver_small: AgentRunner,
    solver_large: AgentRunner,
    actions_small: AgentRunner,
    actions_large: AgentRunner,
    options: RunnerOptions,
}

impl AgentSet {
    pub fn new(llm: Arc<dyn LlmClient>, config: &LlmConfig) -> Self {
        let small = config.small_model.clone();
        let large = config.large_model.clone();

        Self {
            parser_small: AgentRunner::new(llm.clone(), small.clone(), parser::SYSTEM_PROMPT),
            parser_large: AgentRunner::new(llm.clone(), large.clone(), parser::SYSTEM_PROMPT),
            solver_small: AgentRunner::new(llm.clone(), small.clone(), solver::SYSTEM_PROMPT),
            solver_large: AgentRunner::new(llm.clone(), large.clone(), solver::SYSTEM_PROMPT),
            actions_small: AgentRunner::new(llm.clone(), small, actions::SYSTEM_PROMPT),
            actions_large: AgentRunner::new(llm, large, actions::SYSTEM_PROMPT),
            options: RunnerOptions {
                max_retries: config.max_retries,
                retry_delay: Duration::from_secs_f64(config.retry_delay_secs),
            },
        }
    }

    /// Retry policy shared by every agent call
    pub fn options(&self) -> RunnerOptions {
        self.options
    }

    pub fn parser(&self, quality: Quality) -> &AgentRunner {
        match quality.profile().parser {
            ModelClass::Small => &self.parser_small,
            ModelClass::Large => &self.parser_large,
        }
    }

    pub fn solver(&self, quality: Quality) -> &AgentRunner {
        match quality.profile().solver {
            ModelClass::Small => &self.solver_small,
            ModelClass::Large => &self.solver_large,
        }
    }

    pub fn actions(&self, quality: Quality) -> &AgentRunner {
        match quality.profile().actions {
            ModelClass::Small => &self.actions_small,
            ModelClass::Large => &self.actions_large,
        }
    }
}
