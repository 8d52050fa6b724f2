//! Reduced, synchronous council used to score candidate policies.

use std::sync::Arc;
use std::time::Duration;

use sentinel_council::{assemble, micro_agents, run_inline, Agent, CouncilBundle, Decision, Genes};
use sentinel_memory::{MemoryConfig, SharedMemory};

use crate::dataset::Sample;
use crate::error::Result;

const MICRO_MEMORY_ENTRIES: usize = 100;
const MICRO_MEMORY_TTL: Duration = Duration::from_secs(1800);

/// Biofeedback, environment, conflict and arbiter agents bound to one
/// candidate policy, with a private memory store.
pub struct MicroCouncil {
    genes: Genes,
    memory: SharedMemory,
    agents: Vec<Arc<dyn Agent>>,
}

impl std::fmt::Debug for MicroCouncil {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MicroCouncil")
            .field("genes", &self.genes)
            .field("agents", &self.agents.iter().map(|a| a.id()).collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl MicroCouncil {
    /// Builds a micro-council for `genes`.
    ///
    /// # Errors
    ///
    /// Fails if the memory store cannot start.
    pub fn new(genes: Genes) -> Result<Self> {
        let memory = SharedMemory::new(MemoryConfig::new(MICRO_MEMORY_ENTRIES).with_default_ttl(MICRO_MEMORY_TTL))?;
        Ok(Self {
            genes,
            memory,
            agents: micro_agents(),
        })
    }

    /// Policy this council arbitrates with.
    #[must_use]
    pub fn genes(&self) -> Genes {
        self.genes
    }

    /// Runs every agent on `sample` and assembles the bundle.
    #[must_use]
    pub fn run_once(&self, sample: &Sample) -> CouncilBundle {
        let input = sample.to_input();
        let reports = run_inline(&self.agents, &input, &self.genes, &self.memory);
        assemble(reports, self.genes, input)
    }

    /// Decision for `sample`.
    #[must_use]
    pub fn decide(&self, sample: &Sample) -> Decision {
        self.run_once(sample).decision
    }
}
