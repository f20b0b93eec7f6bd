use std::sync::Arc;

use promptgauge_core::evaluators_api::Registry;

mod format;
mod hallucination;
mod instruction;
mod refusal;
mod stability;
mod text;

pub use format::FormatConsistencyEvaluator;
pub use hallucination::{HallucinationEvaluator, JudgePolicy};
pub use instruction::InstructionAdherenceEvaluator;
pub use refusal::{RefusalBehaviorEvaluator, RefusalPolicy};
pub use stability::OutputStabilityEvaluator;

/// Registry stocked with the built-in evaluators.
pub fn default_registry() -> Registry {
    let mut registry = Registry::new();
    registry.register("instruction_adherence", Box::new(|| {
        Arc::new(InstructionAdherenceEvaluator)
    }));
    registry.register("hallucination", Box::new(|| {
        Arc::new(HallucinationEvaluator::default())
    }));
    registry.register("output_stability", Box::new(|| {
        Arc::new(OutputStabilityEvaluator::default())
    }));
    registry.register("refusal_behavior", Box::new(|| {
        Arc::new(RefusalBehaviorEvaluator::default())
    }));
    registry.register("format_consistency", Box::new(|| {
        Arc::new(FormatConsistencyEvaluator)
    }));
    registry
}
