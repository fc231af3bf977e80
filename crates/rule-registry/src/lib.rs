mod registry;
mod router;

pub use registry::RuleRegistry;
pub use router::RuleRouter;
