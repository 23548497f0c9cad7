//! Answer pipeline stages, in execution order.

pub mod query_expander;
pub mod retriever;
pub mod aggregator;
pub mod rerank_selector;
pub mod citations;
pub mod memory;

pub use aggregator::aggregate;
pub use citations::{assemble, merge_sources, CitationContext};
pub use memory::{MemorySplicer, DEFAULT_SYSTEM_PROMPT};
pub use query_expander::{QueryExpander, QueryExpansion};
pub use rerank_selector::{RerankOutcome, RerankSelection, RerankSelector};
pub use retriever::{window_bounds, WindowedRetriever};
