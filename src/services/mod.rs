pub mod insert_batcher;
pub mod mutation_dispatcher;

pub use insert_batcher::{FlushOutcome, InsertBatcher};
pub use mutation_dispatcher::MutationDispatcher;
