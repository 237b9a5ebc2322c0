/*!
 * Monitoring Module
 * Structured logging for the delayers
 */

pub mod tracer;

pub use tracer::{init_tracing, OccurrenceSpan};
