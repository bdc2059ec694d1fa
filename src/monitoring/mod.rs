/*!
 * Monitoring
 * Tracing subscriber setup for binaries embedding the primitives
 */

mod tracer;

pub use tracer::{init_tracing, span_workload};
