/*!
 * Core Module
 * Synchronizer engine and error handling
 */

pub mod errors;
pub mod sync;

// Re-export for convenience
pub use errors::*;
