pub mod batch;
pub mod cli;
pub mod config;
pub mod diff;
pub mod error;
pub mod injector;
pub mod plan;
pub mod presets;
pub mod registers;
pub mod rule;
pub mod scanner;
pub mod session;
pub mod signature;
pub mod source;
pub mod toolchain;


pub use batch::{BatchOrchestrator, BatchSummary, TargetGroup};
pub use config::Config;
pub use error::PatchError;
pub use rule::PatchRule;
pub use session::{PatchResult, PatchSession};
