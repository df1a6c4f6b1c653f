pub mod context;
pub mod registry;
pub mod transcript;
pub mod traits;

pub use context::ExchangeRecord;
pub use registry::HookRegistry;
pub use transcript::TranscriptHook;
