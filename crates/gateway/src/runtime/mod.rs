pub mod cancel;
pub mod engine;
pub mod stream_bus;
pub mod tool_registry;
