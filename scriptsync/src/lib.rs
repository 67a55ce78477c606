pub mod config;
pub mod explorer;
pub mod object_type;
pub mod registry;
pub mod runtime;
pub mod session;
pub mod sync;
