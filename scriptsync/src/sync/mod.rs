pub mod actions;
pub mod debounce;
pub mod engine;
pub mod paths;
pub mod settings_watcher;
pub mod tree;
