pub mod capacity;
pub mod config;
pub mod fallback_selector;
pub mod in_memory_store;
pub mod instrumented_selector;
pub mod least_loaded_selector;
pub mod metrics;
pub mod process_script;
pub mod resource;
pub mod round_robin_selector;
pub mod script_selector;
pub mod selector;

#[cfg(test)]
mod test_support;

#[cfg(test)]
mod in_memory_store_test;
