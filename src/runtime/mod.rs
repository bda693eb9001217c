pub mod broadcast;
pub mod command;
pub mod engine;
pub mod events;
pub mod flow;
pub mod job;
pub mod pool;
pub mod queue;
pub mod reload;
pub mod report;
pub mod state;
pub mod task;
