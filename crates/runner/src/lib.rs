//! Command-line runner for Elea threaded programs.
//!
//! Runs a Fibonacci demo through the [`elea_parallel`] thread pool. Thread
//! `i` computes `fib(n + i)`, prints it, appends a CSV row and returns it;
//! the run's value is the array of those results in thread order.

mod config;
pub mod demo;
mod runner;

pub use config::RunnerConfig;
pub use runner::DemoRunner;
