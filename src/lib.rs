// Public API - only expose the runner module
pub mod runner;

// Internal modules - organized by stage
mod config;
mod coordination;
mod db;
mod enrich;
mod formats;
mod io;
mod scrape;
mod server;
mod telemetry;
mod upload;
