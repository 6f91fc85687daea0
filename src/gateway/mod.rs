pub mod server;

pub use server::{AppState, router, run, serve};
