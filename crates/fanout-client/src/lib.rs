mod client;
pub mod error;
pub mod flight;
pub mod memory;

pub use client::{RecordBatchStream, SqlClient, SqlConnection};
