mod fan_out;

pub use fan_out::QueryFanOutExec;
