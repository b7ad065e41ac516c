pub mod support;

pub mod monitor_tests;
pub mod grpc_tests;
