pub mod cli;
pub mod dataset;
pub mod logger;
pub mod mock_regression;
