pub mod provider;
pub mod together;
pub mod replicate;
pub mod vision;
pub mod retry;
pub mod factory;
