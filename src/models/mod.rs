pub mod advisor;
pub mod audit;
pub mod decision;
pub mod history;
pub mod policy;
