pub mod decision;
pub mod org;
