pub mod geo;
pub mod records;
pub mod region;
pub mod station;
