pub mod builder;
pub mod error;
pub mod finder;
pub mod table;
pub mod weights;
