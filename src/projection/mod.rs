pub mod albers;
pub mod projector;
