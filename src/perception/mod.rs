pub mod observation;
pub mod screenshot;
pub mod types;
