pub mod field;
pub mod normalize;
pub mod store;

pub use field::{GridCoords, GriddedField, VelocityField};
pub use store::{GridStore, LoadedField};
