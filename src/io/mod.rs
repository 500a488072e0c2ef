pub mod midi;
pub mod select;
