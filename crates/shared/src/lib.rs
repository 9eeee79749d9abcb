pub mod domain;
pub mod error;
pub mod html;
pub mod ordered_map;
pub mod protocol;

pub use ordered_map::OrderedMap;
