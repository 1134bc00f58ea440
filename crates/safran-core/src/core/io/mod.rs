pub mod xyz;

pub use xyz::{XyzError, XyzReader, XyzWriter};
