pub mod timeline;

pub use timeline::{Applied, ReconcilingStore};
