mod memory;
mod store_trait;

pub use memory::*;
pub use store_trait::*;
