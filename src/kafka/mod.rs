pub mod reader;
pub mod topics;

#[cfg(test)]
mod tests;

pub use reader::PartitionReader;
pub use topics::list_topics;
