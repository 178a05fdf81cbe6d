#![deny(warnings)]
#![deny(dead_code)]
#![deny(unused_variables)]
#![deny(unused_imports)]

pub mod schema;
pub mod store;

pub use store::{collection_name, LanceVectorIndex, DEFAULT_OP_TIMEOUT};
