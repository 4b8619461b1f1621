//! Core abstractions for cipherload: the record model and the object store
//! and warehouse contracts the pipeline is written against.
//! Kept free of crypto and HTTP dependencies so backends can be swapped in tests.

pub mod object_store;
pub mod record;
pub mod warehouse;
