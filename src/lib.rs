pub mod config;
pub mod fingerprint;
pub mod gateway;
pub mod keylist;
pub mod queue;
pub mod schema;
pub mod store;
pub mod sync;
pub mod transport;
pub mod verifier;
