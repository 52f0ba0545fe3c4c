pub mod arbiter;

pub use arbiter::{Arbiter, Authority, AuthorityStrategy, TransportCommand};
