pub mod radiodj;

pub use radiodj::{NowPlaying, RadioDjClient, RadioDjConfig};
