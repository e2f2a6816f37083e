pub mod config;
pub mod error;
pub mod fetch;
pub mod mpd;
pub mod player;
pub mod util;

pub use error::{SegueError, SegueResult};
pub use player::Player;
