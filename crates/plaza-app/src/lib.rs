//! Plaza client application: directory resolution, the fixed-step loop, and
//! the session that wires networking, presence and the editor into one world.

pub mod game_loop;
pub mod platform;
pub mod session;

pub use game_loop::{FIXED_DT, FixedStepLoop, MAX_FRAME_TIME};
pub use platform::{PlatformDirs, PlatformError};
pub use session::{Session, reconnect_config};
