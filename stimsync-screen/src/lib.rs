pub mod closed_loop;
pub mod command;
pub mod config;
pub mod driver;
pub mod error;
pub mod state;
pub mod transport;

pub use closed_loop::{ClosedLoopHandle, OffsetListener};
pub use command::{CommandError, ScreenCommand};
pub use config::{CornerSquareConfig, ScreenConfig};
pub use driver::{FrameSink, LogSink, NullSink, ScreenDriver};
pub use error::{ConfigError, TraceError, TransportError};
pub use state::{
    CornerSquare, Frame, PlaybackPhase, PlaybackState, ScreenRuntime, playback_time,
};
pub use transport::{CommandInbox, CommandSource};
