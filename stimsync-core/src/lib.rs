pub mod command;
pub mod error;
pub mod stimulus;
pub mod sync;
pub mod trajectory;

pub use command::{Command, OffsetUpdate, TIMESTAMP_KEY, decode_batch, encode_batch};
pub use error::{ConfigurationError, InvalidTrajectory};
pub use stimulus::{
    ClosedLoopOffset, GratingState, ParamValue, Stimulus, StimulusFrame, StimulusProgram,
};
pub use sync::{SyncSquareSample, SyncTrace};
pub use trajectory::{ControlPoint, Trajectory};
