//! External-editor coding support: the codes side file and the session
//! checkpoint. The workflow that ties them to the store lives in
//! `service::coding_service`.

pub mod checkpoint;
pub mod codes_file;

pub use checkpoint::{Checkpoint, CheckpointError, CheckpointResult};
pub use codes_file::{
    is_valid_code, parse_codes_file, render_codes_file, CodesFileError, CodesFileResult,
};
