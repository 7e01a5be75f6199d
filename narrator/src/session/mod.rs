//! Pipeline run state with checkpoint/resume support.

mod persistence;
mod types;

pub use persistence::{
    cleanup_session, create_session, default_data_dir, find_session_for_document, save_session,
    work_dir,
};
pub use types::{RunState, Stage};
