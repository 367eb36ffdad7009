//! Orchestrators
//!
//! Each orchestrator wraps one store plus the API client and exposes the
//! create/update/delete operations callers use, with precondition checks and
//! the persistence strategy of each operation (synchronous with tracked
//! in-flight state, or optimistic with a background write).

pub mod current_user;
pub mod encounters;
pub mod note_types;
pub mod sample_recordings;

pub use current_user::CurrentUser;
pub use encounters::Encounters;
pub use note_types::NoteTypes;
pub use sample_recordings::SampleRecordings;
