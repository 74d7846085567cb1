pub mod apply_event;
pub mod begin_download;
pub mod begin_upload;
pub mod catch_up;
pub mod list_files;
pub mod remove_file;

pub use apply_event::{ApplyEventOperation, ApplyEventOperationOutcome};
pub use begin_download::{BeginDownloadOperation, BeginDownloadOperationRequest};
pub use begin_upload::{BeginUploadOperation, BeginUploadOperationRequest};
pub use catch_up::{CatchUpOperation, CatchUpOperationRequest, CatchUpOperationResult};
pub use list_files::ListFilesOperation;
pub use remove_file::{RemoveFileOperation, RemoveFileOperationRequest};
