use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::error::UploaderError;

/// MD5 of the full file content, streamed in fixed-size chunks. Content
/// addressing for manifest names, not a security control.
pub(crate) fn md5_file(path: &Path) -> Result<String, UploaderError> {
    let mut file = File::open(path)
        .map_err(|err| UploaderError::Filesystem(format!("open {}: {err}", path.display())))?;
    let mut context = md5::Context::new();
    let mut buffer = [0u8; 4096];
    loop {
        let read = file
            .read(&mut buffer)
            .map_err(|err| UploaderError::Filesystem(err.to_string()))?;
        if read == 0 {
            break;
        }
        context.consume(&buffer[..read]);
    }
    Ok(format!("{:x}", context.compute()))
}

/// Short hash derived from the current time, appended to aliases in test
/// mode so repeated submissions to the ENA test endpoint do not collide.
pub(crate) fn timestamp_suffix() -> String {
    let stamp = chrono::Utc::now().to_rfc3339();
    let mut hex = format!("{:x}", md5::compute(stamp.as_bytes()));
    hex.truncate(8);
    hex
}
