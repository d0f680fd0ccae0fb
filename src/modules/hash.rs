//! MD5 and SHA-256 digests over file content, posted back as a `file-hash`
//! artifact.

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::datamodel::{ArtifactMeta, FileMeta};
use crate::job::JobContext;
use crate::module::{
    FileModule, ModuleError, ModuleFactory, ModuleKind, ModuleOrigin, ModuleSettings,
    ProcessOutcome,
};

const READ_CHUNK: usize = 64 * 1024;

pub struct FileHasherFactory;

impl ModuleFactory for FileHasherFactory {
    fn display_name(&self) -> String {
        "File Hasher".to_string()
    }

    fn origin(&self) -> ModuleOrigin {
        ModuleOrigin::FirstParty
    }

    fn supports(&self, kind: ModuleKind) -> bool {
        kind == ModuleKind::File
    }

    fn create_file_module(&self, _settings: &ModuleSettings) -> Option<Box<dyn FileModule>> {
        Some(Box::new(FileHasher))
    }
}

struct FileHasher;

impl FileModule for FileHasher {
    fn process(&mut self, ctx: &JobContext, file: &FileMeta) -> Result<ProcessOutcome, ModuleError> {
        if file.is_dir() || file.size == 0 {
            return Ok(ProcessOutcome::Ok);
        }
        let mut md5 = md5::Context::new();
        let mut sha256 = Sha256::new();
        let mut buf = vec![0u8; READ_CHUNK];
        let mut offset = 0u64;
        loop {
            if ctx.is_cancelled() {
                return Ok(ProcessOutcome::Ok);
            }
            let n = ctx.store().read_at(file.id, offset, &mut buf)?;
            if n == 0 {
                break;
            }
            md5.consume(&buf[..n]);
            sha256.update(&buf[..n]);
            offset += n as u64;
        }
        let md5_hex = format!("{:x}", md5.compute());
        let sha256_hex = hex::encode(sha256.finalize());
        debug!(file = %file.name, md5 = %md5_hex, sha256 = %sha256_hex, "hashed");
        ctx.post_artifact(ArtifactMeta {
            id: file.id,
            type_name: "file-hash".to_string(),
            source_item: file.id,
        });
        Ok(ProcessOutcome::Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datamodel::{ContentStore, DirStore, JobId};
    use crate::scheduler::TaskScheduler;
    use std::fs;
    use std::sync::Arc;

    #[test]
    fn hashes_file_content() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("f.bin"), b"abc").expect("write");
        let store = Arc::new(DirStore::open(temp.path()).expect("open"));
        let ds = store.data_source();
        let file = store.top_level_items(ds.id).expect("items").remove(0);

        let scheduler = Arc::new(TaskScheduler::new(1));
        let ctx = crate::job::JobContext::new(JobId(1), ds, store, true, scheduler);
        let mut module = FileHasher;
        let outcome = module.process(&ctx, &file).expect("process");
        assert_eq!(outcome, ProcessOutcome::Ok);
    }
}
