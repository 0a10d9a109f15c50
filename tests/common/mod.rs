//! Shared test fixture: a throwaway OpenPGP identity written to a temp
//! keystore directory, used by every integration test that exercises a
//! full writer/reader round trip.

use sequoia_openpgp as openpgp;
use openpgp::cert::prelude::*;
use openpgp::serialize::Serialize;
use std::path::{Path, PathBuf};

pub struct TestIdentity {
    pub fingerprint: String,
    keystore_dir: PathBuf,
}

impl TestIdentity {
    pub fn keystore_path(&self) -> &Path {
        &self.keystore_dir
    }
}

impl Drop for TestIdentity {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.keystore_dir);
    }
}

pub fn generate(userid: &str) -> TestIdentity {
    let (cert, _revocation) = CertBuilder::general_purpose(None, Some(userid))
        .generate()
        .expect("test cert generation");

    let fingerprint = cert.fingerprint().to_hex();

    let mut dir = std::env::temp_dir();
    dir.push(format!(
        "encrocrypt-integration-{}-{}",
        std::process::id(),
        fingerprint
    ));
    std::fs::create_dir_all(&dir).expect("create keystore dir");

    let path = dir.join(format!("{fingerprint}.asc"));
    let mut buf = Vec::new();
    {
        let mut writer =
            openpgp::armor::Writer::new(&mut buf, openpgp::armor::Kind::SecretKey).expect("armor writer");
        cert.as_tsk().serialize(&mut writer).expect("serialize cert");
        writer.finalize().expect("finalize armor");
    }
    std::fs::write(&path, buf).expect("write test cert");

    TestIdentity {
        fingerprint,
        keystore_dir: dir,
    }
}
