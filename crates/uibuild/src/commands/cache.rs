//! The `cache` maintenance commands.

use crate::cli::{CacheCommand, CliError};
use uibuild_cas::BlobStore;

pub async fn run(command: CacheCommand) -> Result<(), CliError> {
    let store = BlobStore::open_default()?;
    match command {
        CacheCommand::Clean => {
            store.clear().await?;
            println!("Cache cleared at {}", store.root().display());
            Ok(())
        }
        CacheCommand::Verify => {
            let report = store.verify().await?;
            println!(
                "{} intact object(s), {} corrupt, {} dangling ref(s)",
                report.intact_objects,
                report.corrupt_objects.len(),
                report.dangling_refs.len()
            );
            for object in &report.corrupt_objects {
                println!("  corrupt: {object}");
            }
            for key in &report.dangling_refs {
                println!("  dangling: {key}");
            }
            if report.is_clean() {
                Ok(())
            } else {
                Err(CliError::build("cache verification found problems"))
            }
        }
    }
}
