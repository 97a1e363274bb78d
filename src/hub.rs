use std::path::Path;
use std::process::Command;

use log::info;

use crate::dataset::DatasetPaths;
use crate::error::{RecordError, RecordResult};

pub const MAIN_REVISION: &str = "main";

/// Uploads a local folder into a dataset repository at a given revision.
pub trait HubClient {
    fn upload_folder(
        &self,
        repo_id: &str,
        folder: &Path,
        path_in_repo: &str,
        revision: &str,
    ) -> RecordResult<()>;
}

/// Publishes through the `huggingface-cli` tool, which owns authentication.
#[derive(Debug, Clone)]
pub struct HuggingFaceCli {
    program: String,
}

impl Default for HuggingFaceCli {
    fn default() -> Self {
        Self {
            program: "huggingface-cli".to_string(),
        }
    }
}

impl HubClient for HuggingFaceCli {
    fn upload_folder(
        &self,
        repo_id: &str,
        folder: &Path,
        path_in_repo: &str,
        revision: &str,
    ) -> RecordResult<()> {
        let status = Command::new(&self.program)
            .arg("upload")
            .arg(repo_id)
            .arg(folder)
            .arg(path_in_repo)
            .args(["--repo-type", "dataset", "--revision", revision])
            .status()
            .map_err(|e| RecordError::Hub(format!("could not run {}: {e}", self.program)))?;
        if !status.success() {
            return Err(RecordError::Hub(format!(
                "uploading {} to {repo_id}@{revision} exited with {status}",
                folder.display()
            )));
        }
        Ok(())
    }
}

/// Upload the packaged dataset, meta data and videos under `main` and under `revision`.
pub fn push_dataset_to_hub(
    client: &dyn HubClient,
    repo_id: &str,
    paths: &DatasetPaths,
    revision: &str,
) -> RecordResult<()> {
    info!("Pushing dataset to '{repo_id}'");
    let mut revisions = vec![MAIN_REVISION];
    if revision != MAIN_REVISION {
        revisions.push(revision);
    }

    let folders = [
        (paths.train_dir(), "train"),
        (paths.meta_data_dir(), "meta_data"),
        (paths.videos_dir(), "videos"),
    ];
    for (folder, path_in_repo) in &folders {
        for rev in &revisions {
            client.upload_folder(repo_id, folder, path_in_repo, rev)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[derive(Default)]
    struct Recording(RefCell<Vec<(String, String)>>);

    impl HubClient for Recording {
        fn upload_folder(
            &self,
            _repo_id: &str,
            _folder: &Path,
            path_in_repo: &str,
            revision: &str,
        ) -> RecordResult<()> {
            self.0
                .borrow_mut()
                .push((path_in_repo.to_string(), revision.to_string()));
            Ok(())
        }
    }

    #[test]
    fn every_folder_goes_to_main_and_revision() {
        let client = Recording::default();
        push_dataset_to_hub(&client, "me/data", &DatasetPaths::new("/tmp/x"), "v1.6").unwrap();
        let calls = client.0.into_inner();
        assert_eq!(calls.len(), 6);
        assert_eq!(calls[0], ("train".to_string(), "main".to_string()));
        assert_eq!(calls[1], ("train".to_string(), "v1.6".to_string()));
        assert_eq!(calls[5], ("videos".to_string(), "v1.6".to_string()));
    }

    #[test]
    fn main_revision_is_not_uploaded_twice() {
        let client = Recording::default();
        push_dataset_to_hub(&client, "me/data", &DatasetPaths::new("/tmp/x"), "main").unwrap();
        assert_eq!(client.0.into_inner().len(), 3);
    }
}
