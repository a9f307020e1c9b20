use std::{
    io,
    path::{Path, PathBuf},
};

use thiserror::Error;
use uuid::Uuid;

use crate::{models::SourceFile, runtime::RuntimeDescriptor};

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("failed to create workspace {path}: {source}")]
    Create {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to write source file {name}: {source}")]
    Write {
        name: String,
        #[source]
        source: io::Error,
    },
    #[error("invalid file name: {0:?}")]
    InvalidFileName(String),
    #[error("no source files to write")]
    NoFiles,
}

pub fn validate_file_name(name: &str) -> Result<(), WorkspaceError> {
    let single_component = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains('\0');
    if single_component {
        Ok(())
    } else {
        Err(WorkspaceError::InvalidFileName(name.to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn create(&self, job_id: Uuid) -> Result<Workspace, WorkspaceError> {
        let path = self.root.join(job_id.to_string());
        // create_dir, not create_dir_all: a pre-existing job directory is a fault
        tokio::fs::create_dir(&path)
            .await
            .map_err(|source| WorkspaceError::Create {
                path: path.display().to_string(),
                source,
            })?;
        Ok(Workspace {
            path,
            removed: false,
        })
    }
}

#[derive(Debug)]
pub struct Workspace {
    path: PathBuf,
    removed: bool,
}

impl Workspace {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn write_files(
        &self,
        files: &[SourceFile],
        descriptor: &RuntimeDescriptor,
    ) -> Result<String, WorkspaceError> {
        let mut main_file = None;
        for (index, file) in files.iter().enumerate() {
            let name = match &file.name {
                Some(name) => {
                    validate_file_name(name)?;
                    name.clone()
                }
                None => descriptor.file_name_for(index),
            };
            tokio::fs::write(self.path.join(&name), file.content.as_bytes())
                .await
                .map_err(|source| WorkspaceError::Write {
                    name: name.clone(),
                    source,
                })?;
            if index == 0 {
                main_file = Some(name);
            }
        }
        main_file.ok_or(WorkspaceError::NoFiles)
    }

    pub async fn destroy(mut self) {
        self.removed = true;
        match tokio::fs::remove_dir_all(&self.path).await {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => {
                tracing::warn!(path = %self.path.display(), error = %err, "workspace cleanup failed");
            }
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if !self.removed {
            let _ = std::fs::remove_dir_all(&self.path);
        }
    }
}
