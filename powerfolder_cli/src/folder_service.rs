//! A small demo service: greets callers and lists the files of the folders it shares.

use async_trait::async_trait;
use powerfolder_p2p::{
    remote_operation, DeclaredError, OperationDescriptor, RemoteCallFailure, RemoteCallStub, RemoteError,
    ServiceContract, ServiceHandler,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

pub const FOLDER_SERVICE: &str = "FolderService";
pub const NO_SUCH_FOLDER: &str = "NoSuchFolder";

pub fn folder_contract() -> Arc<ServiceContract> {
    ServiceContract::builder(FOLDER_SERVICE)
        .operation(OperationDescriptor::new("greet", 1))
        .operation(OperationDescriptor::new("listFolders", 0))
        .operation(OperationDescriptor::new("listFiles", 1).declares(NO_SUCH_FOLDER))
        .build()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("There is no folder called '{folder}'")]
pub struct NoSuchFolder {
    pub folder: String,
}

#[derive(Debug, Error)]
pub enum FolderError {
    #[error(transparent)]
    NoSuchFolder(NoSuchFolder),
    #[error(transparent)]
    Call(#[from] RemoteCallFailure),
}

impl DeclaredError for FolderError {
    fn from_remote(error: &RemoteError) -> Option<Self> {
        error.decode::<NoSuchFolder>(NO_SUCH_FOLDER).map(FolderError::NoSuchFolder)
    }
}

/// Typed client for a remote [`SharedFolders`] service.
pub struct FolderServiceStub {
    stub: RemoteCallStub,
}

impl FolderServiceStub {
    pub fn new(stub: RemoteCallStub) -> Self {
        Self { stub }
    }

    remote_operation!(greet => "greet" (name: &str) -> String, RemoteCallFailure);
    remote_operation!(list_folders => "listFolders" () -> Vec<String>, RemoteCallFailure);
    remote_operation!(
        /// Files in `folder`, sorted by name.
        list_files => "listFiles" (folder: &str) -> Vec<String>, FolderError
    );
}

/// Serves [`FOLDER_SERVICE`] from a fixed set of folders.
#[derive(Default)]
pub struct SharedFolders {
    owner: String,
    folders: BTreeMap<String, Vec<String>>,
}

impl SharedFolders {
    pub fn new(owner: impl Into<String>) -> Self {
        Self { owner: owner.into(), folders: BTreeMap::new() }
    }

    pub fn with_folder<S: Into<String>>(mut self, name: impl Into<String>, files: impl IntoIterator<Item = S>) -> Self {
        let mut files = files.into_iter().map(Into::into).collect::<Vec<String>>();
        files.sort();
        self.folders.insert(name.into(), files);
        self
    }

    /// A few folders to show off the service with.
    pub fn demo(owner: impl Into<String>) -> Self {
        Self::new(owner)
            .with_folder("Documents", ["notes.txt", "budget.ods", "letter.odt"])
            .with_folder("Music", ["track01.ogg", "track02.ogg"])
            .with_folder("Photos", Vec::<String>::new())
    }

    fn list_files(&self, folder: &str) -> Result<Value, RemoteError> {
        match self.folders.get(folder) {
            Some(files) => Ok(json!(files)),
            None => Err(RemoteError::declared(NO_SUCH_FOLDER, &NoSuchFolder { folder: folder.to_string() })),
        }
    }
}

fn string_arg<'a>(args: &'a [Value], what: &str) -> Result<&'a str, RemoteError> {
    args.first()
        .and_then(Value::as_str)
        .ok_or_else(|| RemoteError::invalid_arguments(format!("{what} must be a string")))
}

#[async_trait]
impl ServiceHandler for SharedFolders {
    async fn invoke(&self, operation: &str, args: Vec<Value>) -> Result<Value, RemoteError> {
        match operation {
            "greet" => {
                let name = string_arg(&args, "name")?;
                Ok(json!(format!("Hello {name}, this is {}.", self.owner)))
            }
            "listFolders" => Ok(json!(self.folders.keys().collect::<Vec<_>>())),
            "listFiles" => self.list_files(string_arg(&args, "folder")?),
            other => Err(RemoteError::unknown_operation(FOLDER_SERVICE, other)),
        }
    }
}
