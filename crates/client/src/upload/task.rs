// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::ClientError;

pub type TaskId = uuid::Uuid;

/// Where an upload's bytes come from.
#[derive(Clone)]
pub enum FileHandle {
    Memory(Bytes),
    Path(PathBuf),
}

impl FileHandle {
    /// Load the full contents.
    pub async fn read(&self) -> Result<Bytes, ClientError> {
        match self {
            Self::Memory(bytes) => Ok(bytes.clone()),
            Self::Path(path) => Ok(Bytes::from(tokio::fs::read(path).await?)),
        }
    }
}

impl fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory(bytes) => write!(f, "Memory({} bytes)", bytes.len()),
            Self::Path(path) => write!(f, "Path({})", path.display()),
        }
    }
}

/// A file offered for upload, before validation.
#[derive(Debug, Clone)]
pub struct CandidateFile {
    pub name: String,
    pub size: u64,
    /// Client-declared content type. Never used for validation.
    pub mime_hint: Option<String>,
    pub handle: FileHandle,
}

impl CandidateFile {
    pub fn from_bytes(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self {
            name: name.into(),
            size: data.len() as u64,
            mime_hint: None,
            handle: FileHandle::Memory(data),
        }
    }

    /// Describe a file on disk; only its metadata is read here.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, ClientError> {
        let path = path.as_ref();
        let meta = tokio::fs::metadata(path).await?;
        if !meta.is_file() {
            return Err(ClientError::Io(format!("{} is not a regular file", path.display())));
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self {
            name,
            size: meta.len(),
            mime_hint: None,
            handle: FileHandle::Path(path.to_path_buf()),
        })
    }

    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        self.mime_hint = Some(mime.into());
        self
    }
}

/// Lifecycle state of an upload task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Uploading,
    Success,
    Failed,
}

impl TaskState {
    /// Terminal states.
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Uploading => "uploading",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One file in the upload queue.
#[derive(Debug, Clone)]
pub struct UploadTask {
    pub id: TaskId,
    pub original_name: String,
    pub size_bytes: u64,
    pub mime_hint: Option<String>,
    pub handle: FileHandle,
    pub state: TaskState,
    /// 0-100, meaningful only while uploading.
    pub progress_percent: u8,
    pub last_error: Option<String>,
    /// Bumped each time the task starts uploading; completions from older
    /// attempts are ignored.
    pub(crate) attempt: u32,
}

impl UploadTask {
    pub(crate) fn admit(candidate: CandidateFile) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            original_name: candidate.name,
            size_bytes: candidate.size,
            mime_hint: candidate.mime_hint,
            handle: candidate.handle,
            state: TaskState::Pending,
            progress_percent: 0,
            last_error: None,
            attempt: 0,
        }
    }

    pub(crate) fn upload_file(&self) -> UploadFile {
        UploadFile {
            name: self.original_name.clone(),
            size: self.size_bytes,
            mime_hint: self.mime_hint.clone(),
            handle: self.handle.clone(),
        }
    }
}

/// What a transport needs to send one file.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub name: String,
    pub size: u64,
    pub mime_hint: Option<String>,
    pub handle: FileHandle,
}

impl UploadFile {
    /// Declared content type, else one guessed from the extension.
    pub fn content_type(&self) -> String {
        if let Some(ref mime) = self.mime_hint {
            return mime.clone();
        }
        let ext = crate::upload::validate::extension_of(&self.name);
        match ext.as_deref() {
            Some("pdf") => "application/pdf",
            Some("docx") => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
            Some("doc") => "application/msword",
            Some("txt") => "text/plain",
            Some("md") => "text/markdown",
            _ => "application/octet-stream",
        }
        .to_owned()
    }
}
