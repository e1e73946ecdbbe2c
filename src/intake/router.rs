use crate::error::IntakeError;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif"];
const DOCUMENT_EXTENSIONS: &[&str] = &["txt", "pdf"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageCategory {
    Image,
    Document,
}

impl StorageCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Document => "document",
        }
    }

    pub fn folder(self) -> &'static str {
        match self {
            Self::Image => "Images",
            Self::Document => "Text_files",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub category: StorageCategory,
    pub destination_path: String,
}

/// Maps submitted file names onto the type-based folder layout of the bucket.
#[derive(Debug, Clone)]
pub struct StorageRouter {
    locator_prefix: String,
}

fn extension_of(file_name: &str) -> Option<String> {
    let (_, ext) = file_name.rsplit_once('.')?;
    if ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

fn base_name(file_name: &str) -> &str {
    file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(file_name)
}

pub fn category_for(file_name: &str) -> Option<StorageCategory> {
    let ext = extension_of(base_name(file_name))?;
    if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        Some(StorageCategory::Image)
    } else if DOCUMENT_EXTENSIONS.contains(&ext.as_str()) {
        Some(StorageCategory::Document)
    } else {
        None
    }
}

impl StorageRouter {
    pub fn new(locator_prefix: impl Into<String>) -> Self {
        let raw: String = locator_prefix.into();
        Self {
            locator_prefix: raw.trim().trim_end_matches('/').to_string(),
        }
    }

    pub fn locator_prefix(&self) -> &str {
        &self.locator_prefix
    }

    pub fn classify(&self, file_name: &str) -> Result<Placement, IntakeError> {
        let name = base_name(file_name.trim());
        let Some(category) = category_for(name) else {
            return Err(IntakeError::UnsupportedFileType(file_name.to_string()));
        };

        let destination_path = if self.locator_prefix.is_empty() {
            format!("{}/{}", category.folder(), name)
        } else {
            format!("{}/{}/{}", self.locator_prefix, category.folder(), name)
        };

        Ok(Placement {
            category,
            destination_path,
        })
    }
}
