//! Value types shared by drivers, the registry and the facade

use crate::error::{DriverError, StorageError, StorageResult};
use crate::path;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::Stream;
use http::HeaderMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::pin::Pin;
use tokio::io::AsyncRead;

/// Static description of a driver type. Registered once, never mutated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverConfig {
    pub name: String,
    /// Listings are sorted by the core using the mount's sort settings.
    pub local_sort: bool,
    pub only_local: bool,
    pub only_proxy: bool,
    /// Every listing bypasses driver-side caches.
    pub no_cache: bool,
    /// `put` is refused even if the driver implements `Writer`.
    pub no_upload: bool,
    pub need_ms: bool,
    pub default_root: String,
    pub check_status: bool,
    pub alert: String,
    pub no_overwrite_upload: bool,
}

impl DriverConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    /// Multi-line string, rendered as a text area.
    Text,
    Number,
    Bool,
    /// String restricted to `options`.
    Select,
    /// Structured JSON value, checked by the driver itself.
    Json,
}

/// One entry of a driver's settings schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub required: bool,
    pub default: String,
    pub help: String,
    pub options: Vec<String>,
}

impl ConfigField {
    fn new(name: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            required: false,
            default: String::new(),
            help: String::new(),
            options: Vec::new(),
        }
    }

    pub fn string(name: &str) -> Self {
        Self::new(name, FieldType::String)
    }

    pub fn text(name: &str) -> Self {
        Self::new(name, FieldType::Text)
    }

    pub fn number(name: &str) -> Self {
        Self::new(name, FieldType::Number)
    }

    pub fn bool(name: &str) -> Self {
        Self::new(name, FieldType::Bool)
    }

    pub fn json(name: &str) -> Self {
        Self::new(name, FieldType::Json)
    }

    pub fn select(name: &str, options: &[&str]) -> Self {
        let mut field = Self::new(name, FieldType::Select);
        field.options = options.iter().map(|o| o.to_string()).collect();
        field
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn default_value(mut self, default: &str) -> Self {
        self.default = default.to_string();
        self
    }

    pub fn help(mut self, help: &str) -> Self {
        self.help = help.to_string();
        self
    }

    fn check(&self, value: Option<&JsonValue>) -> Result<(), String> {
        let value = match value {
            None | Some(JsonValue::Null) => {
                if self.required {
                    return Err(format!("field '{}' is required", self.name));
                }
                return Ok(());
            }
            Some(v) => v,
        };

        match self.field_type {
            FieldType::String | FieldType::Text | FieldType::Select => {
                let s = value
                    .as_str()
                    .ok_or_else(|| format!("field '{}' must be a string", self.name))?;
                if self.required && s.is_empty() {
                    return Err(format!("field '{}' is required", self.name));
                }
                if !self.options.is_empty() && !s.is_empty() && !self.options.iter().any(|o| o == s)
                {
                    return Err(format!(
                        "field '{}' must be one of: {}",
                        self.name,
                        self.options.join(", ")
                    ));
                }
            }
            FieldType::Number => {
                if !value.is_number() {
                    return Err(format!("field '{}' must be a number", self.name));
                }
            }
            FieldType::Bool => {
                if !value.is_boolean() {
                    return Err(format!("field '{}' must be a boolean", self.name));
                }
            }
            FieldType::Json => {}
        }
        Ok(())
    }
}

/// Descriptor plus settings schema, as exposed to configuration UIs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverInfo {
    pub config: DriverConfig,
    pub items: Vec<ConfigField>,
}

impl DriverInfo {
    /// Check a settings object against the schema.
    pub fn validate_addition(&self, addition: &JsonValue) -> StorageResult<()> {
        let empty = serde_json::Map::new();
        let object = match addition {
            JsonValue::Object(map) => map,
            JsonValue::Null => &empty,
            _ => {
                return Err(StorageError::InvalidInput(
                    "driver settings must be a JSON object".to_string(),
                ))
            }
        };

        for field in &self.items {
            field
                .check(object.get(&field.name))
                .map_err(StorageError::InvalidInput)?;
        }
        Ok(())
    }

    /// Parse a serialized settings blob and validate it. An empty blob is `{}`.
    pub fn validate_addition_str(&self, addition: &str) -> StorageResult<JsonValue> {
        let value: JsonValue = if addition.trim().is_empty() {
            JsonValue::Object(serde_json::Map::new())
        } else {
            serde_json::from_str(addition)
                .map_err(|e| StorageError::InvalidInput(format!("invalid settings JSON: {}", e)))?
        };
        self.validate_addition(&value)?;
        Ok(value)
    }
}

/// Uniform file/directory entry returned by drivers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileObject {
    pub id: String,
    /// Path relative to the mount root.
    pub path: String,
    pub name: String,
    pub size: i64,
    pub modified: DateTime<Utc>,
    pub created: Option<DateTime<Utc>>,
    pub is_dir: bool,
}

impl FileObject {
    /// Reference to a directory at `path`, as built by the facade.
    pub fn dir(path: &str) -> Self {
        Self::reference(path, true)
    }

    /// Reference to a file at `path`, as built by the facade.
    pub fn file(path: &str) -> Self {
        Self::reference(path, false)
    }

    fn reference(path: &str, is_dir: bool) -> Self {
        Self {
            id: String::new(),
            path: path.to_string(),
            name: path::base_name(path).to_string(),
            size: 0,
            modified: Utc::now(),
            created: None,
            is_dir,
        }
    }

    pub fn create_time(&self) -> DateTime<Utc> {
        self.created.unwrap_or(self.modified)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ListArgs {
    /// Full request path, before mount stripping.
    pub req_path: String,
    pub s3_show_placeholder: bool,
    pub refresh: bool,
}

#[derive(Debug, Clone, Default)]
pub struct LinkArgs {
    pub ip: String,
    pub header: HeaderMap,
    pub link_type: String,
    pub redirect: bool,
}

/// Stream of file content chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, DriverError>> + Send>>;

/// A fetchable reference: a redirect URL or a byte stream, plus headers.
#[derive(Default)]
pub struct Link {
    pub url: Option<String>,
    pub header: HeaderMap,
    pub stream: Option<ByteStream>,
    pub concurrency: usize,
    pub part_size: usize,
}

impl Link {
    pub fn redirect(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    pub fn stream(stream: ByteStream) -> Self {
        Self {
            stream: Some(stream),
            ..Self::default()
        }
    }
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link")
            .field("url", &self.url)
            .field("header", &self.header)
            .field("stream", &self.stream.is_some())
            .field("concurrency", &self.concurrency)
            .field("part_size", &self.part_size)
            .finish()
    }
}

/// Upload body handed to `Writer::put`.
pub struct FileStream {
    pub obj: FileObject,
    pub mimetype: String,
    pub reader: Pin<Box<dyn AsyncRead + Send + Unpin>>,
    pub force_stream_upload: bool,
}

impl FileStream {
    pub fn new(
        name: &str,
        size: i64,
        mimetype: &str,
        reader: Pin<Box<dyn AsyncRead + Send + Unpin>>,
    ) -> Self {
        let mut obj = FileObject::file(name);
        obj.size = size;
        Self {
            obj,
            mimetype: mimetype.to_string(),
            reader,
            force_stream_upload: false,
        }
    }
}

impl fmt::Debug for FileStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileStream")
            .field("obj", &self.obj)
            .field("mimetype", &self.mimetype)
            .field("force_stream_upload", &self.force_stream_upload)
            .finish()
    }
}

/// Percentage callback for uploads.
pub type UpdateProgress<'a> = &'a (dyn Fn(f64) + Send + Sync);

#[derive(Debug, Clone)]
pub struct OtherArgs {
    pub obj: FileObject,
    pub method: String,
    pub data: JsonValue,
}
