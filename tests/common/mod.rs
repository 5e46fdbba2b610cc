#![allow(dead_code)]
//! In-memory `ObjectStoreClient` with a call log and fault injection.
//!
//! Objects either carry real bytes or only a size, which lets tests move
//! gigabyte-sized objects without allocating them.

use async_trait::async_trait;
use object_relocator::{
    ObjectAddress, ObjectMetadata, ObjectStoreClient, StorageError, StorageResult,
    models::{metadata::KeyPage, multipart::CompletedPart},
};
use std::{
    collections::{BTreeMap, HashMap},
    io,
    sync::Mutex,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeObject {
    pub size: u64,
    /// `None` for size-only objects.
    pub data: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    GetMetadata { key: String },
    ListPage {
        prefix: String,
        continuation: Option<String>,
        max_keys: usize,
    },
    Copy { source: String, dest: String },
    Delete { key: String },
    Initiate { key: String },
    CopyPart {
        part_number: u32,
        first_byte: u64,
        last_byte: u64,
    },
    Complete { part_numbers: Vec<u32> },
    Abort { upload_id: String },
}

impl Call {
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Call::GetMetadata { .. } | Call::ListPage { .. })
    }
}

#[derive(Debug, Default, Clone)]
pub struct Faults {
    /// Fail the copy of this part number.
    pub fail_part: Option<u32>,
    pub fail_complete: bool,
    /// Completed chunked copies land one byte short.
    pub truncate_complete: bool,
    pub fail_abort: bool,
    /// Single-request copies land one byte short.
    pub truncate_copies: bool,
    /// Single-request copies report success but write nothing.
    pub drop_copies: bool,
    /// Deleting this key fails.
    pub fail_delete_key: Option<String>,
}

#[derive(Debug, Default)]
struct Upload {
    bucket: String,
    key: String,
    parts: BTreeMap<u32, (String, u64, Option<Vec<u8>>)>,
}

#[derive(Default)]
struct State {
    objects: BTreeMap<(String, String), FakeObject>,
    uploads: HashMap<String, Upload>,
    next_upload: u32,
    calls: Vec<Call>,
    faults: Faults,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

fn injected(what: &str) -> StorageError {
    StorageError::Backend(Box::new(io::Error::other(format!("injected {what} failure"))))
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, bucket: &str, key: &str, data: &[u8]) {
        self.state.lock().unwrap().objects.insert(
            (bucket.to_string(), key.to_string()),
            FakeObject {
                size: data.len() as u64,
                data: Some(data.to_vec()),
            },
        );
    }

    pub fn put_sized(&self, bucket: &str, key: &str, size: u64) {
        self.state.lock().unwrap().objects.insert(
            (bucket.to_string(), key.to_string()),
            FakeObject { size, data: None },
        );
    }

    pub fn get(&self, bucket: &str, key: &str) -> Option<FakeObject> {
        self.state
            .lock()
            .unwrap()
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .objects
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect()
    }

    pub fn set_faults(&self, faults: Faults) {
        self.state.lock().unwrap().faults = faults;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn open_uploads(&self) -> usize {
        self.state.lock().unwrap().uploads.len()
    }

    fn record(&self, call: Call) {
        self.state.lock().unwrap().calls.push(call);
    }
}

#[async_trait]
impl ObjectStoreClient for MemoryStore {
    async fn get_metadata(&self, bucket: &str, key: &str) -> StorageResult<ObjectMetadata> {
        self.record(Call::GetMetadata {
            key: key.to_string(),
        });
        Ok(match self.get(bucket, key) {
            Some(obj) => ObjectMetadata::present(obj.size),
            None => ObjectMetadata::absent(),
        })
    }

    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation_token: Option<&str>,
        max_keys: usize,
    ) -> StorageResult<KeyPage> {
        self.record(Call::ListPage {
            prefix: prefix.to_string(),
            continuation: continuation_token.map(str::to_string),
            max_keys,
        });
        let matching: Vec<String> = self
            .keys(bucket)
            .into_iter()
            .filter(|k| k.starts_with(prefix))
            .filter(|k| continuation_token.is_none_or(|token| k.as_str() > token))
            .collect();

        let keys: Vec<String> = matching.iter().take(max_keys).cloned().collect();
        let next_continuation_token = if matching.len() > keys.len() {
            keys.last().cloned()
        } else {
            None
        };
        Ok(KeyPage {
            keys,
            next_continuation_token,
        })
    }

    async fn copy_object(&self, source: &ObjectAddress, dest: &ObjectAddress) -> StorageResult<()> {
        self.record(Call::Copy {
            source: source.key().to_string(),
            dest: dest.key().to_string(),
        });
        let mut state = self.state.lock().unwrap();
        let mut obj = state
            .objects
            .get(&(source.bucket().to_string(), source.key().to_string()))
            .cloned()
            .ok_or_else(|| StorageError::ObjectNotFound {
                bucket: source.bucket().to_string(),
                key: source.key().to_string(),
            })?;

        if state.faults.drop_copies {
            return Ok(());
        }
        if state.faults.truncate_copies && obj.size > 0 {
            obj.size -= 1;
            if let Some(data) = obj.data.as_mut() {
                data.pop();
            }
        }
        state
            .objects
            .insert((dest.bucket().to_string(), dest.key().to_string()), obj);
        Ok(())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<()> {
        self.record(Call::Delete {
            key: key.to_string(),
        });
        let mut state = self.state.lock().unwrap();
        if state.faults.fail_delete_key.as_deref() == Some(key) {
            return Err(injected("delete"));
        }
        state.objects.remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }

    async fn initiate_multipart_copy(&self, dest: &ObjectAddress) -> StorageResult<String> {
        self.record(Call::Initiate {
            key: dest.key().to_string(),
        });
        let mut state = self.state.lock().unwrap();
        state.next_upload += 1;
        let upload_id = format!("upload-{}", state.next_upload);
        state.uploads.insert(
            upload_id.clone(),
            Upload {
                bucket: dest.bucket().to_string(),
                key: dest.key().to_string(),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn copy_part(
        &self,
        source: &ObjectAddress,
        _dest: &ObjectAddress,
        upload_id: &str,
        part_number: u32,
        first_byte: u64,
        last_byte: u64,
    ) -> StorageResult<String> {
        self.record(Call::CopyPart {
            part_number,
            first_byte,
            last_byte,
        });
        let mut state = self.state.lock().unwrap();
        if state.faults.fail_part == Some(part_number) {
            return Err(injected("part copy"));
        }
        let src = state
            .objects
            .get(&(source.bucket().to_string(), source.key().to_string()))
            .cloned()
            .ok_or_else(|| StorageError::ObjectNotFound {
                bucket: source.bucket().to_string(),
                key: source.key().to_string(),
            })?;
        if first_byte > last_byte || last_byte >= src.size {
            return Err(StorageError::InvalidRange {
                first_byte,
                last_byte,
                size: src.size,
            });
        }

        let slice = src
            .data
            .map(|data| data[first_byte as usize..=last_byte as usize].to_vec());
        let e_tag = format!("etag-{part_number}-{first_byte}-{last_byte}");
        let upload = state
            .uploads
            .get_mut(upload_id)
            .ok_or_else(|| StorageError::NoSuchUpload(upload_id.to_string()))?;
        upload
            .parts
            .insert(part_number, (e_tag.clone(), last_byte - first_byte + 1, slice));
        Ok(e_tag)
    }

    async fn complete_multipart_copy(
        &self,
        dest: &ObjectAddress,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> StorageResult<()> {
        self.record(Call::Complete {
            part_numbers: parts.iter().map(|p| p.part_number).collect(),
        });
        let mut state = self.state.lock().unwrap();
        if state.faults.fail_complete {
            return Err(injected("complete"));
        }
        let upload = state
            .uploads
            .remove(upload_id)
            .ok_or_else(|| StorageError::NoSuchUpload(upload_id.to_string()))?;

        let mut size = 0;
        let mut data = Some(Vec::new());
        for part in parts {
            let (e_tag, len, bytes) =
                upload
                    .parts
                    .get(&part.part_number)
                    .ok_or_else(|| StorageError::InvalidPart {
                        part_number: part.part_number,
                        reason: "never copied".into(),
                    })?;
            if *e_tag != part.e_tag {
                return Err(StorageError::InvalidPart {
                    part_number: part.part_number,
                    reason: "etag mismatch".into(),
                });
            }
            size += len;
            data = match (data, bytes) {
                (Some(mut acc), Some(bytes)) => {
                    acc.extend_from_slice(bytes);
                    Some(acc)
                }
                _ => None,
            };
        }

        if state.faults.truncate_complete && size > 0 {
            size -= 1;
            if let Some(bytes) = data.as_mut() {
                bytes.pop();
            }
        }
        state.objects.insert(
            (upload.bucket, dest.key().to_string()),
            FakeObject { size, data },
        );
        Ok(())
    }

    async fn abort_multipart_copy(&self, _dest: &ObjectAddress, upload_id: &str) -> StorageResult<()> {
        self.record(Call::Abort {
            upload_id: upload_id.to_string(),
        });
        let mut state = self.state.lock().unwrap();
        if state.faults.fail_abort {
            return Err(injected("abort"));
        }
        state
            .uploads
            .remove(upload_id)
            .map(|_| ())
            .ok_or_else(|| StorageError::NoSuchUpload(upload_id.to_string()))
    }
}
