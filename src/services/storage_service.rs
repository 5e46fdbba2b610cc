//! StorageService: a local `ObjectStoreClient` backed by SQLite for metadata
//! and local disk for payloads.
//!
//! A payload lives at `base_path/{bucket}/{aa}/{bb}/{digest}` where `digest`
//! is the hex MD5 of `bucket/key` and `aa`, `bb` are its first two bytes. Keys
//! never become path components, so `out.csv` and `out.csv/part-0.csv` are
//! two sibling files rather than a file and a directory of the same name.
//!
//! Multipart sessions keep their parts under `base_path/.uploads/{upload_id}`
//! until they are completed or aborted. Bucket names cannot start with a dot,
//! so that directory never collides with a bucket.

use crate::{
    client::ObjectStoreClient,
    config::MAX_COPY_PARTS,
    errors::{StorageError, StorageResult},
    models::{
        address::ObjectAddress,
        bucket::Bucket,
        metadata::{KeyPage, ObjectMetadata},
        multipart::{CompletedPart, MultipartPart, MultipartUpload},
        object::Object,
    },
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::{Stream, StreamExt, pin_mut};
use md5::Context;
use sqlx::{
    QueryBuilder, SqlitePool,
    sqlite::{Sqlite, SqliteConnectOptions, SqlitePoolOptions},
};
use std::{
    collections::HashMap,
    io::{self, ErrorKind, SeekFrom},
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
};
use tokio::{
    fs::{self, File},
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
};
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct ListObjectsParams {
    pub prefix: Option<String>,
    pub continuation_token: Option<String>,
    pub max_keys: usize,
}

#[derive(Debug)]
pub struct ListObjectsResult {
    pub objects: Vec<Object>,
    pub next_continuation_token: Option<String>,
}

#[derive(Clone)]
pub struct StorageService {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,
}

const MAX_OBJECT_KEY_LEN: usize = 1024;
const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;
const MAX_LIST_KEYS: usize = 1000;
const COPY_BUFFER_SIZE: usize = 64 * 1024;
const UPLOADS_DIR: &str = ".uploads";
const SCHEMA_SQL: &str = include_str!("../../migrations/0001_init.sql");

impl StorageService {
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            db,
            base_path: base_path.into(),
        }
    }

    /// Connect to `database_url`, creating the database file and the payload
    /// directory when they are missing.
    pub async fn open(database_url: &str, base_path: impl Into<PathBuf>) -> StorageResult<Self> {
        let base_path = base_path.into();
        fs::create_dir_all(&base_path).await?;

        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        if let Some(parent) = options.get_filename().parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).await?;
                debug!("created database directory {}", parent.display());
            }
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        Ok(Self::new(Arc::new(pool), base_path))
    }

    /// Apply the embedded schema. Every statement is idempotent.
    pub async fn migrate(&self) -> StorageResult<()> {
        let statements = SCHEMA_SQL
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        debug!("running {} schema statements", statements.len());
        for stmt in statements {
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }

    /// Rejects empty or oversized keys, keys starting or ending with `/`,
    /// `..` sequences and control characters.
    fn ensure_key_safe(&self, key: &str) -> StorageResult<()> {
        if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
            return Err(StorageError::InvalidObjectKey);
        }
        if key.starts_with('/') || key.ends_with('/') || key.contains("..") {
            return Err(StorageError::InvalidObjectKey);
        }
        if key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
        {
            return Err(StorageError::InvalidObjectKey);
        }
        Ok(())
    }

    /// 3–63 characters of lowercase letters, digits, dots and hyphens, starting
    /// and ending with a letter or digit.
    fn ensure_bucket_name_safe(&self, name: &str) -> StorageResult<()> {
        let invalid = |reason: &str| StorageError::InvalidBucketName {
            name: name.to_string(),
            reason: reason.to_string(),
        };

        if !(BUCKET_NAME_MIN_LEN..=BUCKET_NAME_MAX_LEN).contains(&name.len()) {
            return Err(invalid("must be between 3 and 63 characters"));
        }
        if !name
            .chars()
            .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
        {
            return Err(invalid(
                "allowed characters are lowercase letters, digits, dots, and hyphens",
            ));
        }
        let edge_ok = |c: Option<char>| c.is_some_and(|c| c.is_ascii_alphanumeric());
        if !edge_ok(name.chars().next()) || !edge_ok(name.chars().last()) {
            return Err(invalid("must start and end with a lowercase letter or digit"));
        }
        if name.contains("..") {
            return Err(invalid("cannot contain consecutive dots"));
        }
        Ok(())
    }

    fn bucket_root(&self, bucket_name: &str) -> PathBuf {
        self.base_path.join(bucket_name)
    }

    /// Payload file for `bucket/key`; its name is the key's MD5 and its two
    /// parent directories are the digest's first two bytes.
    fn object_path(&self, bucket_name: &str, key: &str) -> PathBuf {
        let digest = md5::compute(format!("{}/{}", bucket_name, key));
        let mut path = self.bucket_root(bucket_name);
        path.push(format!("{:02x}", digest[0]));
        path.push(format!("{:02x}", digest[1]));
        path.push(format!("{:x}", digest));
        path
    }

    fn upload_dir(&self, upload_id: &str) -> PathBuf {
        self.base_path.join(UPLOADS_DIR).join(upload_id)
    }

    fn part_path(&self, upload_id: &str, part_number: u32) -> PathBuf {
        self.upload_dir(upload_id)
            .join(format!("{:05}", part_number))
    }

    async fn fetch_bucket(&self, bucket: &str) -> StorageResult<Bucket> {
        self.ensure_bucket_name_safe(bucket)?;
        sqlx::query_as::<Sqlite, Bucket>(
            "SELECT id, name, created_at FROM buckets WHERE name = ?",
        )
        .bind(bucket)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StorageError::BucketNotFound(bucket.to_string()),
            other => StorageError::Sqlx(other),
        })
    }

    /// Fetch a live object row; deleted rows count as missing.
    async fn fetch_object(&self, bucket: &Bucket, key: &str) -> StorageResult<Object> {
        sqlx::query_as::<_, Object>(
            "SELECT id, bucket_id, key, content_type, size_bytes, etag,
                    last_modified, is_deleted
             FROM objects
             WHERE key = ? AND bucket_id = ? AND is_deleted = 0",
        )
        .bind(key)
        .bind(bucket.id)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StorageError::ObjectNotFound {
                bucket: bucket.name.clone(),
                key: key.to_string(),
            },
            other => StorageError::Sqlx(other),
        })
    }

    /// Fetch an open session for `bucket/key`. Completed, aborted or
    /// mismatched sessions have no row and are reported as missing.
    async fn fetch_upload(
        &self,
        bucket: &Bucket,
        key: &str,
        upload_id: &str,
    ) -> StorageResult<MultipartUpload> {
        sqlx::query_as::<_, MultipartUpload>(
            "SELECT id, bucket_id, key, upload_id, initiated_at
             FROM multipart_uploads
             WHERE upload_id = ? AND bucket_id = ? AND key = ?",
        )
        .bind(upload_id)
        .bind(bucket.id)
        .bind(key)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StorageError::NoSuchUpload(upload_id.to_string()),
            other => StorageError::Sqlx(other),
        })
    }

    /// Insert or overwrite the row for `key`, clearing any delete marker.
    async fn upsert_object(
        &self,
        bucket: &Bucket,
        key: &str,
        content_type: Option<String>,
        size_bytes: i64,
        etag: &str,
    ) -> StorageResult<Object> {
        let object = sqlx::query_as::<_, Object>(
            r#"
            INSERT INTO objects (
                id, bucket_id, key, content_type, size_bytes, etag, last_modified, is_deleted
            ) VALUES (?, ?, ?, ?, ?, ?, ?, 0)
            ON CONFLICT(bucket_id, key) DO UPDATE SET
                content_type = excluded.content_type,
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                last_modified = excluded.last_modified,
                is_deleted = 0
            RETURNING id, bucket_id, key, content_type, size_bytes, etag,
                      last_modified, is_deleted
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(bucket.id)
        .bind(key)
        .bind(content_type)
        .bind(size_bytes)
        .bind(etag)
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await?;

        Ok(object)
    }

    /// Create the object's parent directories and return a fresh temp path
    /// next to where the payload will land.
    async fn staging_path(file_path: &Path) -> StorageResult<PathBuf> {
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StorageError::Io(io::Error::new(
                ErrorKind::Other,
                "object path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        Ok(parent.join(format!(".tmp-{}", Uuid::new_v4())))
    }

    /// Move a fully written temp file over the final payload path.
    async fn commit_staged(tmp_path: &Path, file_path: &Path) -> StorageResult<()> {
        if let Err(err) = fs::rename(tmp_path, file_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(file_path).await?;
                fs::rename(tmp_path, file_path).await?;
            } else {
                let _ = fs::remove_file(tmp_path).await;
                return Err(StorageError::Io(err));
            }
        }
        Ok(())
    }

    /// Create a bucket and its directory.
    pub async fn create_bucket(&self, name: &str) -> StorageResult<Bucket> {
        self.ensure_bucket_name_safe(name)?;
        fs::create_dir_all(self.bucket_root(name)).await?;

        let bucket = Bucket {
            id: Uuid::new_v4(),
            name: name.to_string(),
            created_at: Utc::now(),
        };

        match sqlx::query("INSERT INTO buckets (id, name, created_at) VALUES (?, ?, ?)")
            .bind(bucket.id)
            .bind(&bucket.name)
            .bind(bucket.created_at)
            .execute(&*self.db)
            .await
        {
            Ok(_) => Ok(bucket),
            Err(err) if is_unique_violation(&err) => {
                Err(StorageError::BucketAlreadyExists(name.to_string()))
            }
            Err(err) => Err(StorageError::Sqlx(err)),
        }
    }

    /// Stream a payload to disk, computing its MD5 on the way, then upsert
    /// its row. The temp file is removed on any failure.
    pub async fn put_object_stream<S>(
        &self,
        bucket: &str,
        key: &str,
        content_type: Option<String>,
        stream: S,
    ) -> StorageResult<Object>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        self.ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;

        let file_path = self.object_path(&bucket_rec.name, key);
        let tmp_path = Self::staging_path(&file_path).await?;
        let mut file = File::create(&tmp_path).await?;

        let mut size_bytes: i64 = 0;
        let mut digest = Context::new();
        pin_mut!(stream);
        while let Some(chunk_res) = stream.next().await {
            let written = match chunk_res {
                Ok(chunk) => {
                    size_bytes += chunk.len() as i64;
                    digest.consume(&chunk);
                    file.write_all(&chunk).await
                }
                Err(err) => Err(err),
            };
            if let Err(err) = written {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StorageError::Io(err));
            }
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }
        drop(file);

        Self::commit_staged(&tmp_path, &file_path).await?;

        let etag = format!("{:x}", digest.compute());
        self.upsert_object(&bucket_rec, key, content_type, size_bytes, &etag)
            .await
    }

    /// Convenience wrapper over `put_object_stream` for in-memory payloads.
    pub async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: impl Into<Bytes>,
    ) -> StorageResult<Object> {
        let body = body.into();
        self.put_object_stream(bucket, key, None, futures::stream::iter([Ok(body)]))
            .await
    }

    /// Metadata row plus an open handle on the payload.
    pub async fn get_object_reader(
        &self,
        bucket: &str,
        key: &str,
    ) -> StorageResult<(Object, File)> {
        self.ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let object = self.fetch_object(&bucket_rec, key).await?;

        let file = File::open(self.object_path(&bucket_rec.name, key))
            .await
            .map_err(|err| {
                if err.kind() == ErrorKind::NotFound {
                    StorageError::ObjectNotFound {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                    }
                } else {
                    StorageError::Io(err)
                }
            })?;

        Ok((object, file))
    }

    pub async fn get_object_metadata(&self, bucket: &str, key: &str) -> StorageResult<Object> {
        self.ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        self.fetch_object(&bucket_rec, key).await
    }

    /// List live objects in key order, `max_keys` at a time.
    ///
    /// The continuation token is the last key of the previous page.
    pub async fn list_objects_v2(
        &self,
        bucket: &str,
        params: ListObjectsParams,
    ) -> StorageResult<ListObjectsResult> {
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let max_keys = params.max_keys.clamp(1, MAX_LIST_KEYS);
        let fetch_limit = max_keys + 1;

        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT id, bucket_id, key, content_type, size_bytes, etag, \
             last_modified, is_deleted \
             FROM objects WHERE bucket_id = ",
        );
        builder.push_bind(bucket_rec.id);
        builder.push(" AND is_deleted = 0");

        // substr() rather than LIKE: prefixes may contain `%` or `_`, and LIKE
        // is case-insensitive for ASCII.
        if let Some(prefix) = params.prefix.as_deref().filter(|p| !p.is_empty()) {
            builder.push(" AND substr(key, 1, ");
            builder.push_bind(prefix.chars().count() as i64);
            builder.push(") = ");
            builder.push_bind(prefix.to_string());
        }

        if let Some(token) = &params.continuation_token {
            builder.push(" AND key > ");
            builder.push_bind(token.clone());
        }

        builder.push(" ORDER BY key ASC LIMIT ");
        builder.push_bind(fetch_limit as i64);

        let mut objects: Vec<Object> = builder.build_query_as().fetch_all(&*self.db).await?;

        let next_continuation_token = if objects.len() == fetch_limit {
            objects.pop();
            objects.last().map(|obj| obj.key.clone())
        } else {
            None
        };

        Ok(ListObjectsResult {
            objects,
            next_continuation_token,
        })
    }

    /// Soft-delete an object and remove its payload.
    ///
    /// Returns ObjectNotFound when there is no live object at the key.
    pub async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<Object> {
        self.ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let object = self.fetch_object(&bucket_rec, key).await?;

        let result = sqlx::query(
            "UPDATE objects SET is_deleted = 1 WHERE key = ? AND bucket_id = ? AND is_deleted = 0",
        )
        .bind(key)
        .bind(bucket_rec.id)
        .execute(&*self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }

        let file_path = self.object_path(&bucket_rec.name, key);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed physical file {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", file_path.display());
            }
            Err(err) => return Err(StorageError::Io(err)),
        }

        if let Some(parent) = file_path.parent() {
            prune_empty_dirs(parent, &self.bucket_root(&bucket_rec.name)).await;
        }

        Ok(object)
    }

    /// Copy a payload and its row in one step. The destination inherits the
    /// source ETag and content type.
    pub async fn copy_object_payload(
        &self,
        source: &ObjectAddress,
        dest: &ObjectAddress,
    ) -> StorageResult<Object> {
        self.ensure_key_safe(source.key())?;
        self.ensure_key_safe(dest.key())?;
        let src_bucket = self.fetch_bucket(source.bucket()).await?;
        let dst_bucket = self.fetch_bucket(dest.bucket()).await?;
        let src_object = self.fetch_object(&src_bucket, source.key()).await?;

        let src_path = self.object_path(&src_bucket.name, source.key());
        let file_path = self.object_path(&dst_bucket.name, dest.key());
        let tmp_path = Self::staging_path(&file_path).await?;

        let copied = match fs::copy(&src_path, &tmp_path).await {
            Ok(copied) => copied,
            Err(err) => {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StorageError::Io(err));
            }
        };
        Self::commit_staged(&tmp_path, &file_path).await?;

        let etag = match src_object.etag {
            Some(etag) => etag,
            None => format!("{:x}", md5::compute(fs::read(&file_path).await?)),
        };
        self.upsert_object(
            &dst_bucket,
            dest.key(),
            src_object.content_type,
            copied as i64,
            &etag,
        )
        .await
    }

    /// Open a multipart session for `dest`.
    pub async fn create_multipart_upload(
        &self,
        dest: &ObjectAddress,
    ) -> StorageResult<MultipartUpload> {
        self.ensure_key_safe(dest.key())?;
        let bucket_rec = self.fetch_bucket(dest.bucket()).await?;

        let upload = MultipartUpload {
            id: Uuid::new_v4(),
            bucket_id: bucket_rec.id,
            key: dest.key().to_string(),
            upload_id: Uuid::new_v4().simple().to_string(),
            initiated_at: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO multipart_uploads (id, bucket_id, key, upload_id, initiated_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(upload.id)
        .bind(upload.bucket_id)
        .bind(&upload.key)
        .bind(&upload.upload_id)
        .bind(upload.initiated_at)
        .execute(&*self.db)
        .await?;

        fs::create_dir_all(self.upload_dir(&upload.upload_id)).await?;
        debug!(upload_id = %upload.upload_id, dest = %dest, "opened multipart session");
        Ok(upload)
    }

    /// Copy `first_byte..=last_byte` of `source` into part `part_number` of an
    /// open session. Re-copying a part number replaces it.
    pub async fn upload_part_copy(
        &self,
        source: &ObjectAddress,
        dest: &ObjectAddress,
        upload_id: &str,
        part_number: u32,
        first_byte: u64,
        last_byte: u64,
    ) -> StorageResult<MultipartPart> {
        if !(1..=MAX_COPY_PARTS).contains(&part_number) {
            return Err(StorageError::InvalidPart {
                part_number,
                reason: format!("part numbers range from 1 to {}", MAX_COPY_PARTS),
            });
        }
        self.ensure_key_safe(source.key())?;
        self.ensure_key_safe(dest.key())?;
        let dst_bucket = self.fetch_bucket(dest.bucket()).await?;
        let upload = self.fetch_upload(&dst_bucket, dest.key(), upload_id).await?;

        let src_bucket = self.fetch_bucket(source.bucket()).await?;
        let src_object = self.fetch_object(&src_bucket, source.key()).await?;
        let size = src_object.size_bytes.max(0) as u64;
        if first_byte > last_byte || last_byte >= size {
            return Err(StorageError::InvalidRange {
                first_byte,
                last_byte,
                size,
            });
        }

        let mut src_file = File::open(self.object_path(&src_bucket.name, source.key())).await?;
        src_file.seek(SeekFrom::Start(first_byte)).await?;

        let part_path = self.part_path(upload_id, part_number);
        let tmp_path = Self::staging_path(&part_path).await?;
        let len = last_byte - first_byte + 1;
        let etag = match copy_range(&mut src_file, &tmp_path, len).await {
            Ok(etag) => etag,
            Err(err) => {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StorageError::Io(err));
            }
        };
        Self::commit_staged(&tmp_path, &part_path).await?;

        let part = MultipartPart {
            id: Uuid::new_v4(),
            upload_id: upload.id,
            part_number: part_number as i64,
            size_bytes: len as i64,
            etag,
            uploaded_at: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO multipart_parts (id, upload_id, part_number, size_bytes, etag, uploaded_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(upload_id, part_number) DO UPDATE SET
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                uploaded_at = excluded.uploaded_at",
        )
        .bind(part.id)
        .bind(part.upload_id)
        .bind(part.part_number)
        .bind(part.size_bytes)
        .bind(&part.etag)
        .bind(part.uploaded_at)
        .execute(&*self.db)
        .await?;

        Ok(part)
    }

    /// Concatenate the listed parts in order into the destination object and
    /// close the session.
    ///
    /// Parts must be listed in strictly ascending order and each ETag must
    /// match what was recorded when the part was copied. The assembled ETag is
    /// the MD5 over the part ETags, suffixed with the part count.
    pub async fn complete_multipart_upload(
        &self,
        dest: &ObjectAddress,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> StorageResult<Object> {
        self.ensure_key_safe(dest.key())?;
        let bucket_rec = self.fetch_bucket(dest.bucket()).await?;
        let upload = self.fetch_upload(&bucket_rec, dest.key(), upload_id).await?;

        if parts.is_empty() {
            return Err(StorageError::InvalidPart {
                part_number: 0,
                reason: "at least one part is required".into(),
            });
        }
        if let Some(pair) = parts
            .windows(2)
            .find(|pair| pair[0].part_number >= pair[1].part_number)
        {
            return Err(StorageError::InvalidPart {
                part_number: pair[1].part_number,
                reason: "parts must be listed in ascending order".into(),
            });
        }

        let stored: HashMap<i64, MultipartPart> = sqlx::query_as::<_, MultipartPart>(
            "SELECT id, upload_id, part_number, size_bytes, etag, uploaded_at
             FROM multipart_parts WHERE upload_id = ?",
        )
        .bind(upload.id)
        .fetch_all(&*self.db)
        .await?
        .into_iter()
        .map(|part| (part.part_number, part))
        .collect();

        let mut combined = Context::new();
        let mut size_bytes: i64 = 0;
        for part in parts {
            let recorded = stored.get(&(part.part_number as i64)).ok_or_else(|| {
                StorageError::InvalidPart {
                    part_number: part.part_number,
                    reason: "part was never copied".into(),
                }
            })?;
            if recorded.etag != part.e_tag.trim_matches('"') {
                return Err(StorageError::InvalidPart {
                    part_number: part.part_number,
                    reason: "ETag does not match the copied part".into(),
                });
            }
            combined.consume(recorded.etag.as_bytes());
            size_bytes += recorded.size_bytes;
        }

        let file_path = self.object_path(&bucket_rec.name, dest.key());
        let tmp_path = Self::staging_path(&file_path).await?;
        if let Err(err) = self.assemble_parts(upload_id, parts, &tmp_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }
        Self::commit_staged(&tmp_path, &file_path).await?;

        let etag = format!("{:x}-{}", combined.compute(), parts.len());
        let object = self
            .upsert_object(&bucket_rec, dest.key(), None, size_bytes, &etag)
            .await?;

        self.close_upload(&upload).await?;

        info!(
            upload_id,
            dest = %dest,
            parts = parts.len(),
            size_bytes,
            "assembled multipart object"
        );
        Ok(object)
    }

    async fn assemble_parts(
        &self,
        upload_id: &str,
        parts: &[CompletedPart],
        target: &Path,
    ) -> io::Result<()> {
        let mut out = File::create(target).await?;
        for part in parts {
            let mut part_file = File::open(self.part_path(upload_id, part.part_number)).await?;
            tokio::io::copy(&mut part_file, &mut out).await?;
        }
        out.sync_all().await
    }

    /// Drop an open session, its part rows and its part files.
    pub async fn abort_multipart_upload(
        &self,
        dest: &ObjectAddress,
        upload_id: &str,
    ) -> StorageResult<()> {
        let bucket_rec = self.fetch_bucket(dest.bucket()).await?;
        let upload = self.fetch_upload(&bucket_rec, dest.key(), upload_id).await?;

        self.close_upload(&upload).await?;
        debug!(upload_id, dest = %dest, "aborted multipart session");
        Ok(())
    }

    /// Number of sessions that are neither completed nor aborted.
    pub async fn open_upload_count(&self) -> StorageResult<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM multipart_uploads")
            .fetch_one(&*self.db)
            .await?;
        Ok(count)
    }

    /// Drop a session's part rows, its own row and its part files.
    async fn close_upload(&self, upload: &MultipartUpload) -> StorageResult<()> {
        sqlx::query("DELETE FROM multipart_parts WHERE upload_id = ?")
            .bind(upload.id)
            .execute(&*self.db)
            .await?;
        sqlx::query("DELETE FROM multipart_uploads WHERE id = ?")
            .bind(upload.id)
            .execute(&*self.db)
            .await?;
        self.remove_upload_dir(&upload.upload_id).await;
        Ok(())
    }

    async fn remove_upload_dir(&self, upload_id: &str) {
        let dir = self.upload_dir(upload_id);
        if let Err(err) = fs::remove_dir_all(&dir).await {
            if err.kind() != ErrorKind::NotFound {
                debug!("failed to remove upload directory {}: {}", dir.display(), err);
            }
        }
    }
}

#[async_trait]
impl ObjectStoreClient for StorageService {
    async fn get_metadata(&self, bucket: &str, key: &str) -> StorageResult<ObjectMetadata> {
        match self.get_object_metadata(bucket, key).await {
            Ok(object) => Ok(object.metadata()),
            Err(StorageError::ObjectNotFound { .. }) => Ok(ObjectMetadata::absent()),
            Err(err) => Err(err),
        }
    }

    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation_token: Option<&str>,
        max_keys: usize,
    ) -> StorageResult<KeyPage> {
        let result = self
            .list_objects_v2(
                bucket,
                ListObjectsParams {
                    prefix: Some(prefix.to_string()),
                    continuation_token: continuation_token.map(str::to_string),
                    max_keys,
                },
            )
            .await?;

        Ok(KeyPage {
            keys: result.objects.into_iter().map(|obj| obj.key).collect(),
            next_continuation_token: result.next_continuation_token,
        })
    }

    async fn copy_object(&self, source: &ObjectAddress, dest: &ObjectAddress) -> StorageResult<()> {
        self.copy_object_payload(source, dest).await.map(|_| ())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<()> {
        match StorageService::delete_object(self, bucket, key).await {
            Ok(_) | Err(StorageError::ObjectNotFound { .. }) => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn initiate_multipart_copy(&self, dest: &ObjectAddress) -> StorageResult<String> {
        Ok(self.create_multipart_upload(dest).await?.upload_id)
    }

    async fn copy_part(
        &self,
        source: &ObjectAddress,
        dest: &ObjectAddress,
        upload_id: &str,
        part_number: u32,
        first_byte: u64,
        last_byte: u64,
    ) -> StorageResult<String> {
        let part = self
            .upload_part_copy(source, dest, upload_id, part_number, first_byte, last_byte)
            .await?;
        Ok(part.etag)
    }

    async fn complete_multipart_copy(
        &self,
        dest: &ObjectAddress,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> StorageResult<()> {
        self.complete_multipart_upload(dest, upload_id, parts)
            .await
            .map(|_| ())
    }

    async fn abort_multipart_copy(&self, dest: &ObjectAddress, upload_id: &str) -> StorageResult<()> {
        self.abort_multipart_upload(dest, upload_id).await
    }
}

/// Copy exactly `len` bytes from `reader` into a new file at `target`,
/// returning their MD5. Fails with UnexpectedEof if the source runs short.
async fn copy_range(reader: &mut File, target: &Path, len: u64) -> io::Result<String> {
    let mut out = File::create(target).await?;
    let mut digest = Context::new();
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut remaining = len;

    while remaining > 0 {
        let want = remaining.min(buf.len() as u64) as usize;
        let n = reader.read(&mut buf[..want]).await?;
        if n == 0 {
            return Err(io::Error::new(
                ErrorKind::UnexpectedEof,
                "source object is shorter than its recorded size",
            ));
        }
        digest.consume(&buf[..n]);
        out.write_all(&buf[..n]).await?;
        remaining -= n as u64;
    }

    out.sync_all().await?;
    Ok(format!("{:x}", digest.compute()))
}

/// Remove empty directories from `start` up to, but excluding, `stop`.
async fn prune_empty_dirs(start: &Path, stop: &Path) {
    let mut current = start.to_path_buf();
    while current.starts_with(stop) && current != stop {
        match fs::remove_dir(&current).await {
            Ok(_) => match current.parent() {
                Some(parent) => current = parent.to_path_buf(),
                None => break,
            },
            Err(err) if err.kind() == ErrorKind::NotFound => break,
            Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
            Err(err) => {
                debug!("failed to prune directory {}: {}", current.display(), err);
                break;
            }
        }
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}
