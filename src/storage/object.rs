use {
  super::*,
  aws_sdk_s3::{
    config::{Builder, Credentials, Region},
    primitives::ByteStream,
    Client,
  },
};

/// S3-compatible blob store. Works against AWS S3, MinIO, and other
/// path-style endpoints; a missing object maps to the typed not-found.
pub struct ObjectStore {
  client: Client,
  bucket: String,
}

impl ObjectStore {
  pub async fn new(endpoint: &str, access_key: &str, secret_key: &str, bucket: &str) -> Self {
    let mut builder = Builder::new()
      .region(Region::new("us-east-1"))
      .force_path_style(true)
      .behavior_version(aws_sdk_s3::config::BehaviorVersion::latest());

    if access_key.is_empty() {
      // fall back to ambient credentials (env, profile, instance role)
      let sdk_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
      if let Some(credentials) = sdk_config.credentials_provider() {
        builder = builder.credentials_provider(credentials);
      }
    } else {
      builder =
        builder.credentials_provider(Credentials::new(access_key, secret_key, None, None, "static"));
    }

    if !endpoint.is_empty() {
      builder = builder.endpoint_url(endpoint);
    }

    Self {
      client: Client::from_conf(builder.build()),
      bucket: bucket.into(),
    }
  }

  fn not_found(error: impl Display, key: &str) -> StorageError {
    let message = error.to_string();
    if message.contains("NoSuchKey") || message.contains("NotFound") || message.contains("404") {
      StorageError::NotFound(key.into())
    } else {
      StorageError::Backend(message)
    }
  }
}

#[async_trait::async_trait]
impl BlobStore for ObjectStore {
  async fn save(&self, key: &str, data: Bytes) -> StorageResult<()> {
    self
      .client
      .put_object()
      .bucket(&self.bucket)
      .key(key)
      .body(ByteStream::from(data))
      .send()
      .await
      .map_err(|err| StorageError::Backend(err.to_string()))?;

    Ok(())
  }

  async fn get(&self, key: &str) -> StorageResult<Bytes> {
    let object = self
      .client
      .get_object()
      .bucket(&self.bucket)
      .key(key)
      .send()
      .await
      .map_err(|err| Self::not_found(aws_sdk_s3::error::DisplayErrorContext(&err), key))?;

    let data = object
      .body
      .collect()
      .await
      .map_err(|err| StorageError::Backend(err.to_string()))?;

    Ok(data.into_bytes())
  }

  async fn delete(&self, key: &str) -> StorageResult<()> {
    self
      .client
      .delete_object()
      .bucket(&self.bucket)
      .key(key)
      .send()
      .await
      .map_err(|err| StorageError::Backend(err.to_string()))?;

    Ok(())
  }

  async fn exists(&self, key: &str) -> StorageResult<bool> {
    match self
      .client
      .head_object()
      .bucket(&self.bucket)
      .key(key)
      .send()
      .await
    {
      Ok(_) => Ok(true),
      Err(err) => match Self::not_found(aws_sdk_s3::error::DisplayErrorContext(&err), key) {
        StorageError::NotFound(_) => Ok(false),
        other => Err(other),
      },
    }
  }
}
