use {super::*, std::os::unix::fs::PermissionsExt, tokio::fs};

/// Local filesystem blob store rooted at a base path. Parent directories
/// are created on demand with `0755`, files are written with `0644`.
pub struct LocalStore {
  base_path: PathBuf,
}

impl LocalStore {
  pub fn new(base_path: PathBuf) -> Result<Self> {
    std::fs::create_dir_all(&base_path)
      .with_context(|| format!("failed to create base path `{}`", base_path.display()))?;
    Ok(Self { base_path })
  }

  fn key_path(&self, key: &str) -> PathBuf {
    self.base_path.join(key)
  }
}

#[async_trait::async_trait]
impl BlobStore for LocalStore {
  async fn save(&self, key: &str, data: Bytes) -> StorageResult<()> {
    let path = self.key_path(key);

    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent).await?;
      fs::set_permissions(parent, std::fs::Permissions::from_mode(0o755)).await?;
    }

    fs::write(&path, &data).await?;
    fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).await?;

    Ok(())
  }

  async fn get(&self, key: &str) -> StorageResult<Bytes> {
    match fs::read(self.key_path(key)).await {
      Ok(data) => Ok(Bytes::from(data)),
      Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
        Err(StorageError::NotFound(key.into()))
      }
      Err(err) => Err(err.into()),
    }
  }

  async fn delete(&self, key: &str) -> StorageResult<()> {
    match fs::remove_file(self.key_path(key)).await {
      Ok(()) => Ok(()),
      Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
      Err(err) => Err(err.into()),
    }
  }

  async fn exists(&self, key: &str) -> StorageResult<bool> {
    Ok(fs::try_exists(self.key_path(key)).await?)
  }
}

#[cfg(test)]
mod tests {
  use {super::*, tempfile::TempDir};

  #[tokio::test]
  async fn save_get_delete_exists() {
    let dir = TempDir::new().unwrap();
    let store = LocalStore::new(dir.path().to_path_buf()).unwrap();

    let data = Bytes::from_static(b"hello world");
    store.save("indexer/mvc/abci0.txt", data.clone()).await.unwrap();

    assert_eq!(store.get("indexer/mvc/abci0.txt").await.unwrap(), data);
    assert!(store.exists("indexer/mvc/abci0.txt").await.unwrap());
    assert!(!store.exists("indexer/mvc/missing").await.unwrap());

    store.delete("indexer/mvc/abci0.txt").await.unwrap();
    assert!(!store.exists("indexer/mvc/abci0.txt").await.unwrap());

    // deleting a missing key is not an error
    store.delete("indexer/mvc/abci0.txt").await.unwrap();
  }

  #[tokio::test]
  async fn get_missing_is_a_typed_not_found() {
    let dir = TempDir::new().unwrap();
    let store = LocalStore::new(dir.path().to_path_buf()).unwrap();

    assert!(matches!(
      store.get("nope").await,
      Err(StorageError::NotFound(_)),
    ));
  }

  #[tokio::test]
  async fn save_overwrites() {
    let dir = TempDir::new().unwrap();
    let store = LocalStore::new(dir.path().to_path_buf()).unwrap();

    store.save("a/b", Bytes::from_static(b"one")).await.unwrap();
    store.save("a/b", Bytes::from_static(b"two")).await.unwrap();
    assert_eq!(store.get("a/b").await.unwrap(), Bytes::from_static(b"two"));
  }

  #[tokio::test]
  async fn written_files_carry_expected_permissions() {
    let dir = TempDir::new().unwrap();
    let store = LocalStore::new(dir.path().to_path_buf()).unwrap();

    store.save("a/b/c", Bytes::from_static(b"x")).await.unwrap();

    let mode = std::fs::metadata(dir.path().join("a/b/c"))
      .unwrap()
      .permissions()
      .mode();
    assert_eq!(mode & 0o777, 0o644);
  }
}
