//! Read-only indexer HTTP façade: cursor-paginated views over the index
//! collections plus blob content delivery. Handlers never mutate scanner
//! state.

use {
  super::*,
  crate::storage::StorageError,
  axum::{
    extract::{Path as AxumPath, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
  },
};

pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const MAX_PAGE_SIZE: usize = 100;

/// Uniform response envelope.
#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize> {
  pub code: i32,
  pub message: String,
  pub data: Option<T>,
}

pub fn success<T: Serialize>(data: T) -> Json<Envelope<T>> {
  Json(Envelope {
    code: 0,
    message: "success".into(),
    data: Some(data),
  })
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
  #[error("{0}")]
  NotFound(String),
  #[error("{0}")]
  InvalidParam(String),
  #[error(transparent)]
  Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let (status, message) = match &self {
      Self::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
      Self::InvalidParam(_) => (StatusCode::BAD_REQUEST, self.to_string()),
      Self::Internal(err) => {
        log::error!("request failed: {err:#}");
        (StatusCode::INTERNAL_SERVER_ERROR, "internal error".into())
      }
    };

    let body = Json(Envelope::<()> {
      code: status.as_u16() as i32,
      message,
      data: None,
    });

    (status, body).into_response()
  }
}

impl From<StorageError> for ApiError {
  fn from(err: StorageError) -> Self {
    match err {
      StorageError::NotFound(key) => Self::NotFound(format!("content not found: {key}")),
      other => Self::Internal(other.into()),
    }
  }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Clone)]
pub struct ApiState {
  pub chain: Chain,
  pub index: Arc<Index>,
  pub storage: Arc<dyn BlobStore>,
  pub rpc: RpcClient,
}

#[derive(Debug, Default, Deserialize)]
pub struct Pagination {
  cursor: Option<String>,
  size: Option<usize>,
}

impl Pagination {
  /// Normalised `(cursor, size)`. A literal `"0"` cursor is accepted as
  /// "from the top" for numeric-cursor clients.
  fn normalize(&self) -> (String, usize) {
    let cursor = match self.cursor.as_deref() {
      None | Some("") | Some("0") => String::new(),
      Some(cursor) => cursor.into(),
    };
    let size = self
      .size
      .unwrap_or(DEFAULT_PAGE_SIZE)
      .clamp(1, MAX_PAGE_SIZE);
    (cursor, size)
  }
}

#[derive(Debug, Serialize)]
struct FileList {
  files: Vec<File>,
  next_cursor: String,
  has_more: bool,
}

#[derive(Debug, Serialize)]
struct AvatarList {
  avatars: Vec<Avatar>,
  next_cursor: String,
  has_more: bool,
}

#[derive(Debug, Serialize)]
struct SyncStatusResponse {
  chain_name: String,
  current_sync_height: u64,
  latest_block_height: u64,
}

#[derive(Debug, Serialize)]
struct StatsResponse {
  total_files: u64,
}

pub fn router(state: ApiState) -> Router {
  Router::new()
    .route("/api/v1/files", get(list_files))
    .route("/api/v1/files/content/:pin_id", get(file_content))
    .route("/api/v1/files/creator/:address", get(files_by_address))
    .route("/api/v1/files/metaid/:meta_id", get(files_by_metaid))
    .route("/api/v1/files/:pin_id", get(file_by_pin))
    .route("/api/v1/avatars", get(list_avatars))
    .route("/api/v1/avatars/content/:pin_id", get(avatar_content))
    .route("/api/v1/avatars/metaid/:meta_id", get(avatar_by_metaid))
    .route("/api/v1/avatars/address/:address", get(avatar_by_address))
    .route("/api/v1/status", get(sync_status))
    .route("/api/v1/stats", get(stats))
    .with_state(state)
}

async fn list_files(
  State(state): State<ApiState>,
  Query(pagination): Query<Pagination>,
) -> ApiResult<Json<Envelope<FileList>>> {
  let (cursor, size) = pagination.normalize();
  let page = state.index.files(&cursor, size)?;
  Ok(success(FileList {
    files: page.items,
    next_cursor: page.next_cursor,
    has_more: page.has_more,
  }))
}

async fn file_by_pin(
  State(state): State<ApiState>,
  AxumPath(pin_id): AxumPath<String>,
) -> ApiResult<Json<Envelope<File>>> {
  let file = state
    .index
    .file_by_pin(&pin_id)?
    .ok_or_else(|| ApiError::NotFound(format!("file not found: {pin_id}")))?;
  Ok(success(file))
}

async fn files_by_address(
  State(state): State<ApiState>,
  AxumPath(address): AxumPath<String>,
  Query(pagination): Query<Pagination>,
) -> ApiResult<Json<Envelope<FileList>>> {
  if address.is_empty() {
    return Err(ApiError::InvalidParam("address is required".into()));
  }
  let (cursor, size) = pagination.normalize();
  let page = state.index.files_by_address(&address, &cursor, size)?;
  Ok(success(FileList {
    files: page.items,
    next_cursor: page.next_cursor,
    has_more: page.has_more,
  }))
}

async fn files_by_metaid(
  State(state): State<ApiState>,
  AxumPath(meta_id): AxumPath<String>,
  Query(pagination): Query<Pagination>,
) -> ApiResult<Json<Envelope<FileList>>> {
  if meta_id.is_empty() {
    return Err(ApiError::InvalidParam("metaId is required".into()));
  }
  let (cursor, size) = pagination.normalize();
  let page = state.index.files_by_metaid(&meta_id, &cursor, size)?;
  Ok(success(FileList {
    files: page.items,
    next_cursor: page.next_cursor,
    has_more: page.has_more,
  }))
}

async fn file_content(
  State(state): State<ApiState>,
  AxumPath(pin_id): AxumPath<String>,
) -> ApiResult<Response> {
  let file = state
    .index
    .file_by_pin(&pin_id)?
    .ok_or_else(|| ApiError::NotFound(format!("file not found: {pin_id}")))?;

  let content = state.storage.get(&file.storage_path).await?;

  let content_type = if file.content_type.is_empty() {
    "application/octet-stream".into()
  } else {
    file.content_type.clone()
  };

  let file_name = if file.file_name.is_empty() {
    file.pin_id.clone()
  } else {
    file.file_name.clone()
  };

  Ok(content_response(content, &content_type, &file_name))
}

async fn list_avatars(
  State(state): State<ApiState>,
  Query(pagination): Query<Pagination>,
) -> ApiResult<Json<Envelope<AvatarList>>> {
  let (cursor, size) = pagination.normalize();
  let page = state.index.avatars(&cursor, size)?;
  Ok(success(AvatarList {
    avatars: page.items,
    next_cursor: page.next_cursor,
    has_more: page.has_more,
  }))
}

async fn avatar_by_metaid(
  State(state): State<ApiState>,
  AxumPath(meta_id): AxumPath<String>,
) -> ApiResult<Json<Envelope<Avatar>>> {
  let avatar = state
    .index
    .latest_avatar_by_metaid(&meta_id)?
    .ok_or_else(|| ApiError::NotFound(format!("avatar not found for meta_id: {meta_id}")))?;
  Ok(success(avatar))
}

async fn avatar_by_address(
  State(state): State<ApiState>,
  AxumPath(address): AxumPath<String>,
) -> ApiResult<Json<Envelope<Avatar>>> {
  let avatar = state
    .index
    .latest_avatar_by_address(&address)?
    .ok_or_else(|| ApiError::NotFound(format!("avatar not found for address: {address}")))?;
  Ok(success(avatar))
}

async fn avatar_content(
  State(state): State<ApiState>,
  AxumPath(pin_id): AxumPath<String>,
) -> ApiResult<Response> {
  let avatar = state
    .index
    .avatar_by_pin(&pin_id)?
    .ok_or_else(|| ApiError::NotFound(format!("avatar not found: {pin_id}")))?;

  let content = state.storage.get(&avatar.storage_path).await?;

  let content_type = if avatar.content_type.is_empty() {
    "application/octet-stream".into()
  } else {
    avatar.content_type.clone()
  };

  Ok(content_response(content, &content_type, &avatar.pin_id))
}

async fn sync_status(State(state): State<ApiState>) -> ApiResult<Json<Envelope<SyncStatusResponse>>> {
  let status = state
    .index
    .sync_status(state.chain.name())?
    .ok_or_else(|| ApiError::NotFound("sync status not initialised".into()))?;

  // best effort; the node may be unreachable while the indexer catches up
  let latest_block_height = state.rpc.get_block_count().await.unwrap_or(0);

  Ok(success(SyncStatusResponse {
    chain_name: status.chain_name,
    current_sync_height: status.current_sync_height,
    latest_block_height,
  }))
}

async fn stats(State(state): State<ApiState>) -> ApiResult<Json<Envelope<StatsResponse>>> {
  Ok(success(StatsResponse {
    total_files: state.index.count_files()?,
  }))
}

fn content_response(content: Bytes, content_type: &str, file_name: &str) -> Response {
  (
    [
      (header::CONTENT_TYPE, content_type.to_string()),
      (
        header::CONTENT_DISPOSITION,
        format!("inline; filename=\"{file_name}\""),
      ),
    ],
    content,
  )
    .into_response()
}
